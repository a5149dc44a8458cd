//! End-to-end tests for tools, prompts and resources
//!
//! Tests which capabilities a session sees and how calls to them are
//! authorized over real HTTP.

mod common;

use cms_mcp_server::config::McpSettings;
use common::{
    default_settings, TestClient, TestServer, EDITOR_TOKEN, EXPIRED_TOKEN, READER_TOKEN,
};
use reqwest::StatusCode;
use serde_json::{json, Value};

fn names(list: &Value, key: &str) -> Vec<String> {
    list["result"][key]
        .as_array()
        .unwrap_or_else(|| panic!("missing {} in {}", key, list))
        .iter()
        .map(|item| item["name"].as_str().unwrap().to_string())
        .collect()
}

fn draft_params() -> Value {
    json!({ "name": "draft_content", "arguments": { "content_type": "article" } })
}

#[tokio::test]
async fn test_dev_mode_lists_server_info_tool() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let list = client.call(&session_id, None, "tools/list", json!({})).await;
    assert_eq!(names(&list, "tools"), vec!["server_info".to_string()]);
    assert!(list["result"]["tools"][0]["inputSchema"].is_object());
}

#[tokio::test]
async fn test_server_info_tool_reports_session() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let body = client
        .call(
            &session_id,
            None,
            "tools/call",
            json!({ "name": "server_info", "arguments": {} }),
        )
        .await;
    let info = &body["result"]["structuredContent"];
    assert_eq!(info["name"], "cms-mcp-server");
    assert_eq!(info["dev_mode"], true);
    assert_eq!(info["session_id"], session_id.as_str());
    assert_eq!(body["result"]["content"][0]["type"], "text");
}

#[tokio::test]
async fn test_unknown_tool_is_method_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let body = client
        .call(
            &session_id,
            None,
            "tools/call",
            json!({ "name": "publish_everything", "arguments": {} }),
        )
        .await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_unknown_method_is_method_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let body = client
        .call(&session_id, None, "sampling/createMessage", json!({}))
        .await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_anonymous_session_has_no_prompts() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let list = client.call(&session_id, None, "prompts/list", json!({})).await;
    assert!(names(&list, "prompts").is_empty());

    // The prompt exists but was never enabled for this session.
    let body = client
        .call(&session_id, None, "prompts/get", draft_params())
        .await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_reader_without_permission_has_no_prompts() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(Some(READER_TOKEN)).await;

    let list = client
        .call(&session_id, Some(READER_TOKEN), "prompts/list", json!({}))
        .await;
    assert!(names(&list, "prompts").is_empty());
}

#[tokio::test]
async fn test_editor_session_can_draft_content() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(Some(EDITOR_TOKEN)).await;

    let list = client
        .call(&session_id, Some(EDITOR_TOKEN), "prompts/list", json!({}))
        .await;
    assert_eq!(names(&list, "prompts"), vec!["draft_content".to_string()]);

    let body = client
        .call(&session_id, Some(EDITOR_TOKEN), "prompts/get", draft_params())
        .await;
    assert_eq!(body["result"]["description"], "Draft a new article");
    let messages = body["result"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert!(messages[0]["content"]["text"]
        .as_str()
        .unwrap()
        .contains("neutral tone"));
}

#[tokio::test]
async fn test_prompt_missing_required_argument() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(Some(EDITOR_TOKEN)).await;

    let body = client
        .call(
            &session_id,
            Some(EDITOR_TOKEN),
            "prompts/get",
            json!({ "name": "draft_content", "arguments": { "tone": "formal" } }),
        )
        .await;
    assert_eq!(body["error"]["code"], -32602);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("content_type"));
}

#[tokio::test]
async fn test_each_request_is_authorized_with_its_own_caller() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(Some(EDITOR_TOKEN)).await;

    let body = client
        .call(&session_id, None, "prompts/get", draft_params())
        .await;
    assert_eq!(body["error"]["code"], -32003);

    let list = client.call(&session_id, None, "prompts/list", json!({})).await;
    assert!(names(&list, "prompts").is_empty());
}

#[tokio::test]
async fn test_rejected_tokens_answer_unauthorized() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    for token in ["not-a-token", EXPIRED_TOKEN] {
        let response = client.initialize(Some(token)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], -32004);
    }
    assert_eq!(server.active_sessions(), 0);
    assert_eq!(server.servers_created(), 0);
}

#[tokio::test]
async fn test_tokens_are_ignored_without_an_authenticator() {
    let settings = McpSettings {
        tokens: Vec::new(),
        ..default_settings()
    };
    let server = TestServer::spawn_with(settings).await;
    let client = TestClient::new(server.base_url.clone());

    let session_id = client.initialize_session(Some("anything")).await;
    let list = client
        .call(&session_id, Some("anything"), "prompts/list", json!({}))
        .await;
    assert!(names(&list, "prompts").is_empty());
}

#[tokio::test]
async fn test_config_resource_is_readable() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let list = client
        .call(&session_id, None, "resources/list", json!({}))
        .await;
    assert_eq!(list["result"]["resources"][0]["uri"], "config://mcp");

    let body = client
        .call(
            &session_id,
            None,
            "resources/read",
            json!({ "uri": "config://mcp" }),
        )
        .await;
    let content = &body["result"]["contents"][0];
    assert_eq!(content["mimeType"], "application/json");
    let view: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert_eq!(view["maxSessions"], 100);
    assert_eq!(view["configuredTokens"], 3);
    assert!(!content["text"].as_str().unwrap().contains(EDITOR_TOKEN));
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize_session(None).await;

    let body = client
        .call(
            &session_id,
            None,
            "resources/read",
            json!({ "uri": "config://nothing" }),
        )
        .await;
    assert_eq!(body["error"]["code"], -32002);
}
