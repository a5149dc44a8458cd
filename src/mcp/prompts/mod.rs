//! MCP Prompts
//!
//! Built-in prompt definitions.

use std::collections::HashMap;

use super::capability::{PromptBuilder, PromptDefinition, RequestContext};
use super::error::CapabilityError;
use super::protocol::{McpError, PromptMessage, PromptsGetResult};
use super::registry::DefinitionSet;

/// Define all built-in prompts
pub fn register_all_prompts(definitions: &mut DefinitionSet) -> Result<(), CapabilityError> {
    definitions.define(draft_content_prompt())
}

fn draft_content_prompt() -> PromptDefinition {
    PromptBuilder::new("draft_content")
        .title("Draft Content")
        .description("Ask the model to draft a new piece of content")
        .requires("content.create")
        .argument(
            "content_type",
            "Kind of content to draft, for example article or landing page",
            true,
        )
        .argument("tone", "Tone of voice, defaults to neutral", false)
        .build(draft_content)
}

async fn draft_content(
    _request: RequestContext,
    arguments: HashMap<String, String>,
) -> Result<PromptsGetResult, McpError> {
    let content_type = arguments
        .get("content_type")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| McpError::InvalidParams("content_type must not be empty".to_string()))?;
    let tone = arguments
        .get("tone")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("neutral");

    let text = format!(
        "Draft a new {content_type} for the content management system. \
         Use a {tone} tone. Start with a title, then a short summary, then the body. \
         Return the draft only, without commentary."
    );

    Ok(PromptsGetResult {
        description: Some(format!("Draft a new {content_type}")),
        messages: vec![PromptMessage::user(text)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{PromptRole, ToolResultContent};

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_draft_content_requires_auth() {
        let prompt = draft_content_prompt();
        assert!(!prompt.meta.dev_mode_only);
        assert_eq!(
            prompt.meta.auth.as_ref().unwrap().actions,
            vec!["content.create".to_string()]
        );
        assert_eq!(prompt.arguments.len(), 2);
        assert!(prompt.arguments[0].required);
        assert!(!prompt.arguments[1].required);
    }

    #[tokio::test]
    async fn test_draft_content_builds_user_message() {
        let result = draft_content(
            RequestContext::default(),
            args(&[("content_type", "article"), ("tone", "playful")]),
        )
        .await
        .unwrap();

        assert_eq!(result.description.as_deref(), Some("Draft a new article"));
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, PromptRole::User);
        let ToolResultContent::Text { text } = &result.messages[0].content;
        assert!(text.contains("article"));
        assert!(text.contains("playful"));
    }

    #[tokio::test]
    async fn test_draft_content_defaults_tone() {
        let result = draft_content(RequestContext::default(), args(&[("content_type", "page")]))
            .await
            .unwrap();
        let ToolResultContent::Text { text } = &result.messages[0].content;
        assert!(text.contains("neutral"));
    }

    #[tokio::test]
    async fn test_draft_content_rejects_blank_type() {
        let result = draft_content(RequestContext::default(), args(&[("content_type", "  ")])).await;
        assert!(matches!(result, Err(McpError::InvalidParams(_))));
    }
}
