use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::mcp::handler::McpState;

use super::ServerConfig;

pub type GuardedMcpState = Arc<McpState>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub mcp_state: GuardedMcpState,
}

impl ServerState {
    pub fn new(config: ServerConfig, mcp_state: GuardedMcpState) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            mcp_state,
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedMcpState {
    fn from_ref(input: &ServerState) -> Self {
        input.mcp_state.clone()
    }
}
