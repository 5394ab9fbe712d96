//! Contract for the upstream agent SDK client.
//!
//! The LLM and its tool-calling harness are an external collaborator (out
//! of scope here); this module defines the trait boundary the session
//! server programs against, mirroring the shape `auth/jwt.rs` and
//! `auth/middleware.rs` use for their own external-service boundaries —
//! an explicit trait plus a typed options struct, no concrete client.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct AgentOptions {
    pub model_id: String,
    pub working_directory: String,
    pub resume_session_id: Option<String>,
    pub system_prompt: String,
    pub tool_names: Vec<String>,
    pub budget_cap_usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentMessage {
    AssistantText { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Value, is_error: bool },
    User { text: String },
    Result { cost_usd: f64, is_error: bool, upstream_session_id: String, error_message: Option<String> },
}

/// Forwarded to the TUI as an `ask_question` frame; the session server
/// awaits the matching `ask_response` before returning from this callback.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    async fn ask_user_question(&self, request_id: &str, question: &str, options: &[String]) -> Vec<String>;
}

#[async_trait]
pub trait AgentSession: Send + Sync {
    async fn query(&self, text: &str) -> anyhow::Result<()>;

    /// Streams messages for the in-flight query until a terminal `Result`
    /// variant is yielded.
    fn receive_response(&self) -> BoxStream<'_, anyhow::Result<AgentMessage>>;

    async fn interrupt(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn open(&self, options: AgentOptions) -> anyhow::Result<Box<dyn AgentSession>>;
}
