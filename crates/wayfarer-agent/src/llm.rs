use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::ConversationMessage;
use crate::model_selector::ModelConfig;
use crate::tool::ToolDefinition;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    pub tool_schemas: Vec<serde_json::Value>,
    pub thinking_budget_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(model: &ModelConfig, messages: Vec<ConversationMessage>, tools: &[ToolDefinition]) -> Self {
        Self {
            model: model.name.clone(),
            messages,
            tool_schemas: tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect(),
            thinking_budget_tokens: model.thinking_budget_tokens,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub message: ConversationMessage,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The 8 LLM failure classes. These class names are
/// the contract: the agent's recovery policy dispatches on them, not on
/// provider-specific error text.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("api error: {0}")]
    ApiError(String),
    #[error("api connection error: {0}")]
    ApiConnection(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServer(String),
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether falling back to another model/provider is worth trying.
    /// Rate limits, connection trouble, and server-side failures all clear
    /// on a different provider; `BadRequest`/`NotFound` are about the
    /// request itself, but the request that's bad for one provider
    /// (an unknown model name, a field a provider rejects) can still
    /// succeed against the next candidate, so they're fallback-eligible too.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        true
    }

    /// Whether the request text names a `temperature` field, the shape
    /// `invoke_with_recovery` retries by dropping it.
    pub fn mentions_temperature(&self) -> bool {
        matches!(self, LlmError::BadRequest(msg) if msg.to_lowercase().contains("temperature"))
    }

    /// Whether the request text names `tool_call_id`s, the shape
    /// `invoke_with_recovery` retries after repairing history.
    pub fn mentions_tool_call_ids(&self) -> bool {
        matches!(self, LlmError::BadRequest(msg) if msg.to_lowercase().contains("tool_call_id"))
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}
