use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// Structured, serializable error type for the agent crate.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentError {
    #[error("model exhausted all fallback candidates: {last_error}")]
    AllModelsExhausted { last_error: String },

    #[error("turn budget exceeded")]
    BudgetExceeded,

    #[error("circuit open for service: {service}")]
    CircuitOpen { service: String },

    #[error("tool call approval required but no approver configured")]
    ApprovalRequiredButNoApprover,

    #[error("tool call {tool_call_id} was denied")]
    ToolCallDenied { tool_call_id: String },

    #[error("max tool-loop iterations ({limit}) exceeded")]
    IterationLimitExceeded { limit: u32 },

    #[error("llm error: {0}")]
    Llm(LlmError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::Llm(e)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}

/// The friendly, class-routed strings surfaced to the user/caller instead
/// of a raw provider error — e.g. "the LLM provider is temporarily
/// unavailable" rather than an HTTP status leaking through.
pub fn friendly_message(error: &AgentError) -> String {
    match error {
        AgentError::Llm(LlmError::RateLimit(_)) => {
            "The assistant is receiving too many requests right now. Please try again shortly.".to_string()
        }
        AgentError::Llm(LlmError::ApiConnection(_)) | AgentError::Llm(LlmError::ServiceUnavailable(_)) => {
            "The assistant's language model is temporarily unavailable.".to_string()
        }
        AgentError::Llm(LlmError::BadRequest(_)) => {
            "The assistant could not process that request.".to_string()
        }
        AgentError::Llm(LlmError::NotFound(_)) => {
            "The requested model or resource could not be found.".to_string()
        }
        AgentError::Llm(LlmError::InternalServer(_)) | AgentError::Llm(LlmError::ApiError(_)) => {
            "The assistant's language model reported an internal error.".to_string()
        }
        AgentError::CircuitOpen { .. } => {
            "The assistant is temporarily pausing requests to this service after repeated failures.".to_string()
        }
        AgentError::AllModelsExhausted { .. } => {
            "The assistant could not complete this request after trying all available models.".to_string()
        }
        AgentError::BudgetExceeded => {
            "This project has exhausted its budget for this turn.".to_string()
        }
        AgentError::ApprovalRequiredButNoApprover => {
            "This action requires approval, but no approver is configured.".to_string()
        }
        AgentError::ToolCallDenied { .. } => "The requested action was not approved.".to_string(),
        AgentError::IterationLimitExceeded { .. } => {
            "The assistant stopped after reaching its step limit for this turn.".to_string()
        }
        AgentError::Llm(LlmError::Other(_)) | AgentError::Serialization(_) | AgentError::Internal(_) => {
            "Something went wrong while processing this request.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_gets_a_friendly_retry_message() {
        let err = AgentError::Llm(LlmError::RateLimit("429".to_string()));
        assert!(friendly_message(&err).contains("too many requests"));
    }

    #[test]
    fn bad_request_does_not_leak_raw_provider_text() {
        let err = AgentError::Llm(LlmError::BadRequest("invalid schema field xyz".to_string()));
        assert!(!friendly_message(&err).contains("xyz"));
    }

    #[test]
    fn agent_error_serde_round_trip() {
        let original = AgentError::CircuitOpen {
            service: "primary-llm".to_string(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let restored: AgentError = serde_json::from_str(&json).unwrap();
        assert_eq!(original.to_string(), restored.to_string());
    }
}
