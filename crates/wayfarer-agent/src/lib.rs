//! Tool-calling agent loop: history repair, approval gating, model
//! selection, recovery/fallback, and the advisor/hook pipeline.

mod advisor;
mod agent;
mod circuit_breaker;
mod config;
mod error;
mod llm;
mod message;
mod model_selector;
mod tool;

pub use advisor::{gather_advice, Advisor, Hook, HookPool, MemoryExtractionHook, ToolMetricsHook};
pub use agent::Agent;
pub use config::{AgentConfig, ModelCatalogConfig, RecoveryConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
pub use error::{friendly_message, AgentError};
pub use llm::{LlmClient, LlmError, LlmRequest, LlmResponse};
pub use message::{sanitize_history, strip_tool_call_metadata, trim_history, ConversationMessage, Role, ToolCall};
pub use model_selector::{
    load_settings, save_settings, ModelConfig, ModelSelector, PersistedSettings, TaskSignals, ThinkingLevel,
};
pub use tool::{invoke_tool, unknown_tool_result, Permission, ToolDefinition, ToolError, ToolHandler};
