use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// `permission ∈ {read, write, send, admin}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Send,
    Admin,
}

/// Failures a tool handler may raise. `Connection`, `Timeout`,
/// and `Io` are the transient kinds the wrapper retries; everything else
/// becomes a permanent `Error: ...` result on the first failure.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timeout")]
    Timeout,
    #[error("io error: {0}")]
    Io(String),
    #[error("{0}")]
    Other(String),
}

impl ToolError {
    fn is_transient(&self) -> bool {
        matches!(self, ToolError::Connection(_) | ToolError::Timeout | ToolError::Io(_))
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: serde_json::Value) -> Result<String, ToolError>;
}

/// A callable the agent may invoke.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub permission: Permission,
    pub requires_approval_override: Option<bool>,
    pub handler: Arc<dyn ToolHandler>,
    pub max_attempts: u32,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        permission: Permission,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            permission,
            requires_approval_override: None,
            handler,
            max_attempts: 3,
        }
    }

    pub fn require_approval(mut self, required: bool) -> Self {
        self.requires_approval_override = Some(required);
        self
    }

    /// Explicit override if set; else true for write/send/admin
    /// permissions.
    pub fn requires_approval(&self) -> bool {
        self.requires_approval_override
            .unwrap_or(matches!(self.permission, Permission::Write | Permission::Send | Permission::Admin))
    }
}

/// Invoke a tool with exponential-backoff retry on transient failures
///. Never returns an error: permanent failures become
/// the string contract `Error: <name> failed: <message>` so the LLM can
/// narrate the outcome instead of the loop unwinding.
pub async fn invoke_tool(tool: &ToolDefinition, arguments: serde_json::Value) -> String {
    let mut attempt: u32 = 1;
    loop {
        match tool.handler.call(arguments.clone()).await {
            Ok(result) => return result,
            Err(e) if e.is_transient() && attempt < tool.max_attempts => {
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return format!("Error: {} failed: {}", tool.name, e),
        }
    }
}

/// An unknown tool name is fed back to the LLM as a result string, not an error.
pub fn unknown_tool_result(name: &str) -> String {
    format!("Unknown tool: {name}")
}
