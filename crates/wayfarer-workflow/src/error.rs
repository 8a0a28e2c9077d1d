use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("project {0} is not in a state that allows this operation: {1}")]
    InvalidState(String, String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("planner produced unparseable output, falling back to a single-phase plan")]
    PlanParseFailed,

    #[error("conflict detected: {0}")]
    Conflict(String),

    #[error("worker agent failed: {0}")]
    AgentFailed(String),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::Serde(e.to_string())
    }
}

impl From<serde_yaml::Error> for WorkflowError {
    fn from(e: serde_yaml::Error) -> Self {
        WorkflowError::Serde(e.to_string())
    }
}
