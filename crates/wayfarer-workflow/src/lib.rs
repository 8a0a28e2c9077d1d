//! Event-sourced workflow engine: projects move through a state machine
//! of phases and tasks, durable per-project file state backs every
//! transition, and a bounded worker pool executes tasks through
//! sub-agents scoped to an allowlist of tools.

mod backend;
mod error;
mod events;
mod models;
mod orchestrator;
mod registry_markdown;
mod store;
mod worker;

pub use backend::FileWorkflowBackend;
pub use error::WorkflowError;
pub use events::{
    apply_event, WorkflowEvent, ALL_EVENT_TYPES, BUDGET_EXHAUSTED, BUDGET_RECORDED_CALL, BUDGET_WARNING, CONFLICT_DETECTED,
    CONFLICT_RECONCILED, PHASE_COMPLETED, PHASE_FAILED, PHASE_STARTED, PLAN_WRITTEN, PROJECT_ADVANCED, PROJECT_CREATED, PROJECT_STEERED,
    PROJECT_TRANSITIONED, TASK_COMPLETED, TASK_DISPATCHED, TASK_FAILED, TERMINAL_CONDITION_EVALUATED,
};
pub use models::{
    compute_plan_hash, is_terminal, validate_transition, Artifact, Budget, Criterion, JournalEntry, Phase, PhaseStatus, Project,
    ProjectStatus, TaskSpec, TerminalCondition,
};
pub use orchestrator::Orchestrator;
pub use registry_markdown::{map_status, parse as parse_registry_markdown, render_full as render_registry_markdown, Frontmatter, ParsedRegistry};
pub use store::ProjectStore;
pub use worker::{WorkerPool, WorkerResult};
