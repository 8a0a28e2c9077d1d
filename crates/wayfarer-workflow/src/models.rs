use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wayfarer_core::hash::fingerprint;

use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    AwaitingApproval,
    Executing,
    Reviewing,
    Paused,
    Done,
    Failed,
    Cancelled,
}

/// The only status with no outgoing transitions. `Done` and
/// `Failed` both allow `advance`/re-planning back into `Planning`, so they
/// are not terminal in this sense even though they read that way.
pub fn is_terminal(status: ProjectStatus) -> bool {
    status == ProjectStatus::Cancelled
}

fn allowed_targets(from: ProjectStatus) -> &'static [ProjectStatus] {
    use ProjectStatus::*;
    match from {
        Planning => &[AwaitingApproval, Failed, Cancelled],
        AwaitingApproval => &[Executing, Planning, Failed, Cancelled],
        Executing => &[Reviewing, Paused, Failed, Cancelled],
        Reviewing => &[Done, Planning, Paused, Failed, Cancelled],
        Paused => &[Executing, Planning, Failed, Cancelled],
        Done => &[Planning],
        Failed => &[Planning, Cancelled],
        Cancelled => &[],
    }
}

pub fn validate_transition(from: ProjectStatus, to: ProjectStatus) -> Result<(), WorkflowError> {
    if allowed_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub description: String,
    pub met: bool,
}

impl Criterion {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            met: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_max_attempts() -> u32 {
    1
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            allowed_tools: Vec::new(),
            inputs: HashMap::new(),
            expected_outputs: Vec::new(),
            max_attempts: 1,
            timeout_secs: 0,
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub entry_criteria: Vec<Criterion>,
    #[serde(default)]
    pub exit_criteria: Vec<Criterion>,
    pub tasks: Vec<TaskSpec>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Phase {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            status: PhaseStatus::Pending,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            tasks: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalCondition {
    ArtifactExists { name: String },
    PhaseCount { min_completed: Option<usize> },
    LlmEval { criteria: String },
    CheckFn { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub max_cost_usd: f64,
    pub max_llm_calls: u64,
    pub max_wall_seconds: u64,
    pub total_cost_usd: f64,
    pub total_calls: u64,
    pub started_at_unix: i64,
}

impl Budget {
    pub fn new(max_cost_usd: f64, max_llm_calls: u64, started_at_unix: i64) -> Self {
        Self {
            max_cost_usd,
            max_llm_calls,
            max_wall_seconds: 0,
            total_cost_usd: 0.0,
            total_calls: 0,
            started_at_unix,
        }
    }

    pub fn record_call(&mut self, cost_usd: f64) {
        self.total_cost_usd += cost_usd;
        self.total_calls += 1;
    }

    pub fn exhausted(&self, now_unix: i64) -> bool {
        if self.max_cost_usd > 0.0 && self.total_cost_usd >= self.max_cost_usd {
            return true;
        }
        if self.max_llm_calls > 0 && self.total_calls >= self.max_llm_calls {
            return true;
        }
        if self.max_wall_seconds > 0 && (now_unix - self.started_at_unix) as u64 >= self.max_wall_seconds {
            return true;
        }
        false
    }

    /// Minimum remaining ratio across all configured dimensions, used for
    /// the 50/80/95%-used warning thresholds. A dimension with
    /// no cap (0) does not constrain the ratio.
    pub fn remaining_fraction(&self, now_unix: i64) -> f64 {
        let mut fractions = Vec::new();
        if self.max_cost_usd > 0.0 {
            fractions.push((1.0 - self.total_cost_usd / self.max_cost_usd).max(0.0));
        }
        if self.max_llm_calls > 0 {
            fractions.push((1.0 - self.total_calls as f64 / self.max_llm_calls as f64).max(0.0));
        }
        if self.max_wall_seconds > 0 {
            let elapsed = (now_unix - self.started_at_unix).max(0) as f64;
            fractions.push((1.0 - elapsed / self.max_wall_seconds as f64).max(0.0));
        }
        fractions.into_iter().fold(1.0, f64::min)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub mime_type: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at_unix: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub goal: String,
    pub status: ProjectStatus,
    pub phases: Vec<Phase>,
    pub terminal_conditions: Vec<TerminalCondition>,
    pub journal: Vec<JournalEntry>,
    pub artifacts: Vec<Artifact>,
    pub budget: Budget,
    pub plan_hash: Option<String>,
    pub last_event_seq: u64,
    pub tags: Vec<String>,
    pub workspace_dir: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub cancel_requested_at: Option<i64>,
    pub last_orchestrator_update_at: Option<i64>,
}

impl Project {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, workspace_dir: impl Into<String>, budget: Budget, now_unix: i64) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            status: ProjectStatus::Planning,
            phases: Vec::new(),
            terminal_conditions: Vec::new(),
            journal: Vec::new(),
            artifacts: Vec::new(),
            budget,
            plan_hash: None,
            last_event_seq: 0,
            tags: Vec::new(),
            workspace_dir: workspace_dir.into(),
            created_at: now_unix,
            updated_at: now_unix,
            started_at: None,
            cancel_requested_at: None,
            last_orchestrator_update_at: None,
        }
    }

    pub fn completed_phase_count(&self) -> usize {
        self.phases.iter().filter(|p| p.status == PhaseStatus::Completed).count()
    }
}

/// Canonical, hashable view of a plan:
/// phases and terminal conditions only, with stable key ordering from
/// `serde_json`'s `preserve_order` feature disabled here in favour of the
/// fingerprint function's own canonicalization.
#[derive(Debug, Clone, Serialize)]
struct CanonicalPlan<'a> {
    phases: Vec<CanonicalPhase<'a>>,
    terminal_conditions: &'a [TerminalCondition],
}

#[derive(Debug, Clone, Serialize)]
struct CanonicalPhase<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    entry_criteria: Vec<&'a str>,
    exit_criteria: Vec<&'a str>,
    tasks: Vec<CanonicalTask<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct CanonicalTask<'a> {
    id: &'a str,
    description: &'a str,
    allowed_tools: &'a [String],
}

pub fn compute_plan_hash(phases: &[Phase], terminal_conditions: &[TerminalCondition]) -> String {
    let canonical = CanonicalPlan {
        phases: phases
            .iter()
            .map(|p| CanonicalPhase {
                id: &p.id,
                name: &p.name,
                description: &p.description,
                entry_criteria: p.entry_criteria.iter().map(|c| c.description.as_str()).collect(),
                exit_criteria: p.exit_criteria.iter().map(|c| c.description.as_str()).collect(),
                tasks: p
                    .tasks
                    .iter()
                    .map(|t| CanonicalTask {
                        id: &t.id,
                        description: &t.description,
                        allowed_tools: &t.allowed_tools,
                    })
                    .collect(),
            })
            .collect(),
        terminal_conditions,
    };
    let value = serde_json::to_value(&canonical).expect("canonical plan is always serializable");
    fingerprint(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_allows_awaiting_approval_but_not_executing() {
        assert!(validate_transition(ProjectStatus::Planning, ProjectStatus::AwaitingApproval).is_ok());
        assert!(validate_transition(ProjectStatus::Planning, ProjectStatus::Executing).is_err());
    }

    #[test]
    fn cancelled_has_no_outgoing_transitions() {
        assert!(allowed_targets(ProjectStatus::Cancelled).is_empty());
        assert!(is_terminal(ProjectStatus::Cancelled));
    }

    #[test]
    fn done_is_not_terminal_and_can_replan() {
        assert!(!is_terminal(ProjectStatus::Done));
        assert!(validate_transition(ProjectStatus::Done, ProjectStatus::Planning).is_ok());
    }

    #[test]
    fn plan_hash_is_stable_across_equivalent_orderings_of_unrelated_fields() {
        let mut phase = Phase::new("phase-1", "Name", "Description");
        phase.tasks.push(TaskSpec::new("task-001", "Do the thing"));
        let a = compute_plan_hash(&[phase.clone()], &[]);
        // started_at/completed_at/status changes must not affect the hash.
        phase.status = PhaseStatus::Completed;
        phase.started_at = Some(123);
        let b = compute_plan_hash(&[phase], &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn plan_hash_changes_with_task_content() {
        let mut phase_a = Phase::new("phase-1", "Name", "Description");
        phase_a.tasks.push(TaskSpec::new("task-001", "Do the thing"));
        let mut phase_b = Phase::new("phase-1", "Name", "Description");
        phase_b.tasks.push(TaskSpec::new("task-001", "Do a different thing"));
        assert_ne!(compute_plan_hash(&[phase_a], &[]), compute_plan_hash(&[phase_b], &[]));
    }

    #[test]
    fn budget_exhausted_when_cost_cap_reached() {
        let mut budget = Budget::new(0.01, 0, 0);
        assert!(!budget.exhausted(0));
        budget.record_call(0.01);
        assert!(budget.exhausted(0));
    }

    #[test]
    fn budget_remaining_fraction_is_minimum_across_dimensions() {
        let mut budget = Budget::new(1.0, 10, 0);
        budget.record_call(0.8);
        for _ in 0..2 {
            budget.record_call(0.0);
        }
        // cost: 1 - 0.8/1.0 = 0.2; calls: 1 - 3/10 = 0.7 -> min is cost's 0.2.
        assert!((budget.remaining_fraction(0) - 0.2).abs() < 1e-9);
    }
}
