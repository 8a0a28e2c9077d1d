use std::sync::Arc;

use wayfarer_agent::LlmClient;
use wayfarer_core::Clock;

use crate::backend::FileWorkflowBackend;
use crate::error::WorkflowError;
use crate::events;
use crate::models::{Phase, PhaseStatus, Project, ProjectStatus, TerminalCondition};
use crate::registry_markdown;
use crate::store::ProjectStore;
use crate::worker::WorkerPool;

/// Budget-used thresholds that emit a `budget.warning` event, at most once
/// per phase.
const BUDGET_WARNING_THRESHOLDS: &[f64] = &[0.50, 0.80, 0.95];

fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

#[derive(Debug, serde::Deserialize)]
struct PlannedPhase {
    name: String,
    description: String,
    #[serde(default)]
    tasks: Vec<crate::models::TaskSpec>,
}

#[derive(Debug, serde::Deserialize)]
struct PlanResponse {
    phases: Vec<PlannedPhase>,
}

#[derive(Debug, serde::Deserialize)]
struct TerminalEvalResponse {
    met: bool,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    evidence: Vec<String>,
}

/// Drives a project through its full lifecycle: plan, await
/// approval, execute phase by phase through the worker pool, review, and
/// evaluate terminal conditions. Composes a [`ProjectStore`], the backend
/// it shares, a [`WorkerPool`], and the LLM clients used for planning,
/// terminal-condition evaluation, and cross-project review synthesis.
pub struct Orchestrator {
    store: Arc<ProjectStore>,
    backend: Arc<FileWorkflowBackend>,
    workers: Arc<WorkerPool>,
    planner: Arc<dyn LlmClient>,
    evaluator: Arc<dyn LlmClient>,
    reviewer: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ProjectStore>,
        workers: Arc<WorkerPool>,
        planner: Arc<dyn LlmClient>,
        evaluator: Arc<dyn LlmClient>,
        reviewer: Arc<dyn LlmClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let backend = Arc::clone(store.backend());
        Self {
            store,
            backend,
            workers,
            planner,
            evaluator,
            reviewer,
            clock,
        }
    }

    /// Create a project, ask the planner for a phase breakdown, write the
    /// plan, and transition to `AwaitingApproval`.
    /// A planner response that doesn't parse as the expected JSON shape
    /// falls back to a single catch-all phase rather than failing outright.
    pub async fn start_project(&self, goal: &str, budget: crate::models::Budget, tags: Vec<String>) -> Result<Project, WorkflowError> {
        let mut project = self.store.create(goal, tags, budget).await?;

        let prompt = format!(
            "Break this goal into phases with concrete tasks. Respond with JSON: \
             {{\"phases\": [{{\"name\": str, \"description\": str, \"tasks\": [{{\"id\": str, \"description\": str}}]}}]}}.\n\nGoal: {goal}"
        );
        let plan_text = self.complete_text(&self.planner, &prompt).await;
        let phases = match plan_text.as_deref().map(strip_markdown_fence).map(serde_json::from_str::<PlanResponse>) {
            Some(Ok(parsed)) => parsed
                .phases
                .into_iter()
                .enumerate()
                .map(|(i, p)| {
                    let mut phase = Phase::new(format!("phase-{}", i + 1), p.name, p.description);
                    phase.tasks = p.tasks;
                    phase
                })
                .collect(),
            _ => {
                let mut phase = Phase::new("phase-1", "Execute", goal);
                phase.tasks = vec![crate::models::TaskSpec::new("task-001", goal)];
                vec![phase]
            }
        };

        project.phases = phases;
        project.plan_hash = Some(crate::models::compute_plan_hash(&project.phases, &project.terminal_conditions));
        self.backend.save_plan(&project.id, &project)?;
        self.backend
            .append_event(
                &project.id,
                events::PLAN_WRITTEN,
                "orchestrator",
                serde_json::json!({"plan_hash": project.plan_hash}),
            )
            .await?;
        self.store.update(&mut project)?;

        self.store.transition(&project.id, ProjectStatus::AwaitingApproval, "orchestrator").await
    }

    async fn complete_text(&self, client: &Arc<dyn LlmClient>, prompt: &str) -> Option<String> {
        let request = wayfarer_agent::LlmRequest {
            model: "planner".to_string(),
            messages: vec![wayfarer_agent::ConversationMessage::user(prompt)],
            tool_schemas: Vec::new(),
            thinking_budget_tokens: None,
            temperature: None,
        };
        client.complete(request).await.ok().map(|r| r.message.content)
    }

    /// Validate `AwaitingApproval`, transition to `Executing`, and run every
    /// incomplete phase's tasks through the worker pool in order. Stops
    /// and transitions `Paused` the moment the
    /// budget is exhausted; stops and transitions `Failed` the moment a
    /// task exhausts its retries.
    pub async fn approve_and_execute(&self, project_id: &str) -> Result<Project, WorkflowError> {
        let mut project = self.store.transition(project_id, ProjectStatus::Executing, "orchestrator").await?;

        for phase_index in 0..project.phases.len() {
            if matches!(project.phases[phase_index].status, PhaseStatus::Completed | PhaseStatus::Skipped) {
                continue;
            }

            if project.budget.exhausted(self.clock.now_unix()) {
                self.backend
                    .append_event(&project.id, events::BUDGET_EXHAUSTED, "orchestrator", serde_json::json!({}))
                    .await?;
                self.store.append_journal(&mut project, "paused: budget exhausted");
                self.store.update(&mut project)?;
                return self.store.transition(&project.id, ProjectStatus::Paused, "orchestrator").await;
            }

            let phase_id = project.phases[phase_index].id.clone();
            project.phases[phase_index].status = PhaseStatus::Active;
            project.phases[phase_index].started_at = Some(self.clock.now_unix());
            self.backend
                .append_event(&project.id, events::PHASE_STARTED, "orchestrator", serde_json::json!({"phase_id": phase_id}))
                .await?;
            self.store.update(&mut project)?;

            let mut warned: Vec<f64> = Vec::new();
            let tasks = project.phases[phase_index].tasks.clone();
            for task in &tasks {
                let mut attempt = 1;
                let result = loop {
                    let phase_snapshot = project.phases[phase_index].clone();
                    let result = self.workers.spawn_worker(&project, &phase_snapshot, task, attempt).await;
                    project.budget.record_call(0.0);
                    self.backend
                        .append_event(
                            &project.id,
                            events::BUDGET_RECORDED_CALL,
                            "orchestrator",
                            serde_json::json!({"cost_usd": 0.0}),
                        )
                        .await?;

                    let used = 1.0 - project.budget.remaining_fraction(self.clock.now_unix());
                    for threshold in BUDGET_WARNING_THRESHOLDS {
                        if used >= *threshold && !warned.contains(threshold) {
                            warned.push(*threshold);
                            self.backend
                                .append_event(
                                    &project.id,
                                    events::BUDGET_WARNING,
                                    "orchestrator",
                                    serde_json::json!({"threshold": format!("{}%", (*threshold * 100.0).round() as i64)}),
                                )
                                .await?;
                        }
                    }

                    if result.success || !result.retryable {
                        break result;
                    }
                    attempt += 1;
                };

                if !result.success {
                    project.phases[phase_index].status = PhaseStatus::Failed;
                    self.backend
                        .append_event(
                            &project.id,
                            events::PHASE_FAILED,
                            "orchestrator",
                            serde_json::json!({"phase_id": phase_id, "task_id": task.id}),
                        )
                        .await?;
                    self.store.update(&mut project)?;
                    return self.store.transition(&project.id, ProjectStatus::Failed, "orchestrator").await;
                }
            }

            project.phases[phase_index].status = PhaseStatus::Completed;
            project.phases[phase_index].completed_at = Some(self.clock.now_unix());
            self.backend
                .append_event(&project.id, events::PHASE_COMPLETED, "orchestrator", serde_json::json!({"phase_id": phase_id}))
                .await?;
            self.store.update(&mut project)?;
        }

        let mut project = self.store.transition(&project.id, ProjectStatus::Reviewing, "orchestrator").await?;
        let all_met = self.evaluate_terminal_conditions(&project).await?;
        if all_met {
            project = self.store.transition(&project.id, ProjectStatus::Done, "orchestrator").await?;
        }
        Ok(project)
    }

    /// Evaluate every configured terminal condition. A condition with no
    /// handler beyond recording its evaluation (`check_fn`) is
    /// conservatively unmet.
    async fn evaluate_terminal_conditions(&self, project: &Project) -> Result<bool, WorkflowError> {
        if project.terminal_conditions.is_empty() {
            return Ok(true);
        }
        let mut all_met = true;
        for condition in &project.terminal_conditions {
            let met = match condition {
                TerminalCondition::ArtifactExists { name } => project.artifacts.iter().any(|a| &a.name == name),
                TerminalCondition::PhaseCount { min_completed } => match min_completed {
                    Some(min) => project.completed_phase_count() >= *min,
                    None => true,
                },
                TerminalCondition::LlmEval { criteria } => self.evaluate_llm_criteria(project, criteria).await,
                TerminalCondition::CheckFn { .. } => false,
            };
            all_met &= met;
            self.backend
                .append_event(
                    &project.id,
                    events::TERMINAL_CONDITION_EVALUATED,
                    "orchestrator",
                    serde_json::json!({"condition": condition, "met": met}),
                )
                .await?;
        }
        Ok(all_met)
    }

    async fn evaluate_llm_criteria(&self, project: &Project, criteria: &str) -> bool {
        let prompt = format!(
            "Goal: {}\n\nCriteria: {criteria}\n\nRespond with JSON: {{\"met\": bool, \"rationale\": str, \"evidence\": [str]}}",
            project.goal
        );
        match self.complete_text(&self.evaluator, &prompt).await {
            Some(text) => serde_json::from_str::<TerminalEvalResponse>(strip_markdown_fence(&text))
                .map(|r| r.met)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Record steering guidance without interrupting in-flight work (spec
    /// §4.7 "steer"): the next phase/task dispatch picks it up, but nothing
    /// currently running is cancelled.
    pub async fn steer(&self, project_id: &str, direction: &str) -> Result<Project, WorkflowError> {
        let mut project = self.store.get(project_id).await?.ok_or_else(|| WorkflowError::ProjectNotFound(project_id.to_string()))?;
        self.store.append_journal(&mut project, format!("steered: {direction}"));
        self.backend
            .append_event(project_id, events::PROJECT_STEERED, "user", serde_json::json!({"direction": direction}))
            .await?;
        self.store.update(&mut project)?;
        Ok(project)
    }

    /// Branch on status: `Done`/`Reviewing` plans one
    /// new phase from `directive` and executes it; `Paused` resumes
    /// execution, optionally steering first; `Executing` only records
    /// steering since work is already in flight; anything else is rejected.
    pub async fn advance(&self, project_id: &str, directive: &str) -> Result<Project, WorkflowError> {
        let project = self.store.get(project_id).await?.ok_or_else(|| WorkflowError::ProjectNotFound(project_id.to_string()))?;
        match project.status {
            ProjectStatus::Done | ProjectStatus::Reviewing => {
                let mut project = project;
                let next_index = project.phases.len() + 1;
                let mut phase = Phase::new(format!("phase-{next_index}"), "Follow-up", directive);
                phase.tasks = vec![crate::models::TaskSpec::new(format!("task-{next_index:03}"), directive)];
                project.phases.push(phase);
                project.plan_hash = Some(crate::models::compute_plan_hash(&project.phases, &project.terminal_conditions));
                self.backend.save_plan(&project.id, &project)?;
                self.store.update(&mut project)?;
                self.backend
                    .append_event(project_id, events::PROJECT_ADVANCED, "orchestrator", serde_json::json!({"directive": directive}))
                    .await?;
                let _ = self.store.transition(project_id, ProjectStatus::AwaitingApproval, "orchestrator").await?;
                self.approve_and_execute(project_id).await
            }
            ProjectStatus::Paused => {
                self.steer(project_id, directive).await?;
                self.approve_and_execute(project_id).await
            }
            ProjectStatus::Executing => self.steer(project_id, directive).await,
            other => Err(WorkflowError::InvalidState(project_id.to_string(), format!("cannot advance from {other:?}"))),
        }
    }

    /// Reconcile a registry markdown edit against the canonical checkpoint
    ///. `accept_registry = true` rewrites the
    /// checkpoint's status from the registry's frontmatter; `false`
    /// re-renders the registry from the checkpoint, discarding the edit.
    pub async fn reconcile(&self, project_id: &str, registry_path: &std::path::Path, accept_registry: bool) -> Result<Project, WorkflowError> {
        let mut project = self.store.get(project_id).await?.ok_or_else(|| WorkflowError::ProjectNotFound(project_id.to_string()))?;
        let Some(conflict) = self.backend.detect_conflict(&project, registry_path)? else {
            return Ok(project);
        };
        self.backend
            .append_event(project_id, events::CONFLICT_DETECTED, "orchestrator", serde_json::json!({"reason": conflict}))
            .await?;

        if !matches!(project.status, ProjectStatus::Paused | ProjectStatus::Done | ProjectStatus::Cancelled) {
            project.status = ProjectStatus::Paused;
            self.store.append_journal(&mut project, format!("conflict detected; reconcile required: {conflict}"));
        }

        if accept_registry {
            let body = std::fs::read_to_string(registry_path)?;
            if let Some(parsed) = registry_markdown::parse(&body) {
                if let Some(raw_status) = parsed.frontmatter.status {
                    let new_status = registry_markdown::map_status(&raw_status);
                    if crate::models::validate_transition(project.status, new_status).is_ok() {
                        project.status = new_status;
                    }
                }
            }
        } else {
            let now = time::OffsetDateTime::from_unix_timestamp(self.clock.now_unix())
                .map(|t| t.to_string())
                .unwrap_or_default();
            let rendered = registry_markdown::render_full(&project, &now, &now);
            std::fs::write(registry_path, rendered)?;
        }

        self.backend
            .append_event(project_id, events::CONFLICT_RECONCILED, "orchestrator", serde_json::json!({"accept_registry": accept_registry}))
            .await?;
        self.store.update(&mut project)?;
        Ok(project)
    }

    /// Gather projects matching `tags`, assemble their goals/journals as
    /// context, and ask the reviewer model to synthesize an answer to
    /// `query` across them.
    pub async fn review_projects(&self, query: &str, tags: &[String]) -> Result<String, WorkflowError> {
        let mut projects = self.store.list_projects(None, None, None).await?;
        if !tags.is_empty() {
            projects.retain(|p| tags.iter().any(|t| p.tags.contains(t)));
        }

        let mut context = String::new();
        for project in &projects {
            context.push_str(&format!("- {} ({:?}): {}\n", project.id, project.status, project.goal));
            for entry in project.journal.iter().rev().take(3) {
                context.push_str(&format!("    {}\n", entry.text));
            }
        }

        let prompt = format!("Projects:\n{context}\nQuestion: {query}");
        Ok(self.complete_text(&self.reviewer, &prompt).await.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wayfarer_agent::{LlmError, LlmRequest, LlmResponse};
    use wayfarer_core::FakeClock;

    struct ScriptedLlm {
        text: String,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                message: wayfarer_agent::ConversationMessage::assistant(self.text.clone()),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
    }

    fn orchestrator(plan_json: &str) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
        let store = Arc::new(ProjectStore::new(dir.path().join("state"), None, Arc::clone(&clock)));
        let backend = Arc::clone(store.backend());
        let model_selector = Arc::new(wayfarer_agent::ModelSelector::new(
            wayfarer_agent::ModelConfig::new("light-1", "acme"),
            wayfarer_agent::ModelConfig::new("heavy-1", "acme").heavy(),
            wayfarer_agent::ModelConfig::new("thinking-1", "acme").thinking(1000),
            Arc::clone(&clock),
        ));
        let worker_llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm {
            text: "all done".to_string(),
        });
        let workers = Arc::new(WorkerPool::new(vec![], model_selector, vec![worker_llm], Arc::clone(&backend), Arc::clone(&clock), 3));
        let planner: Arc<dyn LlmClient> = Arc::new(ScriptedLlm {
            text: plan_json.to_string(),
        });
        let evaluator: Arc<dyn LlmClient> = Arc::new(ScriptedLlm {
            text: "{\"met\": true, \"rationale\": \"ok\", \"evidence\": []}".to_string(),
        });
        let reviewer: Arc<dyn LlmClient> = Arc::new(ScriptedLlm {
            text: "summary".to_string(),
        });
        (Orchestrator::new(store, workers, planner, evaluator, reviewer, clock), dir)
    }

    #[tokio::test]
    async fn start_project_parses_planner_json_into_phases() {
        let (orch, _dir) = orchestrator(
            "```json\n{\"phases\": [{\"name\": \"Draft\", \"description\": \"write it\", \"tasks\": [{\"id\": \"task-001\", \"description\": \"draft\"}]}]}\n```",
        );
        let project = orch.start_project("Ship the thing", crate::models::Budget::new(0.0, 0, 1_000), vec![]).await.unwrap();
        assert_eq!(project.status, ProjectStatus::AwaitingApproval);
        assert_eq!(project.phases.len(), 1);
        assert_eq!(project.phases[0].name, "Draft");
    }

    #[tokio::test]
    async fn unparseable_plan_falls_back_to_single_phase() {
        let (orch, _dir) = orchestrator("not json at all");
        let project = orch.start_project("Ship the thing", crate::models::Budget::new(0.0, 0, 1_000), vec![]).await.unwrap();
        assert_eq!(project.phases.len(), 1);
        assert_eq!(project.phases[0].id, "phase-1");
    }

    #[tokio::test]
    async fn approve_and_execute_runs_phases_to_done() {
        let (orch, _dir) = orchestrator(
            "{\"phases\": [{\"name\": \"Draft\", \"description\": \"write it\", \"tasks\": [{\"id\": \"task-001\", \"description\": \"draft\"}]}]}",
        );
        let project = orch.start_project("Ship the thing", crate::models::Budget::new(0.0, 0, 1_000), vec![]).await.unwrap();
        let finished = orch.approve_and_execute(&project.id).await.unwrap();
        assert_eq!(finished.status, ProjectStatus::Done);
        assert_eq!(finished.phases[0].status, PhaseStatus::Completed);
    }
}
