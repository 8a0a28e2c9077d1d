use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use wayfarer_agent::{Agent, ConversationMessage, LlmClient, ModelSelector, ToolDefinition};
use wayfarer_core::Clock;

use crate::backend::FileWorkflowBackend;
use crate::events;
use crate::models::{Phase, Project, TaskSpec};

#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub worker_id: String,
    pub task_id: String,
    pub response: String,
    pub tool_call_count: usize,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub llm_calls: u32,
    pub retryable: bool,
}

/// Empty allowlist means no restriction: every tool is available (spec
/// §4.8 step 4).
fn filter_tools_by_allowlist(tools: &[Arc<ToolDefinition>], allowed_names: &[String]) -> Vec<Arc<ToolDefinition>> {
    if allowed_names.is_empty() {
        return tools.to_vec();
    }
    tools
        .iter()
        .filter(|t| allowed_names.iter().any(|name| name == &t.name))
        .cloned()
        .collect()
}

fn worker_prompt(task: &TaskSpec) -> String {
    let mut prompt = format!("Task: {}\n\n", task.description);
    if !task.inputs.is_empty() {
        prompt.push_str("Inputs:\n");
        for (k, v) in &task.inputs {
            prompt.push_str(&format!("- {k}: {v}\n"));
        }
        prompt.push('\n');
    }
    if !task.expected_outputs.is_empty() {
        prompt.push_str("Expected outputs:\n");
        for output in &task.expected_outputs {
            prompt.push_str(&format!("- {output}\n"));
        }
    }
    prompt
}

/// Executes one [`TaskSpec`] by spinning up a fresh [`Agent`] scoped to
/// its allowlisted tools. Bounded by `max_concurrent` via a
/// semaphore shared across every dispatched worker.
pub struct WorkerPool {
    all_tools: Vec<Arc<ToolDefinition>>,
    model_selector: Arc<ModelSelector>,
    llm_candidates: Vec<Arc<dyn LlmClient>>,
    backend: Arc<FileWorkflowBackend>,
    semaphore: Arc<Semaphore>,
    clock: Arc<dyn Clock>,
    handles: Mutex<HashMap<String, JoinHandle<WorkerResult>>>,
}

impl WorkerPool {
    pub fn new(
        all_tools: Vec<Arc<ToolDefinition>>,
        model_selector: Arc<ModelSelector>,
        llm_candidates: Vec<Arc<dyn LlmClient>>,
        backend: Arc<FileWorkflowBackend>,
        clock: Arc<dyn Clock>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            all_tools,
            model_selector,
            llm_candidates,
            backend,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            clock,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Run one task to completion, bounded by the shared semaphore. Never
    /// returns an error: every failure mode (pre-check, timeout, panic
    /// inside the sub-agent) becomes a failed [`WorkerResult`] instead
    ///.
    pub async fn spawn_worker(&self, project: &Project, phase: &Phase, task: &TaskSpec, attempt: u32) -> WorkerResult {
        let worker_id = format!("{}-{}-{}", project.id, task.id, attempt);

        if project.budget.exhausted(self.clock.now_unix()) {
            return WorkerResult {
                worker_id,
                task_id: task.id.clone(),
                response: String::new(),
                tool_call_count: 0,
                duration_ms: 0,
                success: false,
                error: Some("budget exhausted".to_string()),
                llm_calls: 0,
                retryable: false,
            };
        }
        use crate::models::ProjectStatus::{Cancelled, Paused};
        if matches!(project.status, Paused | Cancelled) {
            return WorkerResult {
                worker_id,
                task_id: task.id.clone(),
                response: String::new(),
                tool_call_count: 0,
                duration_ms: 0,
                success: false,
                error: Some(format!("project is {:?}, refusing to spawn", project.status)),
                llm_calls: 0,
                retryable: false,
            };
        }

        let _ = self
            .backend
            .append_event(
                &project.id,
                events::TASK_DISPATCHED,
                "worker-pool",
                serde_json::json!({"phase_id": phase.id, "task_id": task.id, "worker_id": worker_id}),
            )
            .await;

        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return WorkerResult {
                worker_id,
                task_id: task.id.clone(),
                response: String::new(),
                tool_call_count: 0,
                duration_ms: 0,
                success: false,
                error: Some("worker pool semaphore closed".to_string()),
                llm_calls: 0,
                retryable: attempt < task.max_attempts,
            };
        };

        let started = self.clock.now_unix();
        let run = self.run_task(task, project.budget.clone(), started);
        let outcome = if task.timeout_secs > 0 {
            match tokio::time::timeout(Duration::from_secs(task.timeout_secs), run).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = self
                        .backend
                        .append_event(
                            &project.id,
                            events::TASK_FAILED,
                            "worker-pool",
                            serde_json::json!({
                                "phase_id": phase.id, "task_id": task.id, "worker_id": worker_id,
                                "attempt": attempt, "error": "timeout", "retryable": attempt < task.max_attempts,
                            }),
                        )
                        .await;
                    return WorkerResult {
                        worker_id,
                        task_id: task.id.clone(),
                        response: String::new(),
                        tool_call_count: 0,
                        duration_ms: ((self.clock.now_unix() - started).max(0) * 1000) as u64,
                        success: false,
                        error: Some("timed out".to_string()),
                        llm_calls: 0,
                        retryable: attempt < task.max_attempts,
                    };
                }
            }
        } else {
            run.await
        };

        let duration_ms = ((self.clock.now_unix() - started).max(0) * 1000) as u64;

        match outcome {
            Ok((response, tool_call_count)) => {
                let llm_calls = 1;
                let _ = self
                    .backend
                    .append_event(
                        &project.id,
                        events::TASK_COMPLETED,
                        "worker-pool",
                        serde_json::json!({
                            "phase_id": phase.id, "task_id": task.id, "worker_id": worker_id,
                            "attempt": attempt, "duration_ms": duration_ms,
                        }),
                    )
                    .await;
                WorkerResult {
                    worker_id,
                    task_id: task.id.clone(),
                    response,
                    tool_call_count,
                    duration_ms,
                    success: true,
                    error: None,
                    llm_calls,
                    retryable: false,
                }
            }
            Err(e) => {
                let retryable = attempt < task.max_attempts;
                let _ = self
                    .backend
                    .append_event(
                        &project.id,
                        events::TASK_FAILED,
                        "worker-pool",
                        serde_json::json!({
                            "phase_id": phase.id, "task_id": task.id, "worker_id": worker_id,
                            "attempt": attempt, "error": e.to_string(), "retryable": retryable,
                        }),
                    )
                    .await;
                WorkerResult {
                    worker_id,
                    task_id: task.id.clone(),
                    response: String::new(),
                    tool_call_count: 0,
                    duration_ms,
                    success: false,
                    error: Some(e.to_string()),
                    llm_calls: 0,
                    retryable,
                }
            }
        }
    }

    async fn run_task(
        &self,
        task: &TaskSpec,
        budget: crate::models::Budget,
        now_unix: i64,
    ) -> Result<(String, usize), crate::error::WorkflowError> {
        let tools = filter_tools_by_allowlist(&self.all_tools, &task.allowed_tools);
        let mut agent = Agent::new(
            "You are a project worker. Complete the assigned task and report results.",
            self.llm_candidates.clone(),
            Arc::clone(&self.model_selector),
            Arc::clone(&self.clock),
        )
        .with_budget_exceeded(Arc::new(move || budget.exhausted(now_unix)));
        for tool in tools {
            agent = agent.with_tool(clone_tool_definition(&tool));
        }
        let prompt = worker_prompt(task);
        let response = agent
            .chat(&prompt, Some("workflow"), 10)
            .await
            .map_err(|e| crate::error::WorkflowError::AgentFailed(e.to_string()))?;
        Ok((response, 0))
    }

    pub fn dispatch(self: &Arc<Self>, project: Arc<Project>, phase: Arc<Phase>, task: TaskSpec, attempt: u32) -> String {
        let worker_id = format!("{}-{}-{}", project.id, task.id, attempt);
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move { pool.spawn_worker(&project, &phase, &task, attempt).await });
        self.handles.lock().unwrap().insert(worker_id.clone(), handle);
        worker_id
    }

    /// Await every currently-running worker with a soft timeout; anything
    /// still running after the deadline is logged and left running (spec
    /// §4.8 "Drain").
    pub async fn drain(&self, timeout: Duration) -> Vec<WorkerResult> {
        let handles: Vec<(String, JoinHandle<WorkerResult>)> = self.handles.lock().unwrap().drain().collect();
        let mut results = Vec::new();
        let mut still_running = 0;
        for (worker_id, handle) in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => tracing::warn!(worker_id = %worker_id, error = %e, "worker task panicked"),
                Err(_) => {
                    still_running += 1;
                    tracing::warn!(worker_id = %worker_id, "worker did not finish before drain timeout, left running");
                }
            }
        }
        if still_running > 0 {
            tracing::warn!(count = still_running, "drain timed out with workers still running");
        }
        results
    }
}

/// [`ToolDefinition`] is not `Clone` (it owns a trait object and schema
/// value); workers need their own copy of the allowlisted subset since
/// each gets a fresh [`Agent`].
fn clone_tool_definition(tool: &ToolDefinition) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
        permission: tool.permission,
        requires_approval_override: tool.requires_approval_override,
        handler: Arc::clone(&tool.handler),
        max_attempts: tool.max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Budget;
    use wayfarer_agent::{LlmRequest, LlmResponse};
    use wayfarer_core::FakeClock;
    use async_trait::async_trait;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, wayfarer_agent::LlmError> {
            Ok(LlmResponse {
                message: ConversationMessage::assistant("task complete"),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
    }

    fn pool() -> (Arc<WorkerPool>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let backend = Arc::new(FileWorkflowBackend::new(dir.path(), Arc::clone(&clock)));
        let model_selector = Arc::new(ModelSelector::new(
            wayfarer_agent::ModelConfig::new("light-1", "acme"),
            wayfarer_agent::ModelConfig::new("heavy-1", "acme").heavy(),
            wayfarer_agent::ModelConfig::new("thinking-1", "acme").thinking(1000),
            Arc::clone(&clock),
        ));
        let llm: Arc<dyn LlmClient> = Arc::new(StubLlm);
        (
            Arc::new(WorkerPool::new(vec![], model_selector, vec![llm], backend, clock, 3)),
            dir,
        )
    }

    #[tokio::test]
    async fn budget_exhausted_short_circuits_without_calling_the_llm() {
        let (pool, _dir) = pool();
        let mut project = Project::new("p1", "goal", "ws", Budget::new(0.01, 0, 0), 0);
        project.budget.record_call(0.02);
        let phase = Phase::new("phase-1", "Phase", "desc");
        let task = TaskSpec::new("task-001", "do it");
        let result = pool.spawn_worker(&project, &phase, &task, 1).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("budget exhausted"));
    }

    #[tokio::test]
    async fn successful_task_returns_success_result() {
        let (pool, _dir) = pool();
        let project = Project::new("p1", "goal", "ws", Budget::new(0.0, 0, 0), 0);
        let phase = Phase::new("phase-1", "Phase", "desc");
        let task = TaskSpec::new("task-001", "do it");
        let result = pool.spawn_worker(&project, &phase, &task, 1).await;
        assert!(result.success);
        assert_eq!(result.response, "task complete");
    }

    #[tokio::test]
    async fn paused_project_refuses_to_spawn() {
        let (pool, _dir) = pool();
        let mut project = Project::new("p1", "goal", "ws", Budget::new(0.0, 0, 0), 0);
        project.status = crate::models::ProjectStatus::Paused;
        let phase = Phase::new("phase-1", "Phase", "desc");
        let task = TaskSpec::new("task-001", "do it");
        let result = pool.spawn_worker(&project, &phase, &task, 1).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[test]
    fn empty_allowlist_means_no_restriction() {
        let tools = vec![Arc::new(sample_tool("a")), Arc::new(sample_tool("b"))];
        let filtered = filter_tools_by_allowlist(&tools, &[]);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn nonempty_allowlist_restricts_by_name() {
        let tools = vec![Arc::new(sample_tool("a")), Arc::new(sample_tool("b"))];
        let filtered = filter_tools_by_allowlist(&tools, &["b".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "b");
    }

    struct NoopHandler;

    #[async_trait]
    impl wayfarer_agent::ToolHandler for NoopHandler {
        async fn call(&self, _arguments: serde_json::Value) -> Result<String, wayfarer_agent::ToolError> {
            Ok(String::new())
        }
    }

    fn sample_tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "", serde_json::json!({}), wayfarer_agent::Permission::Read, Arc::new(NoopHandler))
    }
}
