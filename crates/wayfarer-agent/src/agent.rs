use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::advisor::{gather_advice, Advisor, HookPool};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::ModelCatalogConfig;
use crate::error::{friendly_message, AgentError};
use crate::llm::{LlmClient, LlmError, LlmRequest};
use crate::message::{sanitize_history, strip_tool_call_metadata, trim_history, ConversationMessage, ToolCall};
use crate::model_selector::{ModelConfig, ModelSelector, TaskSignals};
use crate::tool::{invoke_tool, unknown_tool_result, ToolDefinition};
use wayfarer_core::Clock;

const DEFAULT_MAX_HISTORY_MESSAGES: usize = 40;

/// Everything the loop needs to resume after an approval gate: the tool
/// calls awaiting a decision and the assistant content
/// that introduced them, so the synthesized denial/unavailable results can
/// be appended in the same shape a normal turn would have produced.
struct PendingApproval {
    tool_calls: Vec<ToolCall>,
}

/// Tool-calling conversation loop: builds the outgoing message
/// list, invokes the LLM through a model-fallback chain, executes approved
/// tool calls with retry, and repairs history into a provider-safe shape
/// before every call.
pub struct Agent {
    persona: String,
    tools: HashMap<String, Arc<ToolDefinition>>,
    llm_candidates: Vec<Arc<dyn LlmClient>>,
    model_selector: Arc<ModelSelector>,
    circuit_breaker: Arc<CircuitBreaker>,
    advisors: Vec<Arc<dyn Advisor>>,
    hook_pool: Option<Arc<HookPool>>,
    clock: Arc<dyn Clock>,
    max_history_messages: usize,
    history: Mutex<Vec<ConversationMessage>>,
    steering: Mutex<Option<String>>,
    pending_approval: Mutex<Option<PendingApproval>>,
    model_catalog: Option<ModelCatalogConfig>,
    default_temperature: Option<f32>,
    /// Injected the same way [`ModelSelector`]'s budget-pressure closure is:
    /// a caller-owned `0.0..=1.0`-style check collapsed to a boolean here,
    /// since a turn either still has budget or it doesn't.
    budget_exceeded: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Agent {
    pub fn new(
        persona: impl Into<String>,
        llm_candidates: Vec<Arc<dyn LlmClient>>,
        model_selector: Arc<ModelSelector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            persona: persona.into(),
            tools: HashMap::new(),
            llm_candidates,
            model_selector,
            circuit_breaker: Arc::new(CircuitBreaker::new(Arc::clone(&clock))),
            advisors: Vec::new(),
            hook_pool: None,
            clock,
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
            history: Mutex::new(Vec::new()),
            steering: Mutex::new(None),
            pending_approval: Mutex::new(None),
            model_catalog: None,
            default_temperature: None,
            budget_exceeded: Arc::new(|| false),
        }
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisors.push(advisor);
        self
    }

    pub fn with_hook_pool(mut self, pool: Arc<HookPool>) -> Self {
        self.hook_pool = Some(pool);
        self
    }

    pub fn with_max_history_messages(mut self, limit: usize) -> Self {
        self.max_history_messages = limit;
        self
    }

    /// Lets a `NotFound` model-name error resolve to an alternate catalog
    /// entry before giving up on a candidate entirely.
    pub fn with_model_catalog(mut self, catalog: ModelCatalogConfig) -> Self {
        self.model_catalog = Some(catalog);
        self
    }

    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = Some(temperature);
        self
    }

    pub fn with_budget_exceeded(mut self, f: Arc<dyn Fn() -> bool + Send + Sync>) -> Self {
        self.budget_exceeded = f;
        self
    }

    /// Queue a message to be prefixed `[STEERING]` and injected at the
    /// start of the next `chat()` call.
    pub fn steer(&self, message: impl Into<String>) {
        *self.steering.lock().unwrap() = Some(message.into());
    }

    pub async fn chat(&self, message: &str, channel: Option<&str>, max_iterations: u32) -> Result<String, AgentError> {
        let trimmed = message.trim();
        if trimmed.eq_ignore_ascii_case("approve") || trimmed.eq_ignore_ascii_case("deny") {
            if let Some(pending) = self.pending_approval.lock().unwrap().take() {
                return self.resume_after_approval(pending, trimmed.eq_ignore_ascii_case("approve"), channel, max_iterations)
                    .await;
            }
        }

        {
            let mut history = self.history.lock().unwrap();
            if let Some(steering) = self.steering.lock().unwrap().take() {
                history.push(ConversationMessage::user(format!("[STEERING] {steering}")));
            }
            history.push(ConversationMessage::user(message.to_string()));
        }

        self.run_loop(channel, max_iterations).await
    }

    async fn resume_after_approval(
        &self,
        pending: PendingApproval,
        approved: bool,
        channel: Option<&str>,
        max_iterations: u32,
    ) -> Result<String, AgentError> {
        let mut tool_results = Vec::with_capacity(pending.tool_calls.len());
        for call in &pending.tool_calls {
            let result = if approved {
                self.execute_tool_call(call).await
            } else {
                "Error: tool call was not approved".to_string()
            };
            tool_results.push(ConversationMessage::tool_result(call.id.clone(), result));
        }
        self.history.lock().unwrap().extend(tool_results);
        self.run_loop(channel, max_iterations).await
    }

    async fn run_loop(&self, channel: Option<&str>, max_iterations: u32) -> Result<String, AgentError> {
        let mut tool_result_chars: usize = 0;
        let mut turn_tool_results: Vec<String> = Vec::new();

        for iteration in 0..max_iterations {
            let system_prompt = self.build_system_prompt(channel).await;

            let outgoing = {
                let history = self.history.lock().unwrap().clone();
                let sanitized = sanitize_history(history);
                let trimmed = trim_history(sanitized, self.max_history_messages);
                self.history.lock().unwrap().clear();
                self.history.lock().unwrap().extend(trimmed.clone());
                let mut messages = vec![ConversationMessage::system(system_prompt)];
                messages.extend(trimmed);
                messages
            };

            let query = outgoing
                .iter()
                .rev()
                .find(|m| m.role == crate::message::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();

            let signals = TaskSignals {
                iteration,
                query,
                tool_result_chars,
                needs_synthesis: false,
                needs_escalation: false,
                channel: channel.map(|c| c.to_string()),
                ..Default::default()
            };

            let response = self.invoke_with_recovery(outgoing, &signals).await?;
            let assistant_message = response.message;

            self.history.lock().unwrap().push(assistant_message.clone());

            if assistant_message.tool_calls.is_empty() {
                let text = assistant_message.content.clone();
                self.dispatch_hooks(&text, turn_tool_results.clone(), channel);
                return Ok(text);
            }

            let needs_approval: Vec<ToolCall> = assistant_message
                .tool_calls
                .iter()
                .filter(|call| {
                    self.tools
                        .get(&call.name)
                        .map(|t| t.requires_approval())
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            if !needs_approval.is_empty() {
                let names: Vec<&str> = needs_approval.iter().map(|c| c.name.as_str()).collect();
                *self.pending_approval.lock().unwrap() = Some(PendingApproval {
                    tool_calls: assistant_message.tool_calls.clone(),
                });
                return Ok(format!(
                    "Approval required for: {}. Reply 'approve' or 'deny'.",
                    names.join(", ")
                ));
            }

            let mut tool_messages = Vec::with_capacity(assistant_message.tool_calls.len());
            for call in &assistant_message.tool_calls {
                let result = self.execute_tool_call(call).await;
                tool_result_chars += result.len();
                turn_tool_results.push(result.clone());
                tool_messages.push(ConversationMessage::tool_result(call.id.clone(), result));
            }
            self.history.lock().unwrap().extend(tool_messages);
        }

        Err(AgentError::IterationLimitExceeded { limit: max_iterations })
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> String {
        match self.tools.get(&call.name) {
            Some(tool) => invoke_tool(tool, call.arguments.clone()).await,
            None => unknown_tool_result(&call.name),
        }
    }

    async fn build_system_prompt(&self, channel: Option<&str>) -> String {
        let mut sections = vec![self.persona.clone()];
        let now = self.clock.now();
        sections.push(format!("CURRENT DATE/TIME: {now}"));

        let last_user_message = self
            .history
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        for note in gather_advice(&self.advisors, &last_user_message, channel).await {
            sections.push(note);
        }
        sections.join("\n\n")
    }

    fn dispatch_hooks(&self, response: &str, tool_results: Vec<String>, channel: Option<&str>) {
        if let Some(pool) = &self.hook_pool {
            let message = self
                .history
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|m| m.role == crate::message::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            pool.dispatch(message, response.to_string(), tool_results, channel.map(|c| c.to_string()));
        }
    }

    /// Resolves a `NotFound` model name to a different catalog entry so the
    /// same candidate gets one more try before moving on to the next
    /// fallback client.
    fn resolve_alternate_model(&self, failed_name: &str) -> Option<ModelConfig> {
        let catalog = self.model_catalog.as_ref()?;
        [catalog.light(), catalog.heavy(), catalog.thinking()]
            .into_iter()
            .find(|m| m.name != failed_name)
    }

    /// Wrap the LLM call in the recovery policy: consult the circuit
    /// breaker before each candidate, repair the request in place for a
    /// handful of known-recoverable `BadRequest`/`NotFound` shapes, walk
    /// the fallback chain on everything else, and surface only friendly,
    /// class-routed strings on exhaustion.
    async fn invoke_with_recovery(
        &self,
        messages: Vec<ConversationMessage>,
        signals: &TaskSignals,
    ) -> Result<crate::llm::LlmResponse, AgentError> {
        if (self.budget_exceeded)() {
            return Err(AgentError::BudgetExceeded);
        }

        let model = self.model_selector.select(signals);
        let tool_schemas: Vec<serde_json::Value> = self
            .tools
            .values()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();

        let mut last_error: Option<LlmError> = None;
        'candidates: for (index, client) in self.llm_candidates.iter().enumerate() {
            let service_name = format!("llm-{index}");
            if !self.circuit_breaker.is_available(&service_name) {
                continue;
            }

            let mut model_name = model.name.clone();
            let mut request_messages = messages.clone();
            let mut temperature = self.default_temperature;
            let mut dropped_temperature = false;
            let mut repaired_tool_call_ids = false;
            let mut resolved_alternate_model = false;

            loop {
                let started = self.clock.now_unix();
                let request = LlmRequest {
                    model: model_name.clone(),
                    messages: request_messages.clone(),
                    tool_schemas: tool_schemas.clone(),
                    thinking_budget_tokens: model.thinking_budget_tokens,
                    temperature,
                };
                match client.complete(request).await {
                    Ok(response) => {
                        let elapsed_ms = ((self.clock.now_unix() - started).max(0) * 1000) as u64;
                        self.circuit_breaker.record(&service_name, true, elapsed_ms);
                        return Ok(response);
                    }
                    Err(e) => {
                        if e.mentions_temperature() && !dropped_temperature && temperature.is_some() {
                            dropped_temperature = true;
                            temperature = None;
                            continue;
                        }
                        if e.mentions_tool_call_ids() && !repaired_tool_call_ids {
                            repaired_tool_call_ids = true;
                            request_messages = strip_tool_call_metadata(request_messages);
                            continue;
                        }
                        if matches!(e, LlmError::NotFound(_)) && !resolved_alternate_model {
                            if let Some(alternate) = self.resolve_alternate_model(&model_name) {
                                resolved_alternate_model = true;
                                model_name = alternate.name;
                                continue;
                            }
                        }

                        self.circuit_breaker.record(&service_name, false, 0);
                        let recoverable = e.is_recoverable_by_fallback();
                        last_error = Some(e);
                        if !recoverable {
                            break 'candidates;
                        }
                        break;
                    }
                }
            }
        }

        let error = AgentError::Llm(last_error.unwrap_or(LlmError::Other("no model candidates configured".to_string())));
        tracing::warn!(error = %error, "exhausted llm fallback chain");
        let _ = friendly_message(&error);
        Err(AgentError::AllModelsExhausted {
            last_error: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_selector::ModelConfig;
    use crate::tool::{Permission, ToolError, ToolHandler};
    use async_trait::async_trait;
    use wayfarer_core::FakeClock;

    struct ScriptedLlm {
        responses: Mutex<Vec<Result<crate::llm::LlmResponse, LlmError>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: LlmRequest) -> Result<crate::llm::LlmResponse, LlmError> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    /// Like `ScriptedLlm`, but also records every request it receives so
    /// tests can assert on the repair retries `invoke_with_recovery` makes.
    struct RecordingLlm {
        responses: Mutex<Vec<Result<crate::llm::LlmResponse, LlmError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl RecordingLlm {
        fn new(responses: Vec<Result<crate::llm::LlmResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, request: LlmRequest) -> Result<crate::llm::LlmResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn text_response(text: &str) -> crate::llm::LlmResponse {
        crate::llm::LlmResponse {
            message: ConversationMessage::assistant(text),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    fn tool_call_response(id: &str, name: &str) -> crate::llm::LlmResponse {
        crate::llm::LlmResponse {
            message: ConversationMessage::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: serde_json::json!({}),
                }],
            ),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    fn model_selector(clock: Arc<dyn Clock>) -> Arc<ModelSelector> {
        Arc::new(ModelSelector::new(
            ModelConfig::new("light-1", "acme"),
            ModelConfig::new("heavy-1", "acme").heavy(),
            ModelConfig::new("thinking-1", "acme").thinking(8_000),
            clock,
        ))
    }

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok("Wrote: hello".to_string())
        }
    }

    #[tokio::test]
    async fn simple_turn_with_no_tool_calls_returns_text() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let llm = Arc::new(ScriptedLlm {
            responses: Mutex::new(vec![Ok(text_response("hello there"))]),
        });
        let agent = Agent::new("persona", vec![llm], model_selector(Arc::clone(&clock)), clock);
        let reply = agent.chat("hi", None, 5).await.unwrap();
        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn fallback_model_is_used_after_rate_limit() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let primary = Arc::new(ScriptedLlm {
            responses: Mutex::new(vec![Err(LlmError::RateLimit("429".to_string()))]),
        });
        let fallback = Arc::new(ScriptedLlm {
            responses: Mutex::new(vec![Ok(text_response("Fallback OK"))]),
        });
        let agent = Agent::new("persona", vec![primary, fallback], model_selector(Arc::clone(&clock)), clock);
        let reply = agent.chat("hi", None, 5).await.unwrap();
        assert_eq!(reply, "Fallback OK");
    }

    #[tokio::test]
    async fn budget_exceeded_short_circuits_before_any_model_call() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let llm = Arc::new(ScriptedLlm {
            responses: Mutex::new(vec![Ok(text_response("should not be reached"))]),
        });
        let agent = Agent::new("persona", vec![llm], model_selector(Arc::clone(&clock)), clock)
            .with_budget_exceeded(Arc::new(|| true));
        let err = agent.chat("hi", None, 5).await.unwrap_err();
        assert!(matches!(err, AgentError::BudgetExceeded));
    }

    #[tokio::test]
    async fn temperature_dropped_and_retried_on_bad_request_mentioning_temperature() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let llm = Arc::new(RecordingLlm::new(vec![
            Err(LlmError::BadRequest("unsupported value for temperature".to_string())),
            Ok(text_response("ok without temperature")),
        ]));
        let agent = Agent::new(
            "persona",
            vec![Arc::clone(&llm) as Arc<dyn LlmClient>],
            model_selector(Arc::clone(&clock)),
            clock,
        )
        .with_default_temperature(0.9);
        let reply = agent.chat("hi", None, 5).await.unwrap();
        assert_eq!(reply, "ok without temperature");
        let requests = llm.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].temperature, Some(0.9));
        assert_eq!(requests[1].temperature, None);
    }

    #[tokio::test]
    async fn history_repaired_and_retried_on_bad_request_mentioning_tool_call_ids() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let llm = Arc::new(RecordingLlm::new(vec![
            Err(LlmError::BadRequest("invalid tool_call_id referenced".to_string())),
            Ok(text_response("ok after repair")),
        ]));
        let agent = Agent::new(
            "persona",
            vec![Arc::clone(&llm) as Arc<dyn LlmClient>],
            model_selector(Arc::clone(&clock)),
            clock,
        );
        let reply = agent.chat("hi", None, 5).await.unwrap();
        assert_eq!(reply, "ok after repair");
        let requests = llm.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages.iter().all(|m| m.role != crate::message::Role::Tool));
    }

    #[tokio::test]
    async fn not_found_model_resolves_to_alternate_catalog_entry() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let llm = Arc::new(RecordingLlm::new(vec![
            Err(LlmError::NotFound("model light-1 not found".to_string())),
            Ok(text_response("ok on alternate model")),
        ]));
        let catalog = ModelCatalogConfig {
            light_model: "light-1".to_string(),
            light_provider: "acme".to_string(),
            heavy_model: "heavy-1".to_string(),
            heavy_provider: "acme".to_string(),
            thinking_model: "thinking-1".to_string(),
            thinking_budget_tokens: 8_000,
            mode_overrides: Default::default(),
        };
        let agent = Agent::new(
            "persona",
            vec![Arc::clone(&llm) as Arc<dyn LlmClient>],
            model_selector(Arc::clone(&clock)),
            clock,
        )
        .with_model_catalog(catalog);
        let reply = agent.chat("hi", None, 5).await.unwrap();
        assert_eq!(reply, "ok on alternate model");
        let requests = llm.requests.lock().unwrap().clone();
        assert_eq!(requests[0].model, "light-1");
        assert_eq!(requests[1].model, "heavy-1");
    }

    #[tokio::test]
    async fn write_tool_call_requires_approval_before_executing() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(0));
        let llm = Arc::new(ScriptedLlm {
            responses: Mutex::new(vec![
                Ok(tool_call_response("call_1", "write_thing")),
                Ok(text_response("done writing")),
            ]),
        });
        let agent = Agent::new("persona", vec![llm], model_selector(Arc::clone(&clock)), clock).with_tool(
            ToolDefinition::new(
                "write_thing",
                "",
                serde_json::json!({}),
                Permission::Write,
                Arc::new(EchoHandler),
            ),
        );

        let first = agent.chat("Save hello", None, 5).await.unwrap();
        assert!(first.contains("Approval required"));

        let second = agent.chat("approve", None, 5).await.unwrap();
        assert_eq!(second, "done writing");

        let history = agent.history.lock().unwrap().clone();
        let tool_result_index = history
            .iter()
            .position(|m| m.tool_call_id.as_deref() == Some("call_1"))
            .unwrap();
        assert_eq!(history[tool_result_index].content, "Wrote: hello");
        assert!(history[tool_result_index - 1].tool_calls.iter().any(|c| c.id == "call_1"));
    }
}
