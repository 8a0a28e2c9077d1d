use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Consulted before the LLM call to inject extra context into the system
/// prompt. A failing advisor never
/// blocks the others or the turn itself — its error is logged and it
/// simply contributes nothing.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, message: &str, channel: Option<&str>) -> Result<String, String>;
}

/// Run after the turn completes, given the final response and the string
/// result of every tool call made along the way. Hooks never affect the
/// response returned to the caller; they exist purely for side effects
/// (notifications, logging to an external system, and so on).
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, message: &str, response: &str, tool_results: &[String], channel: Option<&str>);
}

/// Fan out to every registered advisor, dropping individual failures.
pub async fn gather_advice(advisors: &[Arc<dyn Advisor>], message: &str, channel: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    for advisor in advisors {
        match advisor.advise(message, channel).await {
            Ok(note) if !note.is_empty() => out.push(note),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "advisor failed, continuing without it"),
        }
    }
    out
}

/// Bounded fan-out for after-chat hooks: a process-wide semaphore with N
/// slots, and a submission made while all slots are busy is dropped
/// rather than queued. Each `dispatch` call spawns one task per
/// hook, all sharing the same permit pool.
pub struct HookPool {
    hooks: Vec<Arc<dyn Hook>>,
    semaphore: Arc<Semaphore>,
}

impl HookPool {
    pub fn new(hooks: Vec<Arc<dyn Hook>>, slots: usize) -> Self {
        Self {
            hooks,
            semaphore: Arc::new(Semaphore::new(slots)),
        }
    }

    pub fn dispatch(&self, message: String, response: String, tool_results: Vec<String>, channel: Option<String>) {
        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let semaphore = Arc::clone(&self.semaphore);
            let message = message.clone();
            let response = response.clone();
            let tool_results = tool_results.clone();
            let channel = channel.clone();
            let Ok(permit) = semaphore.try_acquire_owned() else {
                tracing::warn!("hook pool saturated, dropping submission");
                continue;
            };
            tokio::spawn(async move {
                let _permit = permit;
                hook.run(&message, &response, &tool_results, channel.as_deref()).await;
            });
        }
    }
}

/// Feeds the shared circuit breaker from this turn's tool results: any
/// `Error:`-prefixed result counts as a failure for `service_name`, a
/// clean turn (or a turn with no tool calls) counts as a success.
pub struct ToolMetricsHook {
    circuit_breaker: Arc<crate::circuit_breaker::CircuitBreaker>,
    service_name: String,
}

impl ToolMetricsHook {
    pub fn new(circuit_breaker: Arc<crate::circuit_breaker::CircuitBreaker>, service_name: impl Into<String>) -> Self {
        Self {
            circuit_breaker,
            service_name: service_name.into(),
        }
    }
}

#[async_trait]
impl Hook for ToolMetricsHook {
    async fn run(&self, _message: &str, _response: &str, tool_results: &[String], _channel: Option<&str>) {
        let failed = tool_results.iter().any(|r| r.starts_with("Error:"));
        self.circuit_breaker.record(&self.service_name, !failed, 0);
    }
}

/// Phrases that suggest the user is expressing something worth
/// remembering long-term: explicit asks ("remember that...") as well as
/// standing-preference language ("from now on...", "I prefer...").
const MEMORY_TRIGGER_PHRASES: &[&str] = &[
    "always ",
    "never ",
    "remember that",
    "remember this",
    "remember to",
    "don't forget",
    "dont forget",
    "from now on",
    "going forward",
    "i prefer",
    "i like",
    "i hate",
    "keep in mind",
    "make sure you",
    "when i ask",
    "whenever i",
    "by default",
];

fn matches_memory_trigger(message: &str) -> bool {
    let lower = message.to_lowercase();
    MEMORY_TRIGGER_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Appends the user's message to today's daily memory note whenever it
/// matches a memory-trigger phrase. A plain append-only file rather than
/// a curated store: promoting a note into `MEMORY.md` proper is a
/// separate, human-reviewed step.
pub struct MemoryExtractionHook {
    memory_dir: std::path::PathBuf,
    clock: Arc<dyn wayfarer_core::Clock>,
}

impl MemoryExtractionHook {
    pub fn new(memory_dir: impl Into<std::path::PathBuf>, clock: Arc<dyn wayfarer_core::Clock>) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            clock,
        }
    }

    fn daily_note_path(&self) -> std::path::PathBuf {
        let day = time::OffsetDateTime::from_unix_timestamp(self.clock.now_unix())
            .map(|t| t.date().to_string())
            .unwrap_or_else(|_| "unknown-date".to_string());
        self.memory_dir.join(format!("{day}.md"))
    }
}

#[async_trait]
impl Hook for MemoryExtractionHook {
    async fn run(&self, message: &str, _response: &str, _tool_results: &[String], _channel: Option<&str>) {
        if !matches_memory_trigger(message) {
            return;
        }
        let path = self.daily_note_path();
        if let Err(e) = append_daily_note(&path, message) {
            tracing::warn!(error = %e, "failed to append memory note");
        }
    }
}

fn append_daily_note(path: &std::path::Path, message: &str) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "- {}", message.trim())
}
