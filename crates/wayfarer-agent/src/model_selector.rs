use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use wayfarer_core::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub provider: String,
    pub is_heavy: bool,
    pub is_thinking: bool,
    pub thinking_budget_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            is_heavy: false,
            is_thinking: false,
            thinking_budget_tokens: None,
        }
    }

    pub fn heavy(mut self) -> Self {
        self.is_heavy = true;
        self
    }

    pub fn thinking(mut self, budget_tokens: u32) -> Self {
        self.is_thinking = true;
        self.thinking_budget_tokens = Some(budget_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    Off,
    Low,
    Medium,
    High,
}

/// Signals the caller collects about the current turn, used by [`ModelSelector::select`]
///.
#[derive(Debug, Clone, Default)]
pub struct TaskSignals {
    pub iteration: u32,
    pub query: String,
    pub tool_result_chars: usize,
    pub needs_synthesis: bool,
    pub needs_escalation: bool,
    pub channel: Option<String>,
    pub mode: Option<String>,
    pub thinking_level: ThinkingLevel,
}

impl Default for ThinkingLevel {
    fn default() -> Self {
        ThinkingLevel::Off
    }
}

const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture", "refactor", "design", "analyze", "compare", "strategy",
    "plan", "debug", "investigate", "optimize", "security", "comprehensive",
];

const LIGHT_KEYWORDS: &[&str] = &[
    "hi", "hello", "thanks", "thank you", "ok", "okay", "yes", "no", "ack",
];

const LIGHT_MODES: &[&str] = &["chitchat", "ack", "status"];

const TOOL_RESULT_CHAR_THRESHOLD: usize = 500;
const QUERY_LENGTH_THRESHOLD: usize = 150;

/// Persisted selector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub light_model: String,
    pub heavy_model: String,
    pub thinking_model: String,
    pub active_family: String,
}

pub fn save_settings(path: &Path, settings: &PersistedSettings) -> std::io::Result<()> {
    let body = serde_json::to_string_pretty(settings)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)
}

pub fn load_settings(path: &Path) -> std::io::Result<PersistedSettings> {
    let body = std::fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

struct Inner {
    light: ModelConfig,
    heavy: ModelConfig,
    thinking: ModelConfig,
    active_family: String,
    mode_overrides: std::collections::HashMap<String, ModelConfig>,
    heavy_modes: Vec<String>,
    tool_result_char_threshold: usize,
    query_length_threshold: usize,
}

/// Budget-pressure threshold above which an explicit thinking request gets
/// its token budget capped rather than dropped to a different model tier.
const THINKING_BUDGET_PRESSURE_THRESHOLD: f64 = 0.60;

/// Fraction of the configured thinking budget kept once pressure crosses
/// [`THINKING_BUDGET_PRESSURE_THRESHOLD`], mirroring the original's cap to
/// its lowest thinking-level budget tier.
const THINKING_BUDGET_PRESSURE_CAP_FRACTION: f64 = 0.25;

/// Picks a model per turn by walking a fixed priority ladder: quiet hours
/// and budget pressure take precedence over
/// everything else, then explicit overrides, then signal-based heuristics,
/// falling back to the light model.
///
/// Token-budget accounting itself is out of scope here; `budget_pressure`
/// is an injected closure returning a `0.0..=1.0` fraction so callers can
/// wire in whatever accounting they use without this type depending on it.
pub struct ModelSelector {
    inner: RwLock<Inner>,
    settings_path: Option<PathBuf>,
    quiet_hours: Option<(u8, u8)>,
    quiet_model: Option<ModelConfig>,
    clock: Arc<dyn Clock>,
    budget_pressure: Arc<dyn Fn() -> f64 + Send + Sync>,
}

impl ModelSelector {
    pub fn new(light: ModelConfig, heavy: ModelConfig, thinking: ModelConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                active_family: light.provider.clone(),
                light,
                heavy,
                thinking,
                mode_overrides: Default::default(),
                heavy_modes: Vec::new(),
                tool_result_char_threshold: TOOL_RESULT_CHAR_THRESHOLD,
                query_length_threshold: QUERY_LENGTH_THRESHOLD,
            }),
            settings_path: None,
            quiet_hours: None,
            quiet_model: None,
            clock,
            budget_pressure: Arc::new(|| 0.0),
        }
    }

    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    /// `(start_hour, end_hour)` in UTC, inclusive-exclusive, wraps past
    /// midnight if `start > end`. The Python original reads the local wall
    /// clock hour; this port uses `Clock::now_unix()` so selection stays
    /// deterministic under a `FakeClock` with no timezone plumbing — a
    /// deliberate adaptation, not an oversight.
    pub fn with_quiet_hours(mut self, start_hour: u8, end_hour: u8, quiet_model: ModelConfig) -> Self {
        self.quiet_hours = Some((start_hour, end_hour));
        self.quiet_model = Some(quiet_model);
        self
    }

    pub fn with_mode_overrides(self, overrides: std::collections::HashMap<String, ModelConfig>) -> Self {
        self.inner.write().unwrap().mode_overrides = overrides;
        self
    }

    pub fn with_budget_pressure(mut self, f: Arc<dyn Fn() -> f64 + Send + Sync>) -> Self {
        self.budget_pressure = f;
        self
    }

    fn in_quiet_hours(&self) -> bool {
        let Some((start, end)) = self.quiet_hours else {
            return false;
        };
        let hour = ((self.clock.now_unix() / 3600) % 24) as u8;
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Walk the priority ladder and return the model to use this turn.
    pub fn select(&self, signals: &TaskSignals) -> ModelConfig {
        let inner = self.inner.read().unwrap();

        // 1. quiet hours override everything else.
        if self.in_quiet_hours() {
            if let Some(model) = &self.quiet_model {
                return model.clone();
            }
        }

        let pressure = (self.budget_pressure)();

        // 2-3. budget pressure forces the light model past set thresholds.
        if pressure >= 0.95 || pressure >= 0.80 {
            return inner.light.clone();
        }

        // 4. explicit per-mode override: return the overridden model directly.
        if let Some(mode) = &signals.mode {
            if let Some(model) = inner.mode_overrides.get(mode) {
                return model.clone();
            }
        }

        // 5. explicit thinking request: always the thinking model, with its
        // token budget capped rather than downgrading the tier under pressure.
        let wants_thinking = signals.thinking_level > ThinkingLevel::Off
            || signals.mode.as_deref() == Some("think");
        if wants_thinking {
            let mut model = inner.thinking.clone();
            if pressure >= THINKING_BUDGET_PRESSURE_THRESHOLD {
                if let Some(budget) = model.thinking_budget_tokens {
                    let capped = (budget as f64 * THINKING_BUDGET_PRESSURE_CAP_FRACTION).round().max(1.0) as u32;
                    model.thinking_budget_tokens = Some(capped);
                }
            }
            return model;
        }

        // 6. boot/heartbeat channels always get the light model.
        if matches!(signals.channel.as_deref(), Some("boot") | Some("heartbeat")) {
            return inner.light.clone();
        }

        // 7. heavy tool output, synthesis, or an escalation request.
        if signals.tool_result_chars > inner.tool_result_char_threshold
            || signals.needs_synthesis
            || signals.needs_escalation
        {
            return inner.heavy.clone();
        }

        // 8. configured heavy/light modes.
        if let Some(mode) = &signals.mode {
            if inner.heavy_modes.iter().any(|m| m == mode) {
                return inner.heavy.clone();
            }
            if LIGHT_MODES.contains(&mode.as_str()) {
                return inner.light.clone();
            }
        }

        let query_lower = signals.query.to_lowercase();

        // 9. long or keyword-complex queries escalate.
        if query_lower.len() > inner.query_length_threshold
            || COMPLEX_KEYWORDS.iter().any(|k| query_lower.contains(k))
        {
            return inner.heavy.clone();
        }

        // 10. short acknowledgement-style queries stay light.
        if LIGHT_KEYWORDS.iter().any(|k| query_lower.trim() == *k) {
            return inner.light.clone();
        }

        // 11. default.
        inner.light.clone()
    }

    pub fn active_family(&self) -> String {
        self.inner.read().unwrap().active_family.clone()
    }

    pub fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        let inner = self.inner.read().unwrap();
        save_settings(
            path,
            &PersistedSettings {
                light_model: inner.light.name.clone(),
                heavy_model: inner.heavy.name.clone(),
                thinking_model: inner.thinking.name.clone(),
                active_family: inner.active_family.clone(),
            },
        )
    }
}
