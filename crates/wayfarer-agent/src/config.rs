//! Loads the model-tier catalog and recovery settings a process wires into
//! [`crate::model_selector::ModelSelector`] and [`crate::circuit_breaker::CircuitBreaker`].
//! Structural input only: nothing here touches the network or the
//! filesystem beyond reading the TOML itself.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::model_selector::{ModelConfig, ModelSelector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use wayfarer_core::Clock;

fn default_light_provider() -> String {
    "anthropic".to_string()
}

fn default_heavy_provider() -> String {
    "anthropic".to_string()
}

fn default_thinking_budget() -> u32 {
    4096
}

fn default_quiet_start_hour() -> u8 {
    23
}

fn default_quiet_end_hour() -> u8 {
    7
}

fn default_budget_pressure_downgrade() -> f64 {
    0.80
}

fn default_thinking_budget_pressure_downgrade() -> f64 {
    0.60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_cooldown_secs() -> i64 {
    60
}

fn default_history_window() -> usize {
    20
}

fn default_circuit_breaker_history_size() -> usize {
    20
}

/// `agent.models.*`: the light/heavy/thinking catalog, grounded on the
/// same three-tier scheme [`crate::model_selector::ModelSelector::new`] takes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelCatalogConfig {
    pub light_model: String,
    #[serde(default = "default_light_provider")]
    pub light_provider: String,
    pub heavy_model: String,
    #[serde(default = "default_heavy_provider")]
    pub heavy_provider: String,
    pub thinking_model: String,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget_tokens: u32,
    /// Explicit per-task-kind override, e.g. `{"synthesis": "heavy"}`.
    #[serde(default)]
    pub mode_overrides: std::collections::HashMap<String, String>,
}

impl ModelCatalogConfig {
    pub fn light(&self) -> ModelConfig {
        ModelConfig::new(self.light_model.clone(), self.light_provider.clone())
    }

    pub fn heavy(&self) -> ModelConfig {
        ModelConfig::new(self.heavy_model.clone(), self.heavy_provider.clone()).heavy()
    }

    pub fn thinking(&self) -> ModelConfig {
        ModelConfig::new(self.thinking_model.clone(), self.heavy_provider.clone())
            .heavy()
            .thinking(self.thinking_budget_tokens)
    }

    /// Resolves each configured override to a concrete [`ModelConfig`]:
    /// `"heavy"`/`"light"`/`"thinking"` map to the matching catalog entry,
    /// any other value is treated as a standalone model name on the light
    /// provider.
    pub fn resolve_mode_overrides(&self) -> std::collections::HashMap<String, ModelConfig> {
        self.mode_overrides
            .iter()
            .map(|(mode, target)| {
                let model = match target.as_str() {
                    "heavy" => self.heavy(),
                    "light" => self.light(),
                    "thinking" => self.thinking(),
                    other => ModelConfig::new(other, self.light_provider.clone()),
                };
                (mode.clone(), model)
            })
            .collect()
    }
}

/// `agent.quiet_hours.*`: the wall-clock window the selector downgrades to
/// the light model for, and `agent.budget.*`: the pressure ratios at which
/// a thinking or heavy request gets downgraded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub quiet_hours_enabled: bool,
    #[serde(default = "default_quiet_start_hour")]
    pub quiet_start_hour: u8,
    #[serde(default = "default_quiet_end_hour")]
    pub quiet_end_hour: u8,
    #[serde(default = "default_budget_pressure_downgrade")]
    pub budget_pressure_downgrade: f64,
    #[serde(default = "default_thinking_budget_pressure_downgrade")]
    pub thinking_budget_pressure_downgrade: f64,
    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_recovery_cooldown_secs")]
    pub circuit_breaker_cooldown_secs: i64,
    #[serde(default = "default_history_window")]
    pub max_history_messages: usize,
    #[serde(default = "default_circuit_breaker_history_size")]
    pub circuit_breaker_history_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            quiet_hours_enabled: false,
            quiet_start_hour: default_quiet_start_hour(),
            quiet_end_hour: default_quiet_end_hour(),
            budget_pressure_downgrade: default_budget_pressure_downgrade(),
            thinking_budget_pressure_downgrade: default_thinking_budget_pressure_downgrade(),
            circuit_breaker_failure_threshold: default_failure_threshold(),
            circuit_breaker_cooldown_secs: default_recovery_cooldown_secs(),
            max_history_messages: default_history_window(),
            circuit_breaker_history_size: default_circuit_breaker_history_size(),
        }
    }
}

impl RecoveryConfig {
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            open_duration_secs: self.circuit_breaker_cooldown_secs,
            history_size: self.circuit_breaker_history_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub models: ModelCatalogConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl AgentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Builds a [`ModelSelector`] wired from this config's catalog,
    /// per-mode overrides, and quiet-hours/budget-pressure settings.
    pub fn build_model_selector(&self, clock: Arc<dyn Clock>) -> ModelSelector {
        let mut selector = ModelSelector::new(self.models.light(), self.models.heavy(), self.models.thinking(), clock)
            .with_mode_overrides(self.models.resolve_mode_overrides());
        if self.recovery.quiet_hours_enabled {
            selector = selector.with_quiet_hours(
                self.recovery.quiet_start_hour,
                self.recovery.quiet_end_hour,
                self.models.light(),
            );
        }
        selector
    }

    /// Builds a [`CircuitBreaker`] from this config's recovery thresholds.
    pub fn build_circuit_breaker(&self, clock: Arc<dyn Clock>) -> CircuitBreaker {
        CircuitBreaker::with_config(clock, self.recovery.circuit_breaker_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [models]
            light_model = "claude-haiku"
            heavy_model = "claude-opus"
            thinking_model = "claude-opus"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.models.light_provider, "anthropic");
        assert_eq!(cfg.recovery.circuit_breaker_failure_threshold, 3);
        assert!(!cfg.recovery.quiet_hours_enabled);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = AgentConfig::from_toml_str(
            r#"
            [models]
            light_model = "a"
            heavy_model = "b"
            thinking_model = "c"
            bogus = true
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn model_catalog_builds_model_configs() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [models]
            light_model = "claude-haiku"
            heavy_model = "claude-opus"
            thinking_model = "claude-opus"
            thinking_budget_tokens = 8192
            "#,
        )
        .unwrap();
        let thinking = cfg.models.thinking();
        assert!(thinking.is_heavy);
        assert!(thinking.is_thinking);
        assert_eq!(thinking.thinking_budget_tokens, Some(8192));
    }

    #[test]
    fn resolve_mode_overrides_maps_tier_keywords_and_raw_names() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [models]
            light_model = "claude-haiku"
            heavy_model = "claude-opus"
            thinking_model = "claude-opus"

            [models.mode_overrides]
            synthesis = "heavy"
            custom = "bespoke-model"
            "#,
        )
        .unwrap();
        let overrides = cfg.models.resolve_mode_overrides();
        assert_eq!(overrides.get("synthesis").unwrap().name, "claude-opus");
        assert_eq!(overrides.get("custom").unwrap().name, "bespoke-model");
    }

    #[test]
    fn build_model_selector_and_circuit_breaker_use_loaded_settings() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [models]
            light_model = "claude-haiku"
            heavy_model = "claude-opus"
            thinking_model = "claude-opus"

            [recovery]
            circuit_breaker_failure_threshold = 1
            circuit_breaker_cooldown_secs = 30
            "#,
        )
        .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(wayfarer_core::FakeClock::new(0));
        let selector = cfg.build_model_selector(Arc::clone(&clock));
        assert_eq!(
            selector.select(&crate::model_selector::TaskSignals::default()).name,
            "claude-haiku"
        );

        let breaker = cfg.build_circuit_breaker(clock);
        breaker.record("llm", false, 1);
        assert!(!breaker.is_available("llm"));
    }
}
