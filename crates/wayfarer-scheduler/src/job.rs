use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A named cron job: `{id, prompt, cron, call_type, channel,
/// metadata, enabled}`. Disabled jobs are registered but never fire.
#[derive(Clone)]
pub struct ScheduleJob {
    pub id: String,
    pub prompt: String,
    pub cron: String,
    pub call_type: Option<String>,
    pub channel: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub enabled: bool,
    /// Per-job timezone override.
    pub timezone: Option<String>,
}

impl ScheduleJob {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            cron: cron.into(),
            call_type: None,
            channel: None,
            metadata: HashMap::new(),
            enabled: true,
            timezone: None,
        }
    }

    pub fn with_call_type(mut self, call_type: impl Into<String>) -> Self {
        self.call_type = Some(call_type.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A heartbeat prompt is either a fixed string or evaluated fresh at fire
/// time.
#[derive(Clone)]
pub enum HeartbeatPrompt {
    Static(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl HeartbeatPrompt {
    pub fn resolve(&self) -> String {
        match self {
            HeartbeatPrompt::Static(s) => s.clone(),
            HeartbeatPrompt::Dynamic(f) => f(),
        }
    }
}

/// `scheduler.heartbeat.{enabled,cron,prompt}`.
#[derive(Clone)]
pub struct HeartbeatSpec {
    pub enabled: bool,
    pub cron: String,
    pub prompt: HeartbeatPrompt,
}

// -- Config tree -------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: default_timezone(),
            heartbeat: HeartbeatConfig::default(),
            jobs: Vec::new(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    pub cron: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    pub id: String,
    pub prompt: String,
    pub cron: String,
    #[serde(default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl From<JobConfig> for ScheduleJob {
    fn from(cfg: JobConfig) -> Self {
        ScheduleJob {
            id: cfg.id,
            prompt: cfg.prompt,
            cron: cfg.cron,
            call_type: cfg.call_type,
            channel: cfg.channel,
            metadata: cfg.metadata,
            enabled: cfg.enabled,
            timezone: cfg.timezone,
        }
    }
}
