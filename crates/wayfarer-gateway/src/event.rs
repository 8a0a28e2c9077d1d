use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use wayfarer_core::ids::short_id;

/// Where an event originated. Carried in event metadata and used by the
/// gateway's retry policy and the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Message,
    Heartbeat,
    Scheduled,
    Webhook,
    Boot,
}

/// Dispatch priority. Lower numeric value pops first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Priority {
    High = 0,
    Normal = 10,
    Low = 20,
}

/// One transit unit through the gateway's priority queue.
///
/// `response` is present only for request/response events; it is taken
/// (not cloned) exactly once when the consumer resolves it, giving it a
/// consumed-exactly-once lifecycle.
pub struct Event {
    pub id: String,
    pub source: EventSource,
    pub priority: Priority,
    pub message: String,
    pub call_type: Option<String>,
    pub channel: Option<String>,
    pub mode: Option<String>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub response: Option<oneshot::Sender<Result<String, String>>>,
    pub(crate) is_sentinel: bool,
}

impl Event {
    pub fn new(source: EventSource, priority: Priority, message: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            source,
            priority,
            message: message.into(),
            call_type: None,
            channel: None,
            mode: None,
            user_id: None,
            metadata: HashMap::new(),
            created_at: OffsetDateTime::now_utc(),
            response: None,
            is_sentinel: false,
        }
    }

    /// A marker event used by `stop()` to drain the queue.
    /// Sorts after every real event at its priority tier because it is
    /// always inserted last and insertion order is the final tiebreaker.
    pub(crate) fn sentinel() -> Self {
        let mut e = Self::new(EventSource::Boot, Priority::Low, String::new());
        e.is_sentinel = true;
        e
    }

    /// Attach a response channel, turning this into a request/response
    /// event. Returns the receiver half for the caller to await.
    pub fn with_response(mut self) -> (Self, oneshot::Receiver<Result<String, String>>) {
        let (tx, rx) = oneshot::channel();
        self.response = Some(tx);
        (self, rx)
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_call_type(mut self, call_type: impl Into<String>) -> Self {
        self.call_type = Some(call_type.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_request_response(&self) -> bool {
        self.response.is_some()
    }

    /// A serializable snapshot without the one-shot sender, suitable for
    /// the dead-letter list.
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id.clone(),
            source: self.source,
            priority: self.priority,
            message: self.message.clone(),
            call_type: self.call_type.clone(),
            channel: self.channel.clone(),
            mode: self.mode.clone(),
            user_id: self.user_id.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

/// Everything in [`Event`] except the one-shot response sender: safe to
/// clone, serialize, and keep around after the event itself is consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub source: EventSource,
    pub priority: Priority,
    pub message: String,
    pub call_type: Option<String>,
    pub channel: Option<String>,
    pub mode: Option<String>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
