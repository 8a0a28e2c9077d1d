use crate::event::Event;
use async_trait::async_trait;

/// The single downstream collaborator that turns an [`Event`] into a text
/// response. In production this is the tool-calling agent; the gateway
/// crate doesn't depend on it: the agent is an external collaborator from
/// the gateway's point of view.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<String, String>;
}

/// Fire-and-forget response routing, registered per [`EventSource`](crate::event::EventSource)
/// plus an optional default.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(&self, response: &str, event: &Event);
}
