//! Priority-queued event gateway: a single serialized
//! consumer dispatches messages, heartbeats, scheduled jobs, and webhooks
//! to an injected [`EventConsumer`], then routes the response back
//! through a future (request/response events) or a registered
//! [`ResponseHandler`] (fire-and-forget events).

mod consumer;
mod error;
mod event;
mod gateway;
mod queue;

pub use consumer::{EventConsumer, ResponseHandler};
pub use error::GatewayError;
pub use event::{Event, EventRecord, EventSource, Priority};
pub use gateway::{DeadLetter, EventGateway};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct OrderRecordingConsumer {
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventConsumer for OrderRecordingConsumer {
        async fn handle(&self, event: &Event) -> Result<String, String> {
            self.order.lock().await.push(event.message.clone());
            Ok(format!("handled {}", event.message))
        }
    }

    #[tokio::test]
    async fn s1_priority_preempts_fifo_end_to_end() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let gw = EventGateway::new(Arc::new(OrderRecordingConsumer {
            order: order.clone(),
        }));

        // Submit heartbeat, then scheduled, then message -- before starting
        // the consumer, so all three are queued and ordering is purely a
        // function of priority.
        gw.submit(Event::new(EventSource::Heartbeat, Priority::Low, "heartbeat"))
            .await
            .unwrap();
        gw.submit(Event::new(EventSource::Scheduled, Priority::Normal, "scheduled"))
            .await
            .unwrap();
        let (msg_event, rx) =
            Event::new(EventSource::Message, Priority::High, "message").with_response();
        gw.submit(msg_event).await.unwrap();

        gw.start().await.unwrap();
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response, "handled message");
        gw.stop().await.unwrap();

        assert_eq!(*order.lock().await, vec!["message", "scheduled", "heartbeat"]);
    }

    struct AlwaysFailsConsumer {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventConsumer for AlwaysFailsConsumer {
        async fn handle(&self, _event: &Event) -> Result<String, String> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(format!("failure #{}", n + 1))
        }
    }

    #[tokio::test]
    async fn s8_scheduled_event_retries_once_then_dead_letters() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let gw = EventGateway::new(Arc::new(AlwaysFailsConsumer {
            attempts: attempts.clone(),
        }));
        gw.start().await.unwrap();
        gw.submit(Event::new(EventSource::Scheduled, Priority::Normal, "job"))
            .await
            .unwrap();
        gw.stop().await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let dead = gw.get_dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error_message, "failure #2");
        assert_eq!(dead[0].event.message, "job");
    }

    #[tokio::test]
    async fn message_events_do_not_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let gw = EventGateway::new(Arc::new(AlwaysFailsConsumer {
            attempts: attempts.clone(),
        }));
        gw.start().await.unwrap();
        let (event, rx) =
            Event::new(EventSource::Message, Priority::High, "hi").with_response();
        gw.submit(event).await.unwrap();
        let result = rx.await.unwrap();
        gw.stop().await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
        assert_eq!(gw.dead_letter_count().await, 0);
    }

    #[tokio::test]
    async fn queue_full_rejects_request_response_event_via_future() {
        let gw = EventGateway::with_capacity(
            Arc::new(OrderRecordingConsumer {
                order: Arc::new(Mutex::new(Vec::new())),
            }),
            0,
        );
        let (event, rx) = Event::new(EventSource::Message, Priority::High, "x").with_response();
        let result = gw.submit(event).await;
        assert!(result.is_err());
        let resolved = rx.await.unwrap();
        assert_eq!(resolved, Err("queue full".to_string()));
    }

    #[tokio::test]
    async fn fire_and_forget_routes_to_registered_handler() {
        struct RecordingHandler {
            seen: Arc<Mutex<Vec<String>>>,
        }
        #[async_trait]
        impl ResponseHandler for RecordingHandler {
            async fn handle(&self, response: &str, _event: &Event) {
                self.seen.lock().await.push(response.to_string());
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let gw = EventGateway::new(Arc::new(OrderRecordingConsumer {
            order: Arc::new(Mutex::new(Vec::new())),
        }));
        gw.set_response_handler(
            Arc::new(RecordingHandler { seen: seen.clone() }),
            Some(EventSource::Webhook),
        )
        .await;
        gw.start().await.unwrap();
        gw.submit(Event::new(EventSource::Webhook, Priority::Normal, "ping"))
            .await
            .unwrap();
        gw.stop().await.unwrap();

        assert_eq!(*seen.lock().await, vec!["handled ping"]);
    }
}
