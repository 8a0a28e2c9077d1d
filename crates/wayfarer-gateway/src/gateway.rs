use crate::consumer::{EventConsumer, ResponseHandler};
use crate::error::GatewayError;
use crate::event::{Event, EventRecord, EventSource};
use crate::queue::PriorityQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

const DEFAULT_CAPACITY: usize = 100;

/// A failed event retained for later inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: EventRecord,
    pub error_message: String,
    pub timestamp: OffsetDateTime,
}

struct Shared {
    queue: AsyncMutex<PriorityQueue>,
    notify: Notify,
    consumer: Arc<dyn EventConsumer>,
    handlers: AsyncMutex<HashMap<EventSource, Arc<dyn ResponseHandler>>>,
    default_handler: AsyncMutex<Option<Arc<dyn ResponseHandler>>>,
    dead_letters: AsyncMutex<Vec<DeadLetter>>,
    accepting: AtomicBool,
}

/// Single-consumer priority-queued event gateway.
///
/// Exactly one consumer task pulls events in `(priority, timestamp)` order
/// and processes them serially: the agent's in-memory history is not
/// designed for concurrent mutation, so a second consumer would
/// be a correctness bug, not a performance optimization.
pub struct EventGateway {
    shared: Arc<Shared>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl EventGateway {
    pub fn new(consumer: Arc<dyn EventConsumer>) -> Self {
        Self::with_capacity(consumer, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(consumer: Arc<dyn EventConsumer>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: AsyncMutex::new(PriorityQueue::new(capacity)),
                notify: Notify::new(),
                consumer,
                handlers: AsyncMutex::new(HashMap::new()),
                default_handler: AsyncMutex::new(None),
                dead_letters: AsyncMutex::new(Vec::new()),
                accepting: AtomicBool::new(true),
            }),
            task: AsyncMutex::new(None),
        }
    }

    pub async fn set_response_handler(
        &self,
        handler: Arc<dyn ResponseHandler>,
        source: Option<EventSource>,
    ) {
        match source {
            Some(src) => {
                self.shared.handlers.lock().await.insert(src, handler);
            }
            None => {
                *self.shared.default_handler.lock().await = Some(handler);
            }
        }
    }

    /// Non-blocking submit. On overflow: a request/response
    /// event is rejected through its future; a fire-and-forget event is
    /// dropped silently with a logged warning.
    pub async fn submit(&self, event: Event) -> Result<(), GatewayError> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(GatewayError::NotRunning);
        }
        let has_response = event.is_request_response();
        let event_id = event.id.clone();
        let mut queue = self.shared.queue.lock().await;
        match queue.push(event) {
            Ok(()) => {
                drop(queue);
                self.shared.notify.notify_one();
                Ok(())
            }
            Err(mut rejected) => {
                drop(queue);
                if let Some(tx) = rejected.response.take() {
                    let _ = tx.send(Err("queue full".to_string()));
                } else {
                    tracing::warn!(event_id = %event_id, "dropping fire-and-forget event: queue full");
                }
                Err(GatewayError::QueueFull)
            }
        }
    }

    pub async fn get_dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().await.clone()
    }

    pub async fn clear_dead_letters(&self) {
        self.shared.dead_letters.lock().await.clear();
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.shared.dead_letters.lock().await.len()
    }

    /// Spawn the single consumer task.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }
        self.shared.accepting.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move {
            consumer_loop(shared).await;
        }));
        Ok(())
    }

    /// Enqueue a sentinel at the lowest possible priority so all pending
    /// work completes, then await consumer exit.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        self.shared.accepting.store(false, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue.lock().await;
            // Sentinel bypasses capacity: shutdown must never be dropped
            // for being "queue full".
            queue.push_unconditional(Event::sentinel());
        }
        self.shared.notify.notify_one();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn consumer_loop(shared: Arc<Shared>) {
    loop {
        let event = loop {
            let mut queue = shared.queue.lock().await;
            if let Some(event) = queue.pop() {
                break event;
            }
            drop(queue);
            shared.notify.notified().await;
        };

        if event.is_sentinel {
            tracing::info!("gateway consumer draining remaining events then exiting");
            // Keep draining any events that were queued before the sentinel
            // (sentinel sorts after everything inserted earlier).
            let remaining: Vec<Event> = {
                let mut queue = shared.queue.lock().await;
                std::iter::from_fn(|| queue.pop()).collect()
            };
            for event in remaining {
                if !event.is_sentinel {
                    process_event(&shared, event).await;
                }
            }
            return;
        }

        process_event(&shared, event).await;
    }
}

async fn process_event(shared: &Arc<Shared>, mut event: Event) {
    let source = event.source;
    let record = event.to_record();
    let response_tx = event.response.take();
    let first_attempt = shared.consumer.handle(&event).await;

    let outcome = match first_attempt {
        Ok(text) => Ok(text),
        Err(first_err) if retries(source) => {
            tracing::warn!(event_id = %record.id, error = %first_err, "agent invocation failed, retrying once");
            shared.consumer.handle(&event).await.map_err(|second_err| {
                tracing::error!(event_id = %record.id, error = %second_err, "agent invocation failed again, dead-lettering");
                second_err
            })
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(text) => dispatch_success(shared, response_tx, &event, &text).await,
        Err(error_message) => {
            if let Some(tx) = response_tx {
                let _ = tx.send(Err(error_message));
            } else if retries(source) {
                shared.dead_letters.lock().await.push(DeadLetter {
                    event: record,
                    error_message,
                    timestamp: OffsetDateTime::now_utc(),
                });
            } else {
                tracing::warn!(event_id = %record.id, error = %error_message, "fire-and-forget event failed, no retry configured");
            }
        }
    }
}

async fn dispatch_success(
    shared: &Arc<Shared>,
    response_tx: Option<tokio::sync::oneshot::Sender<Result<String, String>>>,
    event: &Event,
    text: &str,
) {
    if let Some(tx) = response_tx {
        let _ = tx.send(Ok(text.to_string()));
        return;
    }
    let per_source = shared.handlers.lock().await.get(&event.source).cloned();
    let handler = match per_source {
        Some(handler) => Some(handler),
        None => shared.default_handler.lock().await.clone(),
    };
    if let Some(handler) = handler {
        handler.handle(text, event).await;
    }
}

/// Retry policy: scheduled and heartbeat events retry once
/// inline; message (and other) events do not.
fn retries(source: EventSource) -> bool {
    matches!(source, EventSource::Scheduled | EventSource::Heartbeat)
}
