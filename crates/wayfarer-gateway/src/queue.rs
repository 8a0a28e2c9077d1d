use crate::event::Event;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Wraps an [`Event`] with its ordering key: (priority, timestamp, seq).
/// `seq` is the insertion-order tiebreaker so equal-priority,
/// equal-timestamp events still pop FIFO.
struct QueueEntry {
    priority: i32,
    timestamp_nanos: i128,
    seq: u64,
    event: Event,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
            && self.timestamp_nanos == other.timestamp_nanos
            && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the *smallest* key pops first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.timestamp_nanos.cmp(&self.timestamp_nanos))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded priority queue: pops in (priority ascending, timestamp
/// ascending) order, ties broken FIFO.
pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Push `event` onto the queue. Returns `Err(event)` (unchanged) if
    /// the queue is at capacity so the caller can apply the overflow
    /// policy.
    pub fn push(&mut self, event: Event) -> Result<(), Event> {
        if self.is_full() {
            return Err(event);
        }
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.push(QueueEntry {
            priority: event.priority as i32,
            timestamp_nanos: event.created_at.unix_timestamp_nanos(),
            seq,
            event,
        });
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|entry| entry.event)
    }

    /// Push `event` regardless of capacity. Used only for the shutdown
    /// sentinel: a full queue must never block or drop the
    /// signal that tells the consumer to drain and exit.
    pub fn push_unconditional(&mut self, event: Event) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.push(QueueEntry {
            priority: event.priority as i32,
            timestamp_nanos: event.created_at.unix_timestamp_nanos(),
            seq,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventSource, Priority};
    use time::OffsetDateTime;

    fn event_at(priority: Priority, unix: i64) -> Event {
        let mut e = Event::new(EventSource::Message, priority, "hi");
        e.created_at = OffsetDateTime::from_unix_timestamp(unix).unwrap();
        e
    }

    #[test]
    fn priority_preempts_fifo() {
        // S1: heartbeat@1.0, scheduled@1.5 (truncated to 1s granularity
        // still orders correctly because message is HIGH), message@2.0.
        let mut q = PriorityQueue::new(10);
        q.push(event_at(Priority::Low, 1)).unwrap(); // heartbeat-ish, LOW
        q.push(event_at(Priority::Normal, 1)).unwrap(); // scheduled-ish, NORMAL
        q.push(event_at(Priority::High, 2)).unwrap(); // message, HIGH

        let order: Vec<Priority> = std::iter::from_fn(|| q.pop().map(|e| e.priority)).collect();
        assert_eq!(order, vec![Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn equal_priority_and_timestamp_breaks_fifo_by_insertion_order() {
        let mut q = PriorityQueue::new(10);
        for i in 0..5 {
            let mut e = event_at(Priority::Normal, 100);
            e.message = format!("msg-{i}");
            q.push(e).unwrap();
        }
        let order: Vec<String> = std::iter::from_fn(|| q.pop().map(|e| e.message)).collect();
        assert_eq!(order, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }

    #[test]
    fn push_rejects_when_at_capacity() {
        let mut q = PriorityQueue::new(1);
        q.push(event_at(Priority::Normal, 1)).unwrap();
        let rejected = q.push(event_at(Priority::Normal, 2));
        assert!(rejected.is_err());
    }
}
