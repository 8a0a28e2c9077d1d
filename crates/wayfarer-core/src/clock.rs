//! Injectable wall-clock so timing-sensitive components stay testable.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// A source of "now". Production code uses [`SystemClock`]; tests use
/// [`FakeClock`] so ordering assertions don't race real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn now_unix(&self) -> i64 {
        self.now().unix_timestamp()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Deterministic clock for tests: starts at a fixed instant and only moves
/// when told to via [`FakeClock::advance`].
#[derive(Clone)]
pub struct FakeClock {
    unix_seconds: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new(start_unix: i64) -> Self {
        Self {
            unix_seconds: Arc::new(AtomicI64::new(start_unix)),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.unix_seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, unix_seconds: i64) {
        self.unix_seconds.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.unix_seconds.load(Ordering::SeqCst))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        clock.advance(5);
        assert_eq!(clock.now_unix(), 1_005);
        clock.set(2_000);
        assert_eq!(clock.now_unix(), 2_000);
    }
}
