// Time - Single authoritative time accessor
// The same reading feeds lockup end-time math and the relock rate limiter,
// so every component must consult this trait rather than the OS clock.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of the engine's notion of "now" (unix seconds).
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven time source for tests and simulation. Cloned handles
/// share the same underlying instant.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_shared_handles() {
        let clock = ManualTimeSource::new(1_000);
        let handle = clock.clone();
        assert_eq!(handle.now(), 1_000);

        clock.advance(86_400);
        assert_eq!(handle.now(), 87_400);

        handle.set(500);
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn test_system_time_is_nonzero() {
        assert!(SystemTimeSource.now() > 1_600_000_000);
    }
}
