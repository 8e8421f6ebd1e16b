use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Process-wide "last run" gate for a trigger surface.
///
/// Starts at the Unix epoch, so the first call always passes. This only bounds
/// redundant work; expiry stays correct with no throttle at all.
#[derive(Debug)]
pub struct Throttle {
    last_run_ms: AtomicI64,
    interval_ms: i64,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_run_ms: AtomicI64::new(0),
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Claim a run at `now`. Returns false if another run was claimed less
    /// than one interval ago. Concurrent callers racing for the same slot get
    /// exactly one `true`.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let now_ms = now.timestamp_millis();
        let mut last = self.last_run_ms.load(Ordering::Acquire);
        loop {
            if self.interval_ms > 0 && now_ms.saturating_sub(last) < self.interval_ms {
                return false;
            }
            match self.last_run_ms.compare_exchange_weak(
                last,
                now_ms,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => {
                    if self.interval_ms == 0 {
                        return true;
                    }
                    last = current;
                }
            }
        }
    }
}
