//! Fixed-window rate limiter.
//!
//! Each window lasts one tick interval. When a window opens its quota is
//! fixed at `max_speed * interval`; I/O calls are granted at most the
//! remaining quota and the caller sleeps out the rest of the window once the
//! quota is gone. A speed change is picked up when the next window opens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::logging::{TransferEvent, TransferLog, TransferLogger};

struct Window {
    deadline: Instant,
    // None = unlimited for this window
    quota: Option<u64>,
    used: u64,
}

pub struct RateLimiter {
    // 0 = unlimited
    max_speed: AtomicU64,
    interval: Duration,
    window: Mutex<Window>,
    log: Option<(Arc<dyn TransferLogger>, Uuid)>,
}

impl RateLimiter {
    pub fn new(max_speed: Option<u64>, interval: Duration) -> Self {
        Self {
            max_speed: AtomicU64::new(max_speed.unwrap_or(0)),
            interval,
            // Expired on creation so the first grant opens a fresh window.
            window: Mutex::new(Window {
                deadline: Instant::now(),
                quota: None,
                used: 0,
            }),
            log: None,
        }
    }

    pub(crate) fn with_logger(mut self, logger: Arc<dyn TransferLogger>, transfer_id: Uuid) -> Self {
        self.log = Some((logger, transfer_id));
        self
    }

    pub fn max_speed(&self) -> Option<u64> {
        match self.max_speed.load(Ordering::Relaxed) {
            0 => None,
            v => Some(v),
        }
    }

    /// Stores a new limit and returns the previous one. `None` or `Some(0)`
    /// disables throttling.
    pub fn set_max_speed(&self, bytes_per_second: Option<u64>) -> Option<u64> {
        let old = self
            .max_speed
            .swap(bytes_per_second.unwrap_or(0), Ordering::Relaxed);
        (old != 0).then_some(old)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn open(&self, w: &mut Window, now: Instant) {
        w.deadline = now + self.interval;
        w.used = 0;
        w.quota = self.max_speed().map(|speed| {
            let q = (speed as f64 * self.interval.as_secs_f64()) as u64;
            q.max(1)
        });
    }

    /// Returns how many of `want` bytes may move now, sleeping until the next
    /// window if the current quota is used up. Never returns 0 for `want > 0`.
    pub fn budget(&self, want: usize) -> usize {
        let mut w = self.window.lock();
        loop {
            let now = Instant::now();
            if now >= w.deadline {
                self.open(&mut w, now);
            }
            let Some(quota) = w.quota else {
                return want;
            };
            if w.used < quota {
                let left = quota - w.used;
                return want.min(usize::try_from(left).unwrap_or(usize::MAX));
            }
            let wait = w.deadline.saturating_duration_since(now);
            MutexGuard::unlocked(&mut w, || thread::sleep(wait));
            if let Some((logger, id)) = &self.log {
                logger.log(TransferLog {
                    component: "throttle",
                    transfer_id: *id,
                    event: TransferEvent::Throttled {
                        waited_ms: wait.as_millis() as u64,
                    },
                });
            }
        }
    }

    /// Charges `n` bytes that actually moved against the current window.
    pub fn record(&self, n: usize) {
        self.window.lock().used += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(limiter: &RateLimiter, mut total: usize, chunk: usize) {
        while total > 0 {
            let n = limiter.budget(chunk.min(total));
            assert!(n > 0);
            limiter.record(n);
            total -= n;
        }
    }

    #[test]
    fn unlimited_grants_everything() {
        let limiter = RateLimiter::new(None, Duration::from_millis(100));
        let start = Instant::now();
        assert_eq!(limiter.budget(1 << 20), 1 << 20);
        drain(&limiter, 50 << 20, 1 << 20);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn grant_is_clamped_to_remaining_quota() {
        // 10_000 B/s over 100ms windows = 1000 bytes per window
        let limiter = RateLimiter::new(Some(10_000), Duration::from_millis(100));
        assert_eq!(limiter.budget(4096), 1000);
        limiter.record(600);
        assert_eq!(limiter.budget(4096), 400);
    }

    #[test]
    fn throughput_stays_under_the_limit() {
        // 100 KB/s, 100ms windows: 50 KB needs five windows, so >= 400ms
        let limiter = RateLimiter::new(Some(100_000), Duration::from_millis(100));
        let start = Instant::now();
        drain(&limiter, 50_000, 8192);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(380), "took {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }

    #[test]
    fn speed_change_applies_at_next_window() {
        let limiter = RateLimiter::new(Some(10_000), Duration::from_millis(50));
        assert_eq!(limiter.budget(100_000), 500);
        assert_eq!(limiter.set_max_speed(None), Some(10_000));
        // current window still carries the old quota
        assert_eq!(limiter.budget(100_000), 500);
        limiter.record(500);
        // quota exhausted: sleeps into a new, unlimited window
        assert_eq!(limiter.budget(100_000), 100_000);
        assert_eq!(limiter.max_speed(), None);
    }

    #[test]
    fn tiny_limits_still_make_progress() {
        let limiter = RateLimiter::new(Some(1), Duration::from_millis(10));
        assert_eq!(limiter.budget(10), 1);
    }
}
