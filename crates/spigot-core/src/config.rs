//! Typed transfer configuration.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::TransferError;
use crate::logging::{NullLogger, TracingLogger, TransferLogger};

pub const DEFAULT_CALLBACK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Absolute cutoff for a whole transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Wall-clock instant.
    At(DateTime<Utc>),
    /// Offset from the moment the transfer starts.
    After(Duration),
}

impl Deadline {
    /// Converts to a monotonic instant, given when the transfer started.
    /// A wall-clock deadline already in the past resolves to "now".
    pub fn resolve(&self, started: Instant) -> Instant {
        match *self {
            Deadline::After(offset) => started + offset,
            Deadline::At(at) => {
                let left = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                Instant::now() + left
            }
        }
    }
}

/// Per-transfer settings. Every limit is off unless set.
#[derive(Clone)]
pub struct TransferConfig {
    // Max time to establish the connection.
    pub dial_timeout: Option<Duration>,
    // Max time without any byte moving on the active leg.
    pub idle_timeout: Option<Duration>,
    // Hard stop regardless of progress.
    pub deadline: Option<Deadline>,
    // Tick period for callbacks, timeout checks and throttle windows (default 1s).
    pub callback_interval: Option<Duration>,
    // Bytes per second; None = unlimited.
    pub max_speed: Option<u64>,
    // Copy buffer size in bytes.
    pub buffer_size: usize,
    // Destination for structured transfer events.
    pub logger: Arc<dyn TransferLogger>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            idle_timeout: None,
            deadline: None,
            callback_interval: None,
            max_speed: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            logger: Arc::new(TracingLogger),
        }
    }
}

impl fmt::Debug for TransferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferConfig")
            .field("dial_timeout", &self.dial_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("deadline", &self.deadline)
            .field("callback_interval", &self.callback_interval)
            .field("max_speed", &self.max_speed)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero disables the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = non_zero(timeout);
        self
    }

    /// Zero disables the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = non_zero(timeout);
        self
    }

    /// Sets both the dial and the idle timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_dial_timeout(timeout).with_idle_timeout(timeout)
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_callback_interval(mut self, interval: Duration) -> Self {
        self.callback_interval = Some(interval);
        self
    }

    /// Zero means unlimited.
    pub fn with_max_speed(mut self, bytes_per_second: u64) -> Self {
        self.max_speed = (bytes_per_second > 0).then_some(bytes_per_second);
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Shorthand for `with_logger(Arc::new(NullLogger))`.
    pub fn quiet(self) -> Self {
        self.with_logger(Arc::new(NullLogger))
    }

    /// Effective tick period.
    pub fn tick_interval(&self) -> Duration {
        self.callback_interval.unwrap_or(DEFAULT_CALLBACK_INTERVAL)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.callback_interval.is_some_and(|i| i.is_zero()) {
            return Err(TransferError::InvalidConfig(
                "callback interval must be greater than zero".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(TransferError::InvalidConfig(
                "buffer size must be greater than zero".into(),
            ));
        }
        if self.max_speed == Some(0) {
            return Err(TransferError::InvalidConfig(
                "max speed of zero would never move a byte; use None for unlimited".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unlimited() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.dial_timeout, None);
        assert_eq!(cfg.idle_timeout, None);
        assert_eq!(cfg.deadline, None);
        assert_eq!(cfg.max_speed, None);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert_eq!(cfg.buffer_size, 32 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn timeout_shorthand_sets_dial_and_idle() {
        let cfg = TransferConfig::new().with_timeout(Duration::from_secs(7));
        assert_eq!(cfg.dial_timeout, Some(Duration::from_secs(7)));
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(7)));
    }

    #[test]
    fn zero_values_disable_limits() {
        let cfg = TransferConfig::new()
            .with_timeout(Duration::ZERO)
            .with_max_speed(0);
        assert_eq!(cfg.dial_timeout, None);
        assert_eq!(cfg.idle_timeout, None);
        assert_eq!(cfg.max_speed, None);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = TransferConfig::new().with_callback_interval(Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(TransferError::InvalidConfig(_))));

        let cfg = TransferConfig::new().with_buffer_size(0);
        assert!(matches!(cfg.validate(), Err(TransferError::InvalidConfig(_))));
    }

    #[test]
    fn relative_deadline_resolves_from_start() {
        let start = Instant::now();
        let at = Deadline::After(Duration::from_secs(5)).resolve(start);
        assert_eq!(at - start, Duration::from_secs(5));
    }

    #[test]
    fn past_wall_clock_deadline_resolves_to_now() {
        let before = Instant::now();
        let past = Utc::now() - chrono::Duration::seconds(30);
        let at = Deadline::At(past).resolve(before);
        assert!(at >= before);
        assert!(at <= Instant::now());
    }
}
