//! Structured transfer logging.
//!
//! Legs, controls and the supervisor report lifecycle events through a
//! [`TransferLogger`] so that embedders can route them somewhere other than
//! the process log (a UI console, a remote collector) or drop them entirely.

use std::fmt;

use uuid::Uuid;

use crate::stat::Phase;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub transfer_id: Uuid,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// State machine moved forward
    PhaseChanged { from: Phase, to: Phase },
    /// A leg started counting
    LegStarted {
        direction: &'static str,
        content_length: i64,
    },
    /// Dial finished
    Dialed { addr: String, duration_ms: u64 },
    Paused { bytes: u64 },
    Resumed { bytes: u64 },
    /// Throttle changed; `None` means unlimited
    RateChanged {
        old_bps: Option<u64>,
        new_bps: Option<u64>,
    },
    /// Writer slept because the window quota ran out
    Throttled { waited_ms: u64 },
    StopRequested,
    /// Supervisor or control aborted the leg
    Aborted { reason: String, bytes: u64 },
    /// Leg reached end of stream
    LegFinished {
        direction: &'static str,
        total_bytes: u64,
        duration_ms: u64,
        average_bps: u64,
    },
    /// Source or sink failed
    Error { message: String },
}

fn bps(rate: &Option<u64>) -> String {
    match rate {
        Some(r) => r.to_string(),
        None => "unlimited".to_string(),
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseChanged { from, to } => write!(f, "phase_changed from={} to={}", from, to),
            Self::LegStarted { direction, content_length } => {
                write!(f, "leg_started direction={} length={}", direction, content_length)
            }
            Self::Dialed { addr, duration_ms } => {
                write!(f, "dialed addr={} duration_ms={}", addr, duration_ms)
            }
            Self::Paused { bytes } => write!(f, "paused bytes={}", bytes),
            Self::Resumed { bytes } => write!(f, "resumed bytes={}", bytes),
            Self::RateChanged { old_bps, new_bps } => {
                write!(f, "rate_changed old={} new={}", bps(old_bps), bps(new_bps))
            }
            Self::Throttled { waited_ms } => write!(f, "throttled waited_ms={}", waited_ms),
            Self::StopRequested => f.write_str("stop_requested"),
            Self::Aborted { reason, bytes } => {
                write!(f, "aborted reason=\"{}\" bytes={}", reason, bytes)
            }
            Self::LegFinished { direction, total_bytes, duration_ms, average_bps } => write!(
                f,
                "leg_finished direction={} bytes={} duration_ms={} avg_bps={}",
                direction, total_bytes, duration_ms, average_bps
            ),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing, feed a
/// UI, or discard entries.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // info for lifecycle, warn for aborts, debug for per-window chatter
        match &entry.event {
            TransferEvent::Aborted { .. } | TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    transfer_id = %entry.transfer_id,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::Throttled { .. } | TransferEvent::PhaseChanged { .. } => {
                tracing::debug!(
                    component = entry.component,
                    transfer_id = %entry.transfer_id,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::info!(
                    component = entry.component,
                    transfer_id = %entry.transfer_id,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
