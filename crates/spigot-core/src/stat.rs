//! Observable status of one transfer leg.
//!
//! A `TransferStat` is always a copy-out snapshot: it is built by the
//! [`Sampler`](crate::sampler::Sampler) from the leg's live counters and never
//! aliases anything the copy thread is mutating.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::pretty;

/// States of the transfer state machine, in the only order they may be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connecting,
    Uploading,
    Downloading,
    Closed,
}

impl Phase {
    /// All phases in state machine order.
    pub const ORDER: [Phase; 4] = [
        Phase::Connecting,
        Phase::Uploading,
        Phase::Downloading,
        Phase::Closed,
    ];

    /// Position of this phase in [`Phase::ORDER`].
    pub fn index(self) -> usize {
        match self {
            Self::Connecting => 0,
            Self::Uploading => 1,
            Self::Downloading => 2,
            Self::Closed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time status of a leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferStat {
    /// Current state machine phase.
    pub phase: Phase,
    /// Bytes moved through the instrumented stream so far.
    pub bytes_transferred: u64,
    /// Expected size; `<= 0` means unknown.
    pub content_length: i64,
    /// Completion fraction in `[0, 1]`, absent when the length is unknown.
    pub percent: Option<f64>,
    /// Instantaneous speed over the last tick, in bytes/second.
    pub speed: u64,
    /// Average speed since the leg started, in bytes/second.
    pub average_speed: u64,
    /// Active throttle, if any.
    pub max_speed: Option<u64>,
    /// Wall-clock time since the leg started (paused time included).
    pub elapsed: Duration,
    pub paused: bool,
    /// Set once the leg completed successfully and the values are frozen.
    pub finished: bool,
}

impl TransferStat {
    /// Status for a leg that has not moved any bytes yet.
    pub fn pending(phase: Phase) -> Self {
        Self {
            phase,
            bytes_transferred: 0,
            content_length: 0,
            percent: None,
            speed: 0,
            average_speed: 0,
            max_speed: None,
            elapsed: Duration::ZERO,
            paused: false,
            finished: false,
        }
    }

    pub fn is_length_known(&self) -> bool {
        self.content_length > 0
    }

    /// Bytes still expected, when the length is known.
    pub fn remaining(&self) -> Option<u64> {
        if !self.is_length_known() {
            return None;
        }
        Some((self.content_length as u64).saturating_sub(self.bytes_transferred))
    }

    /// Estimated time to completion at the average speed.
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.remaining()?;
        if self.average_speed == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            remaining as f64 / self.average_speed as f64,
        ))
    }
}

impl fmt::Display for TransferStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent {
            Some(p) => write!(f, "{}", pretty::percent(p))?,
            None => f.write_str("--")?,
        }
        write!(
            f,
            " {} {}/{} {}",
            pretty::speed(self.speed),
            pretty::size(self.bytes_transferred),
            pretty::length(self.content_length),
            pretty::duration(self.elapsed),
        )?;
        if self.paused {
            f.write_str(" (paused)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        for pair in Phase::ORDER.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].index() + 1, pair[1].index());
        }
        assert!(Phase::Closed.is_terminal());
        assert!(!Phase::Downloading.is_terminal());
    }

    #[test]
    fn display_with_known_length() {
        let stat = TransferStat {
            phase: Phase::Downloading,
            bytes_transferred: 3 * 1024 * 1024,
            content_length: 10 * 1024 * 1024,
            percent: Some(0.3),
            speed: 1200,
            average_speed: 1200,
            max_speed: None,
            elapsed: Duration::from_secs(66),
            paused: true,
            finished: false,
        };
        assert_eq!(stat.to_string(), "30.0% 1.2K/s 3.0M/10.0M 1:06 (paused)");
    }

    #[test]
    fn display_with_unknown_length() {
        let mut stat = TransferStat::pending(Phase::Downloading);
        stat.bytes_transferred = 512;
        assert_eq!(stat.to_string(), "-- 0B/s 512B/? 0:00");
        assert_eq!(stat.remaining(), None);
        assert_eq!(stat.eta(), None);
    }

    #[test]
    fn eta_from_average_speed() {
        let mut stat = TransferStat::pending(Phase::Downloading);
        stat.content_length = 1000;
        stat.bytes_transferred = 400;
        stat.average_speed = 200;
        assert_eq!(stat.remaining(), Some(600));
        assert_eq!(stat.eta(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn serializes_phase_as_snake_case() {
        let json = serde_json::to_value(TransferStat::pending(Phase::Uploading)).unwrap();
        assert_eq!(json["phase"], "uploading");
        assert!(json["percent"].is_null());
    }
}
