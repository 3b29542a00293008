//! Progress sampler: turns live counters into [`TransferStat`] snapshots.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::stat::{Phase, TransferStat};

/// Completion fraction, clamped to `[0, 1]`. `None` when the length is unknown.
pub fn percent(bytes: u64, content_length: i64) -> Option<f64> {
    if content_length <= 0 {
        return None;
    }
    Some((bytes as f64 / content_length as f64).clamp(0.0, 1.0))
}

/// Bytes per second; zero when no time has elapsed.
pub fn rate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs) as u64
}

/// Live inputs the sampler reads on every call.
#[derive(Debug, Clone, Copy)]
pub struct Gauge {
    pub phase: Phase,
    pub bytes: u64,
    pub content_length: i64,
    pub paused: bool,
    pub max_speed: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    bytes: u64,
    at: Instant,
}

#[derive(Default)]
struct State {
    last: Option<Snapshot>,
    frozen: Option<TransferStat>,
}

#[derive(Default)]
pub struct Sampler {
    started_at: OnceLock<Instant>,
    state: Mutex<State>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of the leg. Only the first call has any effect.
    pub fn start(&self, at: Instant) -> bool {
        if self.started_at.set(at).is_err() {
            return false;
        }
        self.state.lock().last = Some(Snapshot { bytes: 0, at });
        true
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen.is_some()
    }

    fn compute(&self, g: &Gauge, last: Option<Snapshot>, now: Instant) -> TransferStat {
        let elapsed = self
            .started_at()
            .map(|s| now.saturating_duration_since(s))
            .unwrap_or(Duration::ZERO);
        let speed = last
            .map(|l| {
                rate(
                    g.bytes.saturating_sub(l.bytes),
                    now.saturating_duration_since(l.at),
                )
            })
            .unwrap_or(0);
        TransferStat {
            phase: g.phase,
            bytes_transferred: g.bytes,
            content_length: g.content_length,
            percent: percent(g.bytes, g.content_length),
            speed,
            average_speed: rate(g.bytes, elapsed),
            max_speed: g.max_speed,
            elapsed,
            paused: g.paused,
            finished: false,
        }
    }

    /// Tick sample: computes speeds against the previous snapshot, then moves
    /// the snapshot forward. A frozen sampler returns the frozen stat.
    pub fn sample(&self, g: Gauge) -> TransferStat {
        let now = Instant::now();
        let mut state = self.state.lock();
        if let Some(frozen) = &state.frozen {
            return frozen.clone();
        }
        let stat = self.compute(&g, state.last, now);
        state.last = Some(Snapshot { bytes: g.bytes, at: now });
        stat
    }

    /// Like [`sample`](Self::sample) but leaves the snapshot untouched.
    pub fn peek(&self, g: Gauge) -> TransferStat {
        let now = Instant::now();
        let state = self.state.lock();
        if let Some(frozen) = &state.frozen {
            return frozen.clone();
        }
        self.compute(&g, state.last, now)
    }

    /// Freezes the final stat of a completed leg. Later calls return the
    /// first result.
    pub fn finalize(&self, g: Gauge) -> TransferStat {
        let now = Instant::now();
        let mut state = self.state.lock();
        if let Some(frozen) = &state.frozen {
            return frozen.clone();
        }
        let mut stat = self.compute(&g, state.last, now);
        if g.content_length > 0 {
            stat.percent = Some(1.0);
        }
        stat.speed = stat.average_speed;
        stat.paused = false;
        stat.finished = true;
        state.frozen = Some(stat.clone());
        stat
    }

    /// Freezes the partial stat of an aborted leg.
    pub fn freeze(&self, g: Gauge) -> TransferStat {
        let now = Instant::now();
        let mut state = self.state.lock();
        if let Some(frozen) = &state.frozen {
            return frozen.clone();
        }
        let stat = self.compute(&g, state.last, now);
        state.frozen = Some(stat.clone());
        stat
    }
}
