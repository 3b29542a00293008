//! One direction of a transfer and the state its stream, control and
//! supervisor share.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::control::TransferControl;
use crate::error::{CopyError, TransferError};
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::meter::{Meter, Metered};
use crate::sampler::{Gauge, Sampler};
use crate::stat::{Phase, TransferStat};
use crate::state::PhaseTracker;
use crate::throttle::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    /// Phase the state machine enters when this leg moves its first byte.
    pub fn phase(self) -> Phase {
        match self {
            Self::Upload => Phase::Uploading,
            Self::Download => Phase::Downloading,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

pub(crate) struct LegInner {
    direction: Direction,
    id: Uuid,
    pub(crate) meter: Arc<Meter>,
    pub(crate) limiter: Arc<RateLimiter>,
    sampler: Sampler,
    content_length: AtomicI64,
    stop_requested: AtomicBool,
    cause: Mutex<Option<TransferError>>,
    // Runs once, after the meter is cancelled. Closes whatever the copy
    // worker may be blocked on.
    closer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    tracker: PhaseTracker,
    pub(crate) logger: Arc<dyn TransferLogger>,
}

/// Handle to a leg. Clones share the same counters.
#[derive(Clone)]
pub struct Leg {
    pub(crate) inner: Arc<LegInner>,
}

impl Leg {
    /// Standalone leg with its own transfer id and no session listening for
    /// phase changes.
    pub fn new(direction: Direction, config: &TransferConfig) -> Self {
        Self::attached(direction, config, Uuid::new_v4(), PhaseTracker::detached())
    }

    pub(crate) fn attached(
        direction: Direction,
        config: &TransferConfig,
        id: Uuid,
        tracker: PhaseTracker,
    ) -> Self {
        let limiter = RateLimiter::new(config.max_speed, config.tick_interval())
            .with_logger(config.logger.clone(), id);
        Self {
            inner: Arc::new(LegInner {
                direction,
                id,
                meter: Arc::new(Meter::new()),
                limiter: Arc::new(limiter),
                sampler: Sampler::new(),
                content_length: AtomicI64::new(0),
                stop_requested: AtomicBool::new(false),
                cause: Mutex::new(None),
                closer: Mutex::new(None),
                tracker,
                logger: config.logger.clone(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Starts the clock and records the expected length (`<= 0` for unknown).
    /// Returns false if the leg had already begun.
    pub fn begin(&self, content_length: i64) -> bool {
        self.inner.content_length.store(content_length, Ordering::Relaxed);
        if !self.inner.sampler.start(Instant::now()) {
            return false;
        }
        self.log(TransferEvent::LegStarted {
            direction: self.direction().as_str(),
            content_length,
        });
        true
    }

    pub fn content_length(&self) -> i64 {
        self.inner.content_length.load(Ordering::Relaxed)
    }

    /// Wraps a stream so its I/O is counted, paced and guarded by this leg.
    /// The first operation on the stream advances the state machine into this
    /// leg's phase.
    pub fn wrap<S>(&self, stream: S) -> Metered<S> {
        let tracker = self.inner.tracker.clone();
        let phase = self.direction().phase();
        self.inner.meter.on_first_activity(move || {
            tracker.advance(phase);
        });
        Metered::new(stream, self.inner.meter.clone(), self.inner.limiter.clone())
    }

    pub fn control(&self) -> TransferControl {
        TransferControl::new(self.clone())
    }

    pub fn bytes(&self) -> u64 {
        self.inner.meter.bytes()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.meter.is_cancelled()
    }

    pub(crate) fn request_stop(&self) -> bool {
        !self.inner.stop_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::Acquire)
    }

    /// Records `cause` (the first cause wins) and then cancels the stream.
    pub(crate) fn abort(&self, cause: TransferError) -> bool {
        let recorded = {
            let mut slot = self.inner.cause.lock();
            if slot.is_some() {
                false
            } else {
                *slot = Some(cause);
                true
            }
        };
        self.inner.meter.cancel();
        self.run_closer();
        recorded
    }

    /// Registers `close` to run when the leg is aborted, so a worker blocked
    /// in a read on the underlying source is released. Runs at once if the
    /// leg is already cancelled. Replaces any earlier hook.
    pub fn on_abort(&self, close: impl FnOnce() + Send + 'static) {
        if self.is_cancelled() {
            close();
            return;
        }
        *self.inner.closer.lock() = Some(Box::new(close));
        // An abort racing the registration may have missed the hook.
        if self.is_cancelled() {
            self.run_closer();
        }
    }

    fn run_closer(&self) {
        let close = self.inner.closer.lock().take();
        if let Some(close) = close {
            close();
        }
    }

    pub(crate) fn take_cause(&self) -> Option<TransferError> {
        self.inner.cause.lock().take()
    }

    fn gauge(&self) -> Gauge {
        Gauge {
            phase: self.inner.tracker.current(),
            bytes: self.bytes(),
            content_length: self.content_length(),
            paused: self.inner.meter.is_paused(),
            max_speed: self.inner.limiter.max_speed(),
        }
    }

    pub fn sample(&self) -> TransferStat {
        self.inner.sampler.sample(self.gauge())
    }

    pub fn peek(&self) -> TransferStat {
        self.inner.sampler.peek(self.gauge())
    }

    pub(crate) fn finalize(&self) -> TransferStat {
        let stat = self.inner.sampler.finalize(self.gauge());
        self.log(TransferEvent::LegFinished {
            direction: self.direction().as_str(),
            total_bytes: stat.bytes_transferred,
            duration_ms: stat.elapsed.as_millis() as u64,
            average_bps: stat.average_speed,
        });
        stat
    }

    /// Freezes the partial stat and pairs it with `cause`. I/O failures are
    /// logged as errors, everything else as an abort.
    pub(crate) fn fail(&self, cause: TransferError) -> CopyError {
        let stat = self.inner.sampler.freeze(self.gauge());
        match cause {
            TransferError::Source(_) | TransferError::Sink(_) | TransferError::Spawn(_) => {
                self.log(TransferEvent::Error {
                    message: cause.to_string(),
                })
            }
            _ => self.log(TransferEvent::Aborted {
                reason: cause.to_string(),
                bytes: stat.bytes_transferred,
            }),
        }
        CopyError::new(stat, cause)
    }

    pub(crate) fn log(&self, event: TransferEvent) {
        self.inner.logger.log(TransferLog {
            component: self.direction().as_str(),
            transfer_id: self.inner.id,
            event,
        });
    }
}

/// Sets up a standalone download-direction leg over `stream` and returns the
/// metered stream plus its control.
pub fn start_leg<S>(stream: S, content_length: i64, config: &TransferConfig) -> (Metered<S>, TransferControl) {
    let leg = Leg::new(Direction::Download, config);
    leg.begin(content_length);
    (leg.wrap(stream), leg.control())
}
