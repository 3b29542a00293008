use crate::error::TransferError;
use crate::leg::Leg;
use crate::logging::TransferEvent;
use crate::stat::TransferStat;

/// Caller-side handle for steering a running leg. Cheap to clone; every clone
/// steers the same leg.
#[derive(Clone)]
pub struct TransferControl {
    leg: Leg,
}

impl TransferControl {
    pub(crate) fn new(leg: Leg) -> Self {
        Self { leg }
    }

    /// Requests the leg to stop. Returns immediately; the copy halts at the
    /// next buffer boundary and the transfer fails with `UserStop`.
    pub fn stop(&self) {
        if self.leg.request_stop() {
            self.leg.log(TransferEvent::StopRequested);
        }
        self.leg.abort(TransferError::UserStop);
    }

    /// Blocks the leg's next read or write until [`resume`](Self::resume).
    pub fn pause(&self) {
        if self.leg.inner.meter.pause() {
            self.leg.log(TransferEvent::Paused { bytes: self.leg.bytes() });
        }
    }

    pub fn resume(&self) {
        if self.leg.inner.meter.resume() {
            self.leg.log(TransferEvent::Resumed { bytes: self.leg.bytes() });
        }
    }

    /// Changes the throttle; `None` removes it. Takes effect when the next
    /// rate window opens.
    pub fn set_max_speed(&self, bytes_per_second: Option<u64>) {
        let new = bytes_per_second.filter(|&b| b > 0);
        let old = self.leg.inner.limiter.set_max_speed(new);
        if old != new {
            self.leg.log(TransferEvent::RateChanged { old_bps: old, new_bps: new });
        }
    }

    pub fn max_speed(&self) -> Option<u64> {
        self.leg.inner.limiter.max_speed()
    }

    /// Current status without disturbing the supervisor's speed sampling.
    pub fn stat(&self) -> TransferStat {
        self.leg.peek()
    }

    pub fn is_paused(&self) -> bool {
        self.leg.inner.meter.is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.leg.is_stop_requested()
    }

    pub fn leg(&self) -> &Leg {
        &self.leg
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use crate::config::TransferConfig;
    use crate::leg::{Direction, Leg};
    use crate::logging::tests::RecordingLogger;
    use crate::meter::is_cancellation;

    #[test]
    fn stop_cancels_and_records_user_stop() {
        let leg = Leg::new(Direction::Download, &TransferConfig::new().quiet());
        let control = leg.control();
        let mut sink = leg.wrap(Vec::new());
        sink.write_all(b"before").unwrap();

        control.stop();
        assert!(control.is_stopped());
        let err = sink.write(b"after").unwrap_err();
        assert!(is_cancellation(&err));
        assert_eq!(control.stat().bytes_transferred, 6);
        assert!(matches!(leg.take_cause(), Some(crate::TransferError::UserStop)));
    }

    #[test]
    fn controls_log_only_real_changes() {
        let logger = Arc::new(RecordingLogger::default());
        let config = TransferConfig::new().with_logger(logger.clone());
        let control = Leg::new(Direction::Download, &config).control();

        control.pause();
        control.pause();
        assert!(control.is_paused());
        control.resume();
        control.resume();
        control.set_max_speed(Some(1024));
        control.set_max_speed(Some(1024));
        control.set_max_speed(Some(0));
        assert_eq!(control.max_speed(), None);
        control.stop();
        control.stop();

        let lines = logger.lines.lock().clone();
        assert_eq!(
            lines,
            [
                "paused bytes=0",
                "resumed bytes=0",
                "rate_changed old=unlimited new=1024",
                "rate_changed old=1024 new=unlimited",
                "stop_requested",
            ]
        );
    }
}
