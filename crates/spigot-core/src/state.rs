//! Transfer state machine: `Connecting -> Uploading -> Downloading -> Closed`.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::stat::Phase;

/// Forward-only phase holder shared by the session and the legs' first-activity
/// hooks. Every phase passed through is published in order.
#[derive(Clone)]
pub struct PhaseTracker {
    current: Arc<Mutex<Phase>>,
    notify: Option<Sender<Phase>>,
}

impl PhaseTracker {
    /// Tracker nobody listens to.
    pub fn detached() -> Self {
        Self {
            current: Arc::new(Mutex::new(Phase::Connecting)),
            notify: None,
        }
    }

    /// Tracker plus the receiving end of its transition channel. The initial
    /// `Connecting` state is already queued on the channel.
    pub fn channel() -> (Self, Receiver<Phase>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _ = tx.send(Phase::Connecting);
        let tracker = Self {
            current: Arc::new(Mutex::new(Phase::Connecting)),
            notify: Some(tx),
        };
        (tracker, rx)
    }

    pub fn current(&self) -> Phase {
        *self.current.lock()
    }

    /// Moves forward to `to`, publishing every skipped phase first. Returns
    /// the previous phase, or `None` if `to` is not ahead of the current one.
    pub fn advance(&self, to: Phase) -> Option<Phase> {
        let mut current = self.current.lock();
        let from = *current;
        if to <= from {
            return None;
        }
        // publish under the lock so concurrent advances cannot reorder
        if let Some(tx) = &self.notify {
            for phase in &Phase::ORDER[from.index() + 1..=to.index()] {
                let _ = tx.send(*phase);
            }
        }
        *current = to;
        Some(from)
    }
}
