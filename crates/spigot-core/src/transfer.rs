//! One-shot supervised copy between an arbitrary source and sink.

use std::io::{Read, Write};

use uuid::Uuid;

use crate::config::TransferConfig;
use crate::control::TransferControl;
use crate::error::{CallbackError, CopyError};
use crate::leg::{Direction, Leg};
use crate::supervisor::{Copied, Session, Update};

/// A download-direction copy with progress, throttle and timeouts.
///
/// ```no_run
/// use std::io::Read;
/// use std::time::Duration;
/// use spigot_core::{Transfer, TransferConfig, Update};
///
/// let config = TransferConfig::new().with_idle_timeout(Duration::from_secs(30));
/// let transfer = Transfer::new(config).on_progress(|u: &Update| {
///     if let Update::Progress(stat) = u {
///         eprintln!("{stat}");
///     }
///     Ok(())
/// });
/// // hand this to another thread to pause, resume or stop
/// let _control = transfer.control();
/// let copied = transfer.copy(std::io::repeat(0).take(1024), 1024, Vec::new());
/// assert!(copied.is_ok());
/// ```
pub struct Transfer {
    session: Session,
    leg: Leg,
}

impl Transfer {
    pub fn new(config: TransferConfig) -> Self {
        let session = Session::new(config);
        let leg = session.leg(Direction::Download);
        Self { session, leg }
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Update) -> Result<(), CallbackError> + Send + 'static,
    {
        self.session.set_progress(Box::new(callback));
        self
    }

    pub fn control(&self) -> TransferControl {
        self.leg.control()
    }

    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    /// Copies `source` into `sink` until end of stream. `content_length <= 0`
    /// means the size is unknown.
    pub fn copy<R, W>(mut self, source: R, content_length: i64, sink: W) -> Result<Copied<W>, CopyError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if let Err(e) = self.session.config().validate() {
            return Err(self.leg.fail(e));
        }
        self.leg.begin(content_length);
        let result = self.session.supervise_copy(&self.leg, source, sink);
        self.session.close();
        result
    }
}

/// [`Transfer::copy`] without a callback or control handle.
pub fn copy<R, W>(source: R, content_length: i64, sink: W, config: TransferConfig) -> Result<Copied<W>, CopyError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    Transfer::new(config).copy(source, content_length, sink)
}
