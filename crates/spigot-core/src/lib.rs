//! Instrumented, pausable, throttled, timeout-supervised byte transfer.
//!
//! The building blocks, leaf first:
//!
//! - [`meter`]: a `Read`/`Write` wrapper that counts bytes and honours
//!   pause and cancel before every operation.
//! - [`throttle`]: fixed-window rate limiter composed into the meter.
//! - [`sampler`]: turns counters into [`TransferStat`] snapshots.
//! - [`leg`] / [`control`]: one direction of a transfer and the handle a
//!   caller steers it with.
//! - [`state`]: the `Connecting -> Uploading -> Downloading -> Closed` machine.
//! - [`supervisor`]: runs work on a worker thread and enforces idle, deadline
//!   and dial timeouts while feeding the progress callback.
//! - [`transfer`]: the one-call "copy this into that" entry point.

pub mod config;
pub mod control;
pub mod error;
pub mod leg;
pub mod logging;
pub mod meter;
pub mod pretty;
pub mod sampler;
pub mod stat;
pub mod state;
pub mod supervisor;
pub mod throttle;
pub mod transfer;

pub use config::{Deadline, TransferConfig};
pub use control::TransferControl;
pub use error::{CallbackError, CopyError, TransferError};
pub use leg::{Direction, Leg, start_leg};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use meter::{Metered, is_cancellation};
pub use stat::{Phase, TransferStat};
pub use supervisor::{Copied, ProgressFn, Session, Update};
pub use transfer::{Transfer, copy};
