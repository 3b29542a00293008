use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::stat::TransferStat;

/// Error a progress callback may return to abort the transfer.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Why a transfer ended without reaching end of stream.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("dial failed: {0}")]
    DialFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("no data received for {0:?}")]
    IdleReadTimeout(Duration),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("user stops")]
    UserStop,

    #[error("progress callback aborted: {0}")]
    CallbackAborted(#[source] CallbackError),

    #[error("sink error: {0}")]
    Sink(#[source] io::Error),

    #[error("source error: {0}")]
    Source(#[source] io::Error),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] io::Error),
}

impl TransferError {
    /// True for the three timeout causes.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::DialTimeout(_) | Self::IdleReadTimeout(_) | Self::DeadlineExceeded
        )
    }

    /// Short tag used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DialFailed(_) => "dial_failed",
            Self::DialTimeout(_) => "dial_timeout",
            Self::IdleReadTimeout(_) => "idle_read_timeout",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::UserStop => "user_stop",
            Self::CallbackAborted(_) => "callback_aborted",
            Self::Sink(_) => "sink_error",
            Self::Source(_) => "source_error",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Spawn(_) => "spawn_failed",
        }
    }
}

/// A failed leg: the partial stat frozen at abort time plus the one cause.
#[derive(Debug, Error)]
#[error("{error} (after {} bytes)", stat.bytes_transferred)]
pub struct CopyError {
    pub stat: TransferStat,
    #[source]
    pub error: TransferError,
}

impl CopyError {
    pub fn new(stat: TransferStat, error: TransferError) -> Self {
        Self { stat, error }
    }

    pub fn into_inner(self) -> TransferError {
        self.error
    }
}
