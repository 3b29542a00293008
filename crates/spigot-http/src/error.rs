use std::io;
use std::path::PathBuf;
use std::time::Duration;

use spigot_core::{CopyError, TransferError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error(transparent)]
    Config(TransferError),

    #[error(transparent)]
    Dial(TransferError),

    #[error(transparent)]
    Transfer(#[from] CopyError),

    #[error("http transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("server answered {status}")]
    Status { status: u16 },

    #[error("cannot read request body {path:?}: {source}")]
    Body {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open sink {path:?}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// The transfer-level cause, if this failure has one.
    pub fn transfer_error(&self) -> Option<&TransferError> {
        match self {
            Self::Config(e) | Self::Dial(e) => Some(e),
            Self::Transfer(e) => Some(&e.error),
            _ => None,
        }
    }

    /// Maps a reqwest failure; connect failures become dial errors.
    pub(crate) fn from_reqwest(err: reqwest::Error, dial_timeout: Option<Duration>) -> Self {
        if err.is_connect() {
            if err.is_timeout() {
                return Self::Dial(TransferError::DialTimeout(dial_timeout.unwrap_or_default()));
            }
            return Self::Dial(TransferError::DialFailed(Box::new(err)));
        }
        Self::Transport(err)
    }
}
