//! One-call helpers: open a URL as a reader, or fetch it into memory, a file
//! or a writer.
//!
//! Besides `http://` and `https://`, `tcp://host:port` fetches whatever the
//! peer sends until it closes the connection.

use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::path::PathBuf;
use std::sync::Arc;

use spigot_core::{
    CallbackError, Direction, Leg, Session, TransferConfig, TransferControl, TransferError,
    TransferStat, Update,
};

use crate::dial::{self, Dialer, TcpDialer};
use crate::error::FetchError;
use crate::request::{self, Request, default_user_agent};
use crate::sink::Sink;

fn tcp_addr(url: &str) -> Option<&str> {
    url.strip_prefix("tcp://").map(|rest| rest.trim_end_matches('/'))
}

/// Opens `url` and returns the unmetered body reader with its length
/// (`-1` when unknown). Only the connect step is bounded by the config.
pub fn open(url: &str, config: &TransferConfig) -> Result<(Box<dyn Read + Send>, i64), FetchError> {
    if let Some(addr) = tcp_addr(url) {
        let stream = TcpDialer::default()
            .dial(addr, config.dial_timeout)
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut => {
                    FetchError::Dial(TransferError::DialTimeout(config.dial_timeout.unwrap_or_default()))
                }
                _ => FetchError::Dial(TransferError::DialFailed(Box::new(e))),
            })?;
        return Ok((Box::new(stream), -1));
    }
    let parsed = request::parse_url(url)?;
    let response = request::client(config, &default_user_agent())?
        .get(parsed)
        .send()
        .map_err(|e| FetchError::from_reqwest(e, config.dial_timeout))?;
    if !response.status().is_success() {
        return Err(FetchError::Status {
            status: response.status().as_u16(),
        });
    }
    let length = response.content_length().map(|l| l as i64).unwrap_or(-1);
    Ok((Box::new(response), length))
}

/// Result of a completed download.
#[derive(Debug)]
pub struct Download {
    pub stat: TransferStat,
    /// Present when the sink was an in-memory buffer.
    pub body: Option<Vec<u8>>,
}

fn fetch_into(url: &str, sink: Sink, config: TransferConfig) -> Result<Download, FetchError> {
    if let Some(addr) = tcp_addr(url) {
        return TcpFetch::new(addr, config).sink(sink).run();
    }
    let response = Request::get(url)
        .config(config)
        .sink(sink)
        .send()?
        .error_for_status()?;
    Ok(Download {
        stat: response.download,
        body: response.body,
    })
}

pub fn fetch_bytes(url: &str, config: TransferConfig) -> Result<Vec<u8>, FetchError> {
    Ok(fetch_into(url, Sink::Buffer, config)?.body.unwrap_or_default())
}

pub fn fetch_string(url: &str, config: TransferConfig) -> Result<String, FetchError> {
    let bytes = fetch_bytes(url, config)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn fetch_file(url: &str, path: impl Into<PathBuf>, config: TransferConfig) -> Result<TransferStat, FetchError> {
    Ok(fetch_into(url, Sink::File(path.into()), config)?.stat)
}

pub fn fetch_to_writer(
    url: &str,
    writer: impl Write + Send + 'static,
    config: TransferConfig,
) -> Result<TransferStat, FetchError> {
    Ok(fetch_into(url, Sink::Writer(Box::new(writer)), config)?.stat)
}

/// Supervised download of a raw TCP stream: dial, then read until the peer
/// closes.
pub struct TcpFetch {
    addr: String,
    sink: Sink,
    dialer: Arc<dyn Dialer>,
    session: Session,
    leg: Leg,
}

impl TcpFetch {
    pub fn new(addr: impl Into<String>, config: TransferConfig) -> Self {
        let session = Session::new(config);
        let leg = session.leg(Direction::Download);
        Self {
            addr: addr.into(),
            sink: Sink::Buffer,
            dialer: Arc::new(TcpDialer::default()),
            session,
            leg,
        }
    }

    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
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

    pub fn run(self) -> Result<Download, FetchError> {
        let TcpFetch {
            addr,
            sink,
            dialer,
            mut session,
            leg,
        } = self;
        session.config().validate().map_err(FetchError::Config)?;
        let stream = dial::dial(&mut session, dialer, &addr, Some(&leg)).map_err(FetchError::Dial)?;
        // Shutting the socket down wakes a copy worker stuck in read and
        // tells the peer we are gone.
        let closer = stream
            .try_clone()
            .map_err(|e| FetchError::Dial(TransferError::DialFailed(Box::new(e))))?;
        leg.on_abort(move || {
            let _ = closer.shutdown(Shutdown::Both);
        });

        leg.begin(-1);
        let path = sink.path().cloned().unwrap_or_default();
        let writer = sink.open().map_err(|source| FetchError::Sink { path, source })?;
        let copied = session.supervise_copy(&leg, stream, writer)?;
        session.close();
        Ok(Download {
            stat: copied.stat,
            body: copied.sink.into_body(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_urls_are_recognised() {
        assert_eq!(tcp_addr("tcp://127.0.0.1:9000"), Some("127.0.0.1:9000"));
        assert_eq!(tcp_addr("tcp://host:1/"), Some("host:1"));
        assert_eq!(tcp_addr("http://host:1/"), None);
    }
}
