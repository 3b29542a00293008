//! TCP dialing, plain and supervised.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use spigot_core::{Leg, Session, TransferError, TransferEvent, TransferLog};

/// Something that can open a TCP connection.
pub trait Dialer: Send + Sync {
    fn dial(&self, addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream>;
}

/// Default dialer: tries each resolved address in turn.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub nodelay: bool,
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            nodelay: true,
            recv_buffer_size: None,
        }
    }
}

impl TcpDialer {
    fn connect(&self, addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        sock.set_nodelay(self.nodelay)?;
        if let Some(size) = self.recv_buffer_size {
            sock.set_recv_buffer_size(size)?;
        }
        match timeout {
            Some(t) => sock.connect_timeout(&addr.into(), t)?,
            None => sock.connect(&addr.into())?,
        }
        Ok(sock.into())
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let mut last_err = None;
        for resolved in addr.to_socket_addrs()? {
            match self.connect(resolved, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(addr = %resolved, "connect failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{addr} resolved to no addresses"))
        }))
    }
}

/// Dials `addr` under the session's dial timeout, emitting `Connecting`
/// progress while waiting. A stop on `stop` abandons the attempt.
pub fn dial(
    session: &mut Session,
    dialer: Arc<dyn Dialer>,
    addr: &str,
    stop: Option<&Leg>,
) -> Result<TcpStream, TransferError> {
    let timeout = session.config().dial_timeout;
    let target = addr.to_string();
    let started = Instant::now();
    let stream = session.await_dial(stop, move || dialer.dial(&target, timeout))?;
    session.config().logger.log(TransferLog {
        component: "dial",
        transfer_id: session.id(),
        event: TransferEvent::Dialed {
            addr: stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| addr.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    });
    Ok(stream)
}
