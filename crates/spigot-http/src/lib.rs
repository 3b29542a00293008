//! HTTP and raw TCP transfers on top of `spigot-core`.
//!
//! The HTTP protocol itself is reqwest's blocking client; this crate feeds it
//! a metered request body, copies the response through a metered sink and
//! maps its failures onto transfer errors.

pub mod body;
pub mod dial;
pub mod error;
pub mod fetch;
pub mod request;
pub mod sink;

pub use body::{Body, Payload, Tee};
pub use dial::{Dialer, TcpDialer, dial};
pub use error::FetchError;
pub use fetch::{Download, TcpFetch, fetch_bytes, fetch_file, fetch_string, fetch_to_writer, open};
pub use request::{Call, Request, Response, default_user_agent};
pub use sink::{Sink, SinkWriter};

pub use reqwest::{Method, StatusCode};
