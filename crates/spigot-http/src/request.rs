//! HTTP request builder and the supervised call it produces.
//!
//! A call runs through the full state machine: the exchange (connect, send
//! headers and body, wait for the response head) is supervised against the
//! upload leg, then the response body is copied into the sink under the
//! download leg.

use std::io::{Read, Write};
use std::path::PathBuf;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use spigot_core::{
    CallbackError, CopyError, Direction, Leg, Phase, ProgressFn, Session, TransferConfig,
    TransferControl, TransferError, TransferStat, Update,
};

use crate::body::{Body, Tee};
use crate::error::FetchError;
use crate::sink::Sink;

pub fn default_user_agent() -> String {
    format!("spigot/{}", env!("CARGO_PKG_VERSION"))
}

pub struct Request {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    user_agent: String,
    body: Body,
    sink: Sink,
    trace: Option<Box<dyn Write + Send>>,
    config: TransferConfig,
    progress: Option<ProgressFn>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            user_agent: default_user_agent(),
            body: Body::Empty,
            sink: Sink::Buffer,
            trace: None,
            config: TransferConfig::default(),
            progress: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn body_string(self, body: impl Into<String>) -> Self {
        self.body(Body::Bytes(body.into().into_bytes()))
    }

    pub fn upload_file(self, path: impl Into<PathBuf>) -> Self {
        self.body(Body::File(path.into()))
    }

    pub fn multipart_file(self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.body(Body::Multipart {
            field: field.into(),
            path: path.into(),
        })
    }

    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    pub fn save_to_file(self, path: impl Into<PathBuf>) -> Self {
        self.sink(Sink::File(path.into()))
    }

    pub fn save_to_writer(self, writer: impl Write + Send + 'static) -> Self {
        self.sink(Sink::Writer(Box::new(writer)))
    }

    /// Copies the request body, as it is sent, into `writer`.
    pub fn trace_body(mut self, writer: impl Write + Send + 'static) -> Self {
        self.trace = Some(Box::new(writer));
        self
    }

    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Update) -> Result<(), CallbackError> + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Freezes the builder into a call whose legs can be controlled before
    /// and during [`Call::send`].
    pub fn build(self) -> Call {
        let mut session = Session::new(self.config.clone());
        if let Some(progress) = self.progress {
            session.set_progress(progress);
        }
        let upload = session.leg(Direction::Upload);
        let download = session.leg(Direction::Download);
        Call {
            session,
            upload,
            download,
            method: self.method,
            url: self.url,
            headers: self.headers,
            user_agent: self.user_agent,
            body: self.body,
            sink: self.sink,
            trace: self.trace,
        }
    }

    pub fn send(self) -> Result<Response, FetchError> {
        self.build().send()
    }
}

pub struct Call {
    session: Session,
    upload: Leg,
    download: Leg,
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    user_agent: String,
    body: Body,
    sink: Sink,
    trace: Option<Box<dyn Write + Send>>,
}

#[derive(Debug)]
pub struct Response {
    pub status: reqwest::StatusCode,
    pub headers: HeaderMap,
    /// Present when the sink was an in-memory buffer.
    pub body: Option<Vec<u8>>,
    pub upload: TransferStat,
    pub download: TransferStat,
}

impl Response {
    pub fn text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(FetchError::Status {
                status: self.status.as_u16(),
            });
        }
        Ok(self)
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| FetchError::InvalidHeader(format!("{}: {}", name, value)))?;
        map.append(name, value);
    }
    Ok(map)
}

pub(crate) fn client(config: &TransferConfig, user_agent: &str) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(None::<std::time::Duration>);
    if let Some(t) = config.dial_timeout {
        builder = builder.connect_timeout(t);
    }
    builder.build().map_err(FetchError::Transport)
}

pub(crate) fn parse_url(url: &str) -> Result<reqwest::Url, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn callback_failed(leg: &Leg, e: CallbackError) -> FetchError {
    FetchError::Transfer(CopyError::new(leg.peek(), TransferError::CallbackAborted(e)))
}

impl Call {
    /// Steers the request body upload.
    pub fn control_upload(&self) -> TransferControl {
        self.upload.control()
    }

    /// Steers the response body download.
    pub fn control_download(&self) -> TransferControl {
        self.download.control()
    }

    pub fn send(self) -> Result<Response, FetchError> {
        let Call {
            mut session,
            upload,
            download,
            method,
            url,
            headers,
            user_agent,
            body,
            sink,
            trace,
        } = self;
        let config = session.config().clone();
        config.validate().map_err(FetchError::Config)?;
        let url = parse_url(&url)?;
        let headers = header_map(&headers)?;
        let client = client(&config, &user_agent)?;

        let mut request = client.request(method, url).headers(headers);
        if let Some(payload) = body.open()? {
            upload.begin(payload.length as i64);
            let reader: Box<dyn Read + Send> = match trace {
                Some(trace) => Box::new(Tee::new(payload.reader, trace)),
                None => payload.reader,
            };
            if let Some(ct) = payload.content_type {
                request = request.header(CONTENT_TYPE, ct);
            }
            request = request.body(reqwest::blocking::Body::sized(upload.wrap(reader), payload.length));
        } else {
            upload.begin(0);
        }

        // Connect, upload, wait for the response head.
        let response = session
            .supervise_exchange(&upload, move || request.send())?
            .map_err(|e| FetchError::from_reqwest(e, config.dial_timeout))?;
        let upload_stat = session
            .finish_leg(&upload)
            .map_err(|e| callback_failed(&upload, e))?;

        // A bodiless request still passes through Uploading.
        session.advance(Phase::Downloading);
        let status = response.status();
        let response_headers = response.headers().clone();
        download.begin(response.content_length().map(|l| l as i64).unwrap_or(-1));

        let path = sink.path().cloned().unwrap_or_default();
        let writer = sink.open().map_err(|source| FetchError::Sink { path, source })?;
        let copied = session.supervise_copy(&download, response, writer)?;
        session.close();

        tracing::debug!(
            transfer_id = %session.id(),
            status = status.as_u16(),
            uploaded = upload_stat.bytes_transferred,
            downloaded = copied.bytes,
            "request finished",
        );
        Ok(Response {
            status,
            headers: response_headers,
            body: copied.sink.into_body(),
            upload: upload_stat,
            download: copied.stat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_version() {
        assert!(default_user_agent().starts_with("spigot/"));
    }

    #[test]
    fn headers_are_validated() {
        let ok = header_map(&[("X-Token".into(), " abc ".into())]).unwrap();
        assert_eq!(ok["x-token"], "abc");
        let bad = header_map(&[("bad header".into(), "v".into())]);
        assert!(matches!(bad, Err(FetchError::InvalidHeader(_))));
    }

    #[test]
    fn only_http_schemes_are_accepted() {
        assert!(parse_url("http://localhost/x").is_ok());
        assert!(parse_url("https://example.com").is_ok());
        assert!(matches!(parse_url("ftp://example.com"), Err(FetchError::InvalidUrl { .. })));
        assert!(matches!(parse_url("not a url"), Err(FetchError::InvalidUrl { .. })));
    }

    #[test]
    fn status_errors_are_opt_in() {
        let response = Response {
            status: reqwest::StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: Some(b"missing".to_vec()),
            upload: TransferStat::pending(Phase::Closed),
            download: TransferStat::pending(Phase::Closed),
        };
        assert_eq!(response.text(), "missing");
        assert!(matches!(
            response.error_for_status(),
            Err(FetchError::Status { status: 404 })
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_connecting() {
        let err = Request::get("http://127.0.0.1:9/")
            .config(TransferConfig::new().quiet().with_buffer_size(0))
            .send()
            .unwrap_err();
        assert!(matches!(err, FetchError::Config(TransferError::InvalidConfig(_))));
    }
}
