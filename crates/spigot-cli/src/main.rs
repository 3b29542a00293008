use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use spigot_core::{CallbackError, Deadline, TransferConfig, TransferControl, Update, pretty};
use spigot_http::{Method, Request, Sink, TcpFetch};

#[derive(Debug, Parser)]
#[command(name = "spigot")]
#[command(version)]
#[command(about = "Pausable, throttled, timeout-supervised downloads")]
struct Args {
    /// http://, https:// or tcp://host:port
    #[arg(env = "SPIGOT_URL")]
    url: String,

    /// Write the body here instead of stdout
    #[arg(short, long, env = "SPIGOT_OUTPUT")]
    output: Option<PathBuf>,

    /// Bytes per second, with an optional K/M/G suffix (0 = unlimited)
    #[arg(long, env = "SPIGOT_MAX_SPEED", value_parser = parse_size)]
    max_speed: Option<u64>,

    /// Dial and idle timeout together, in seconds
    #[arg(long, env = "SPIGOT_TIMEOUT", value_parser = parse_secs)]
    timeout: Option<Duration>,

    #[arg(long, env = "SPIGOT_DIAL_TIMEOUT", value_parser = parse_secs)]
    dial_timeout: Option<Duration>,

    #[arg(long, env = "SPIGOT_IDLE_TIMEOUT", value_parser = parse_secs)]
    idle_timeout: Option<Duration>,

    /// Abort the whole transfer after this many seconds
    #[arg(long, env = "SPIGOT_DEADLINE", value_parser = parse_secs)]
    deadline: Option<Duration>,

    /// Seconds between progress reports
    #[arg(long, env = "SPIGOT_INTERVAL", value_parser = parse_secs, default_value = "1")]
    interval: Duration,

    #[arg(short = 'X', long = "request", env = "SPIGOT_METHOD")]
    method: Option<String>,

    /// Extra header, 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header", env = "SPIGOT_HEADERS", value_delimiter = '\n')]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long = "data", env = "SPIGOT_DATA", conflicts_with = "upload_file")]
    data: Option<String>,

    /// Upload this file as the request body
    #[arg(short = 'T', long = "upload-file", env = "SPIGOT_UPLOAD_FILE")]
    upload_file: Option<PathBuf>,

    /// Progress as JSON lines on stderr
    #[arg(long, env = "SPIGOT_JSON")]
    json: bool,
}

fn parse_size(s: &str) -> Result<u64, String> {
    pretty::parse_size(s).ok_or_else(|| format!("invalid size {s:?}, expected e.g. 512K or 1.5M"))
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.trim().parse().map_err(|_| format!("invalid seconds {s:?}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("seconds must be a non-negative number, got {s:?}"));
    }
    Ok(Duration::from_secs_f64(secs))
}

impl Args {
    fn config(&self) -> TransferConfig {
        let mut config = TransferConfig::new().with_callback_interval(self.interval);
        if let Some(t) = self.timeout {
            config = config.with_timeout(t);
        }
        if let Some(t) = self.dial_timeout {
            config = config.with_dial_timeout(t);
        }
        if let Some(t) = self.idle_timeout {
            config = config.with_idle_timeout(t);
        }
        if let Some(d) = self.deadline {
            config = config.with_deadline(Deadline::After(d));
        }
        if let Some(bps) = self.max_speed {
            config = config.with_max_speed(bps);
        }
        config
    }

    fn sink(&self) -> Sink {
        match &self.output {
            Some(path) => Sink::File(path.clone()),
            None => Sink::Writer(Box::new(io::stdout())),
        }
    }

    fn method(&self) -> Result<Method> {
        match &self.method {
            Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
                .with_context(|| format!("invalid method {m:?}")),
            None if self.upload_file.is_some() => Ok(Method::PUT),
            None if self.data.is_some() => Ok(Method::POST),
            None => Ok(Method::GET),
        }
    }
}

/// Progress reporter writing to stderr, leaving stdout for the body.
fn reporter(json: bool) -> impl FnMut(&Update) -> Result<(), CallbackError> + Send + 'static {
    move |update| {
        let mut err = io::stderr().lock();
        if json {
            writeln!(err, "{}", serde_json::to_string(update)?)?;
        } else {
            match update {
                Update::Phase(phase) => writeln!(err, "[{phase}]")?,
                Update::Progress(stat) => writeln!(err, "{stat}")?,
            }
        }
        Ok(())
    }
}

/// Reads `p`, `r`, `s` and `l <size>` lines from stdin and applies them.
fn spawn_commands(control: TransferControl) -> Result<()> {
    thread::Builder::new()
        .name("spigot-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let mut parts = line.split_whitespace();
                match parts.next() {
                    Some("p") => control.pause(),
                    Some("r") => control.resume(),
                    Some("s") => {
                        control.stop();
                        break;
                    }
                    Some("l") => match parts.next().and_then(pretty::parse_size) {
                        Some(0) => control.set_max_speed(None),
                        Some(bps) => control.set_max_speed(Some(bps)),
                        None => warn!("usage: l <size>, e.g. l 500K (l 0 lifts the limit)"),
                    },
                    Some(other) => warn!(command = other, "unknown command, expected p, r, s or l <size>"),
                    None => {}
                }
            }
        })
        .context("spawning stdin reader")?;
    Ok(())
}

fn run_tcp(args: &Args, addr: &str) -> Result<()> {
    let fetch = TcpFetch::new(addr, args.config())
        .sink(args.sink())
        .on_progress(reporter(args.json));
    spawn_commands(fetch.control())?;
    let download = fetch.run()?;
    info!(addr, stat = %download.stat, "done");
    Ok(())
}

fn run_http(args: &Args) -> Result<()> {
    let mut request = Request::new(args.method()?, args.url.as_str())
        .config(args.config())
        .sink(args.sink())
        .on_progress(reporter(args.json));
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("malformed header {header:?}, expected 'Name: value'"))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = &args.data {
        request = request.body_string(data.as_str());
    } else if let Some(path) = &args.upload_file {
        request = request.upload_file(path.clone());
    }

    let call = request.build();
    spawn_commands(call.control_download())?;
    let response = call.send()?;
    info!(
        status = response.status.as_u16(),
        uploaded = response.upload.bytes_transferred,
        stat = %response.download,
        "done",
    );
    if !response.status.is_success() {
        bail!("server answered {}", response.status);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Load .env if present, before clap reads SPIGOT_* variables
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spigot=info,spigot_core=info,spigot_http=info".into()),
        )
        .init();

    let args = Args::parse();
    args.config().validate()?;

    match args.url.strip_prefix("tcp://") {
        Some(addr) => run_tcp(&args, addr.trim_end_matches('/')),
        None => run_http(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_accept_fractions() {
        assert_eq!(parse_secs("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_secs("0").unwrap(), Duration::ZERO);
        assert!(parse_secs("-1").is_err());
        assert!(parse_secs("soon").is_err());
    }

    #[test]
    fn options_build_the_config() {
        let args = Args::parse_from([
            "spigot",
            "http://localhost/",
            "--max-speed",
            "1M",
            "--timeout",
            "5",
            "--idle-timeout",
            "2",
            "--interval",
            "0.25",
        ]);
        let config = args.config();
        assert_eq!(config.max_speed, Some(1 << 20));
        assert_eq!(config.dial_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(args.method().unwrap(), Method::GET);
    }

    #[test]
    fn body_options_pick_a_method() {
        let post = Args::parse_from(["spigot", "http://h/", "-d", "x=1"]);
        assert_eq!(post.method().unwrap(), Method::POST);
        let put = Args::parse_from(["spigot", "http://h/", "-T", "f.bin"]);
        assert_eq!(put.method().unwrap(), Method::PUT);
        let explicit = Args::parse_from(["spigot", "http://h/", "-X", "delete"]);
        assert_eq!(explicit.method().unwrap(), Method::DELETE);
    }

    #[test]
    fn data_and_upload_conflict() {
        let res = Args::try_parse_from(["spigot", "http://h/", "-d", "x", "-T", "f"]);
        assert!(res.is_err());
    }
}
