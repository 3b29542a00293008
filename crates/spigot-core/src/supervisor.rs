//! Timeout supervisor.
//!
//! A [`Session`] owns the caller's progress callback and the state machine for
//! one transfer. Blocking work (dialing, the HTTP exchange, the byte pump) runs
//! on a worker thread while the calling thread ticks at the callback interval:
//!
//! ```text
//! caller thread                        worker thread
//! ─────────────                        ─────────────
//! select! {                            pump(source, metered sink)
//!   done   -> finalize, return           │ guard / budget / count
//!   phase  -> Update::Phase               ▼
//!   tick   -> sample, callback,        done_tx.send(result)
//!             idle, deadline, stop
//! }
//! ```
//!
//! An abort records its cause on the leg, cancels the leg's stream, waits at
//! most one tick for the worker to unwind and returns the recorded cause. A
//! worker stuck inside a blocking read is left detached.

use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded, select, tick};
use serde::Serialize;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{CallbackError, CopyError, TransferError};
use crate::leg::{Direction, Leg};
use crate::logging::{TransferEvent, TransferLog};
use crate::meter::is_cancellation;
use crate::stat::{Phase, TransferStat};
use crate::state::PhaseTracker;

/// What a progress callback receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Update {
    Phase(Phase),
    Progress(TransferStat),
}

pub type ProgressFn = Box<dyn FnMut(&Update) -> Result<(), CallbackError> + Send>;

/// A successful copy: the final stat and the sink handed back.
#[derive(Debug)]
pub struct Copied<W> {
    pub stat: TransferStat,
    pub bytes: u64,
    pub sink: W,
}

enum PumpError {
    Source(io::Error),
    Sink(io::Error),
}

/// Copies until end of stream, keeping source and sink failures apart.
fn pump<R: Read, W: Write>(source: &mut R, sink: &mut W, buffer_size: usize) -> Result<u64, PumpError> {
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(PumpError::Source(e)),
        };
        sink.write_all(&buf[..n]).map_err(PumpError::Sink)?;
        total += n as u64;
    }
    sink.flush().map_err(PumpError::Sink)?;
    Ok(total)
}

fn spawn_worker<T, F>(name: String, work: F) -> Result<Receiver<T>, TransferError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            let _ = tx.send(work());
        })
        .map_err(TransferError::Spawn)?;
    Ok(rx)
}

/// What the tick loop enforces.
enum Guard<'a> {
    /// Connection setup: only the dial timeout and an explicit stop.
    Dial {
        timeout: Option<Duration>,
        stop: Option<&'a Leg>,
    },
    /// Byte pump: every check, idle armed from the start.
    Copy(&'a Leg),
    /// Request/response exchange: idle armed once the upload moved or the
    /// connect window has passed.
    Exchange(&'a Leg),
}

#[derive(Default)]
struct IdleClock {
    last_bytes: u64,
    ticks: u32,
}

impl IdleClock {
    /// Consecutive ticks without progress. Paused ticks reset the count.
    fn observe(&mut self, bytes: u64, paused: bool) -> u32 {
        if paused || bytes != self.last_bytes {
            self.last_bytes = bytes;
            self.ticks = 0;
        } else {
            self.ticks += 1;
        }
        self.ticks
    }
}

pub struct Session {
    id: Uuid,
    config: TransferConfig,
    tracker: PhaseTracker,
    phases: Receiver<Phase>,
    progress: Option<ProgressFn>,
    deadline: Option<Instant>,
    announced: Option<Phase>,
    closed: bool,
}

impl Session {
    pub fn new(config: TransferConfig) -> Self {
        let (tracker, phases) = PhaseTracker::channel();
        Self {
            id: Uuid::new_v4(),
            config,
            tracker,
            phases,
            progress: None,
            deadline: None,
            announced: None,
            closed: false,
        }
    }

    pub fn on_progress(mut self, callback: ProgressFn) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn set_progress(&mut self, callback: ProgressFn) {
        self.progress = Some(callback);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.tracker.current()
    }

    /// New leg sharing this session's id, logger and state machine.
    pub fn leg(&self, direction: Direction) -> Leg {
        Leg::attached(direction, &self.config, self.id, self.tracker.clone())
    }

    /// Moves the state machine forward; the notice is delivered on the next
    /// supervised wait or on [`close`](Self::close).
    pub fn advance(&self, to: Phase) {
        self.tracker.advance(to);
    }

    /// Absolute cutoff, resolved on the first supervised wait so that a
    /// relative deadline counts from the start of the transfer.
    fn deadline(&mut self) -> Option<Instant> {
        if self.deadline.is_none() {
            self.deadline = self.config.deadline.map(|d| d.resolve(Instant::now()));
        }
        self.deadline
    }

    fn emit(&mut self, update: &Update) -> Result<(), CallbackError> {
        if self.closed {
            return Ok(());
        }
        match self.progress.as_mut() {
            Some(callback) => callback(update),
            None => Ok(()),
        }
    }

    fn announce(&mut self, phase: Phase) -> Result<(), CallbackError> {
        if let Some(from) = self.announced.replace(phase) {
            self.config.logger.log(TransferLog {
                component: "session",
                transfer_id: self.id,
                event: TransferEvent::PhaseChanged { from, to: phase },
            });
        }
        self.emit(&Update::Phase(phase))
    }

    fn drain_phases(&mut self) -> Result<(), CallbackError> {
        while let Ok(phase) = self.phases.try_recv() {
            self.announce(phase)?;
        }
        Ok(())
    }

    /// Runs `work` (which performs the dial) on a worker and waits for it,
    /// ticking `Connecting` progress. Only the dial timeout and a stop on
    /// `stop` can cut the wait short.
    pub fn await_dial<T, F>(&mut self, stop: Option<&Leg>, work: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce() -> io::Result<T> + Send + 'static,
    {
        let timeout = self.config.dial_timeout;
        let started = Instant::now();
        let done = spawn_worker(format!("spigot-dial-{}", self.id.simple()), work)?;
        match self.watch(Guard::Dial { timeout, stop }, &done)? {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(TransferError::DialTimeout(
                timeout.unwrap_or_else(|| started.elapsed()),
            )),
            Err(e) => Err(TransferError::DialFailed(Box::new(e))),
        }
    }

    /// Runs a request/response exchange on a worker while ticking the upload
    /// leg. Returns whatever the worker produced.
    pub fn supervise_exchange<T, F>(&mut self, leg: &Leg, work: F) -> Result<T, CopyError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        leg.begin(leg.content_length());
        let name = format!("spigot-{}-{}", leg.direction().as_str(), self.id.simple());
        let done = spawn_worker(name, work).map_err(|e| leg.fail(e))?;
        let value = self
            .watch(Guard::Exchange(leg), &done)
            .map_err(|e| leg.fail(e))?;
        if let Some(cause) = leg.take_cause() {
            return Err(leg.fail(cause));
        }
        Ok(value)
    }

    /// Copies `source` into `sink` through the leg's instrumented stream on a
    /// worker thread, supervising it until end of stream or abort.
    pub fn supervise_copy<R, W>(&mut self, leg: &Leg, source: R, sink: W) -> Result<Copied<W>, CopyError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        leg.begin(leg.content_length());
        let mut source = source;
        let mut sink = leg.wrap(sink);
        let buffer_size = self.config.buffer_size;

        let name = format!("spigot-{}-{}", leg.direction().as_str(), self.id.simple());
        let done = spawn_worker(name, move || {
            let result = pump(&mut source, &mut sink, buffer_size);
            (result, sink)
        })
        .map_err(|e| leg.fail(e))?;

        let (result, sink) = self.watch(Guard::Copy(leg), &done).map_err(|e| leg.fail(e))?;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => return Err(leg.fail(classify(leg, err))),
        };
        // A cancelled stream can look like a clean end of stream.
        if let Some(cause) = leg.take_cause() {
            return Err(leg.fail(cause));
        }
        let stat = self
            .finish_leg(leg)
            .map_err(|e| leg.fail(TransferError::CallbackAborted(e)))?;
        Ok(Copied {
            stat,
            bytes,
            sink: sink.into_inner(),
        })
    }

    /// Finalizes a completed leg and reports its final stat.
    pub fn finish_leg(&mut self, leg: &Leg) -> Result<TransferStat, CallbackError> {
        self.drain_phases()?;
        let stat = leg.finalize();
        self.emit(&Update::Progress(stat.clone()))?;
        Ok(stat)
    }

    /// Enters `Closed` and delivers any outstanding phase notices. Nothing is
    /// emitted afterwards. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.tracker.advance(Phase::Closed);
        if let Err(e) = self.drain_phases() {
            tracing::debug!(transfer_id = %self.id, "progress callback failed while closing: {}", e);
        }
        self.closed = true;
    }

    fn watch<T>(&mut self, guard: Guard<'_>, done: &Receiver<T>) -> Result<T, TransferError> {
        self.deadline();
        let ticker = tick(self.config.tick_interval());
        let phases = self.phases.clone();
        let started = Instant::now();
        let mut idle = IdleClock::default();
        loop {
            select! {
                recv(done) -> msg => {
                    let value = msg.map_err(|_| TransferError::Cancelled)?;
                    self.drain_phases().map_err(TransferError::CallbackAborted)?;
                    return Ok(value);
                }
                recv(phases) -> phase => {
                    if let Ok(phase) = phase {
                        if let Err(e) = self.announce(phase) {
                            return Err(self.abort(&guard, done, TransferError::CallbackAborted(e)));
                        }
                    }
                }
                recv(ticker) -> _ => {
                    if let Err(cause) = self.check(&guard, started, &mut idle) {
                        return Err(self.abort(&guard, done, cause));
                    }
                }
            }
        }
    }

    /// One tick: sample, callback, idle, deadline, stop.
    fn check(&mut self, guard: &Guard<'_>, started: Instant, idle: &mut IdleClock) -> Result<(), TransferError> {
        let interval = self.config.tick_interval();
        match *guard {
            Guard::Dial { timeout, stop } => {
                let mut stat = TransferStat::pending(Phase::Connecting);
                stat.elapsed = started.elapsed();
                self.emit(&Update::Progress(stat))
                    .map_err(TransferError::CallbackAborted)?;
                if let Some(limit) = timeout {
                    if started.elapsed() >= limit {
                        return Err(TransferError::DialTimeout(limit));
                    }
                }
                if stop.is_some_and(|leg| leg.is_stop_requested()) {
                    return Err(TransferError::UserStop);
                }
            }
            Guard::Copy(leg) | Guard::Exchange(leg) => {
                let stat = leg.sample();
                let (bytes, paused) = (stat.bytes_transferred, stat.paused);
                self.emit(&Update::Progress(stat))
                    .map_err(TransferError::CallbackAborted)?;

                let idle_armed = matches!(guard, Guard::Copy(_))
                    || self.tracker.current() > Phase::Connecting
                    || started.elapsed() >= self.config.dial_timeout.unwrap_or(Duration::ZERO);
                if let Some(limit) = self.config.idle_timeout.filter(|_| idle_armed) {
                    let ticks = idle.observe(bytes, paused);
                    if interval * ticks >= limit {
                        return Err(TransferError::IdleReadTimeout(limit));
                    }
                }
                if self.deadline().is_some_and(|d| Instant::now() >= d) {
                    return Err(TransferError::DeadlineExceeded);
                }
                if leg.is_stop_requested() {
                    return Err(TransferError::UserStop);
                }
            }
        }
        Ok(())
    }

    fn abort<T>(&self, guard: &Guard<'_>, done: &Receiver<T>, cause: TransferError) -> TransferError {
        match *guard {
            Guard::Dial { .. } => cause,
            Guard::Copy(leg) | Guard::Exchange(leg) => {
                // Cancels the stream and runs the leg's close hook, which
                // releases a worker blocked in a read. Wait one tick for it,
                // then detach.
                leg.abort(cause);
                let _ = done.recv_timeout(self.config.tick_interval());
                leg.take_cause().unwrap_or(TransferError::Cancelled)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// The cause recorded on the leg wins over whatever the pump tripped on.
fn classify(leg: &Leg, err: PumpError) -> TransferError {
    if let Some(cause) = leg.take_cause() {
        return cause;
    }
    match err {
        PumpError::Sink(e) if is_cancellation(&e) => TransferError::Cancelled,
        PumpError::Sink(e) => TransferError::Sink(e),
        PumpError::Source(e) => TransferError::Source(e),
    }
}
