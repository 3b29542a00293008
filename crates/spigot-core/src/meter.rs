//! Instrumented stream.
//!
//! [`Metered`] wraps a reader or writer and, before every operation, runs the
//! shared [`Meter`] guard: stop if cancelled, fire the first-activity hook,
//! block while paused. After the guard the leg's [`RateLimiter`] hands out a
//! byte budget, and whatever the inner stream actually moved is counted.
//!
//! Cancellation is cooperative: it takes effect at the next buffer boundary.
//! A cancelled reader reports end of stream; a cancelled writer fails with an
//! `io::Error` wrapping [`Cancelled`] (see [`is_cancellation`]).

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::throttle::RateLimiter;

type ActivityHook = Box<dyn FnOnce() + Send>;

/// Marker error carried by writes refused after cancellation.
#[derive(Debug, Error)]
#[error("transfer cancelled")]
pub struct Cancelled;

/// True if `err` was produced by a cancelled [`Metered`] writer.
pub fn is_cancellation(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Cancelled>())
}

fn cancelled_error() -> io::Error {
    io::Error::other(Cancelled)
}

/// Counters and flags shared between a leg's stream, its control and the
/// supervisor.
pub struct Meter {
    bytes: AtomicU64,
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    hook_armed: AtomicBool,
    hook: Mutex<Option<ActivityHook>>,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            hook_armed: AtomicBool::new(false),
            hook: Mutex::new(None),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sets the cancellation flag and wakes any paused waiter.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _paused = self.paused.lock();
        self.resumed.notify_all();
    }

    /// Returns false if already paused.
    pub fn pause(&self) -> bool {
        let mut paused = self.paused.lock();
        !std::mem::replace(&mut *paused, true)
    }

    /// Returns false if not paused.
    pub fn resume(&self) -> bool {
        let mut paused = self.paused.lock();
        let was = std::mem::replace(&mut *paused, false);
        self.resumed.notify_all();
        was
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Installs a hook run once, by whichever thread performs the next guarded
    /// operation. Replaces a hook that has not fired yet.
    pub fn on_first_activity(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
        self.hook_armed.store(true, Ordering::Release);
    }

    fn guard(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        if self.hook_armed.swap(false, Ordering::AcqRel) {
            let hook = self.hook.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        let mut paused = self.paused.lock();
        while *paused && !self.is_cancelled() {
            self.resumed.wait(&mut paused);
        }
        drop(paused);
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }

    fn record(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// A stream whose every read or write passes through a [`Meter`] and a
/// [`RateLimiter`].
pub struct Metered<S> {
    inner: S,
    meter: Arc<Meter>,
    limiter: Arc<RateLimiter>,
}

impl<S> Metered<S> {
    pub fn new(inner: S, meter: Arc<Meter>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, meter, limiter }
    }

    pub fn bytes(&self) -> u64 {
        self.meter.bytes()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<R: Read> Read for Metered<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.meter.guard().is_err() {
            return Ok(0);
        }
        let budget = self.limiter.budget(buf.len());
        if self.meter.is_cancelled() {
            return Ok(0);
        }
        let n = self.inner.read(&mut buf[..budget])?;
        self.limiter.record(n);
        self.meter.record(n);
        Ok(n)
    }
}

impl<W: Write> Write for Metered<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.meter.guard().map_err(|_| cancelled_error())?;
        let budget = self.limiter.budget(buf.len());
        if self.meter.is_cancelled() {
            return Err(cancelled_error());
        }
        let n = self.inner.write(&buf[..budget])?;
        self.limiter.record(n);
        self.meter.record(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
