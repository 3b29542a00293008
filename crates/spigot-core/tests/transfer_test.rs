/// Integration tests: supervised copies with pause, stop, throttle and
/// timeouts, driven from a second thread the way a UI would.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use spigot_core::{
    CallbackError, Deadline, Phase, Transfer, TransferConfig, TransferError, Update, copy,
    start_leg,
};

fn config() -> TransferConfig {
    TransferConfig::new()
        .quiet()
        .with_callback_interval(Duration::from_millis(100))
}

fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Progress callback that keeps every update it is handed.
fn recording() -> (
    Arc<Mutex<Vec<Update>>>,
    impl FnMut(&Update) -> Result<(), CallbackError> + Send + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let callback = move |u: &Update| {
        log.lock().push(u.clone());
        Ok::<(), CallbackError>(())
    };
    (seen, callback)
}

fn last_is_closed(seen: &Mutex<Vec<Update>>) -> bool {
    matches!(seen.lock().last(), Some(Update::Phase(Phase::Closed)))
}

/// Hands out one chunk, then blocks until the gate closes.
struct Stalled {
    first: Option<Vec<u8>>,
    gate: Receiver<()>,
}

impl Read for Stalled {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(chunk) = self.first.take() {
            buf[..chunk.len()].copy_from_slice(&chunk);
            return Ok(chunk.len());
        }
        let _ = self.gate.recv();
        Ok(0)
    }
}

#[test]
fn ten_mebibytes_end_to_end_to_file() {
    let size = 10 * 1024 * 1024;
    let data = pattern(size);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");
    let file = fs::File::create(&path).unwrap();

    let copied = copy(Cursor::new(data.clone()), size as i64, file, config()).unwrap();
    drop(copied.sink);

    assert_eq!(copied.bytes, size as u64);
    assert_eq!(copied.stat.bytes_transferred, size as u64);
    assert_eq!(copied.stat.percent, Some(1.0));
    assert!(copied.stat.finished);
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn callback_sees_ordered_phases_and_monotonic_bytes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let transfer = Transfer::new(config().with_max_speed(2_000_000)).on_progress(move |u: &Update| {
        log.lock().push(u.clone());
        Ok(())
    });
    transfer
        .copy(io::repeat(7).take(600_000), 600_000, io::sink())
        .unwrap();

    let seen = seen.lock();
    let phases: Vec<Phase> = seen
        .iter()
        .filter_map(|u| match u {
            Update::Phase(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(phases, Phase::ORDER);

    let bytes: Vec<u64> = seen
        .iter()
        .filter_map(|u| match u {
            Update::Progress(s) => Some(s.bytes_transferred),
            _ => None,
        })
        .collect();
    assert!(bytes.len() >= 2, "expected tick progress, got {:?}", bytes);
    assert!(bytes.windows(2).all(|w| w[0] <= w[1]), "{:?}", bytes);
    assert_eq!(bytes.last(), Some(&600_000));
}

#[test]
fn pause_freezes_bytes_and_elapsed_includes_pause() {
    // 1 MiB at 2 MB/s takes about half a second unpaused
    let transfer = Transfer::new(config().with_max_speed(2_000_000).with_buffer_size(8192));
    let control = transfer.control();
    let handle = thread::spawn(move || transfer.copy(io::repeat(1).take(1 << 20), 1 << 20, io::sink()));

    thread::sleep(Duration::from_millis(150));
    control.pause();
    // a write already granted before the pause may still land
    thread::sleep(Duration::from_millis(150));
    let frozen = control.stat().bytes_transferred;
    assert!(control.stat().paused);

    thread::sleep(Duration::from_millis(400));
    assert_eq!(control.stat().bytes_transferred, frozen);
    control.resume();

    let copied = handle.join().unwrap().unwrap();
    assert_eq!(copied.bytes, 1 << 20);
    assert!(
        copied.stat.elapsed >= Duration::from_millis(550),
        "elapsed {:?}",
        copied.stat.elapsed
    );
}

#[test]
fn stop_ends_within_one_buffer_with_user_stop() {
    let buffer = 16 * 1024;
    let (seen, callback) = recording();
    let transfer = Transfer::new(config().with_max_speed(1_000_000).with_buffer_size(buffer))
        .on_progress(callback);
    let control = transfer.control();
    let handle = thread::spawn(move || transfer.copy(io::repeat(0), -1, io::sink()));

    thread::sleep(Duration::from_millis(300));
    let at_stop = control.stat().bytes_transferred;
    control.stop();
    assert!(control.is_stopped());

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err.error, TransferError::UserStop), "{}", err);
    assert!(err.stat.bytes_transferred >= at_stop);
    assert!(
        err.stat.bytes_transferred <= at_stop + 2 * buffer as u64,
        "{} bytes after stop at {}",
        err.stat.bytes_transferred,
        at_stop
    );
    assert!(last_is_closed(&seen), "{:?}", seen.lock().last());
}

#[test]
fn throttled_transfer_stopped_early_moves_proportional_bytes() {
    // 1 MB/s, stopped after half a second: roughly half a megabyte moved
    let transfer = Transfer::new(config().with_max_speed(1_000_000));
    let control = transfer.control();
    let handle = thread::spawn(move || {
        transfer.copy(io::repeat(0).take(10_000_000), 10_000_000, io::sink())
    });

    thread::sleep(Duration::from_millis(500));
    control.stop();

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err.error, TransferError::UserStop));
    let moved = err.stat.bytes_transferred;
    assert!((300_000..=800_000).contains(&moved), "moved {}", moved);
    assert!(err.stat.percent.unwrap() < 0.1);
}

#[test]
fn rate_limit_bounds_throughput() {
    let limit = 1_000_000u64;
    let interval = Duration::from_millis(100);
    let start = Instant::now();
    let copied = copy(
        io::repeat(3).take(500_000),
        500_000,
        io::sink(),
        config().with_max_speed(limit),
    )
    .unwrap();
    let elapsed = start.elapsed();

    // at most one window's quota ahead of the limit at any point
    let allowed = limit as f64 * (elapsed + interval).as_secs_f64();
    assert!((copied.bytes as f64) <= allowed, "{} bytes in {:?}", copied.bytes, elapsed);
    assert!(elapsed >= Duration::from_millis(380), "elapsed {:?}", elapsed);
}

#[test]
fn raising_the_limit_mid_transfer_speeds_it_up() {
    let transfer = Transfer::new(config().with_max_speed(100_000));
    let control = transfer.control();
    let handle = thread::spawn(move || {
        transfer.copy(io::repeat(0).take(5_000_000), 5_000_000, io::sink())
    });

    thread::sleep(Duration::from_millis(250));
    assert_eq!(control.stat().max_speed, Some(100_000));
    control.set_max_speed(None);

    let copied = handle.join().unwrap().unwrap();
    assert_eq!(copied.bytes, 5_000_000);
    assert!(copied.stat.elapsed < Duration::from_secs(3), "{:?}", copied.stat.elapsed);
    assert_eq!(copied.stat.max_speed, None);
}

#[test]
fn idle_timeout_fires_on_stalled_source() {
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let source = Stalled {
        first: Some(vec![9u8; 1000]),
        gate: gate_rx,
    };
    let (seen, callback) = recording();
    let start = Instant::now();
    let err = Transfer::new(config().with_idle_timeout(Duration::from_millis(300)))
        .on_progress(callback)
        .copy(source, 10_000, Vec::new())
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err.error, TransferError::IdleReadTimeout(_)), "{}", err);
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "elapsed {:?}", elapsed);
    assert_eq!(err.stat.bytes_transferred, 1000);
    assert_eq!(err.stat.percent, Some(0.1));
    assert!(last_is_closed(&seen), "{:?}", seen.lock().last());
    drop(gate_tx);
}

#[test]
fn paused_transfer_does_not_idle_out() {
    let transfer = Transfer::new(
        config()
            .with_idle_timeout(Duration::from_millis(300))
            .with_max_speed(2_000_000),
    );
    let control = transfer.control();
    control.pause();
    let handle = thread::spawn(move || transfer.copy(io::repeat(0).take(200_000), 200_000, io::sink()));

    thread::sleep(Duration::from_millis(700));
    control.resume();
    let copied = handle.join().unwrap().unwrap();
    assert_eq!(copied.bytes, 200_000);
}

#[test]
fn deadline_aborts_unbounded_source() {
    let (seen, callback) = recording();
    let start = Instant::now();
    let err = Transfer::new(
        config()
            .with_max_speed(1_000_000)
            .with_deadline(Deadline::After(Duration::from_millis(300))),
    )
    .on_progress(callback)
    .copy(io::repeat(0), -1, io::sink())
    .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err.error, TransferError::DeadlineExceeded), "{}", err);
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "elapsed {:?}", elapsed);
    assert!(err.stat.bytes_transferred > 0);
    assert_eq!(err.stat.percent, None);
    assert!(last_is_closed(&seen), "{:?}", seen.lock().last());
}

#[test]
fn failing_callback_still_hears_closed_last() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let err = Transfer::new(config().with_max_speed(1_000_000))
        .on_progress(move |u: &Update| {
            log.lock().push(u.clone());
            match u {
                Update::Progress(_) => Err("no more".into()),
                Update::Phase(_) => Ok(()),
            }
        })
        .copy(io::repeat(0), -1, io::sink())
        .unwrap_err();

    assert!(matches!(err.error, TransferError::CallbackAborted(_)), "{}", err);
    let seen = seen.lock();
    let progress = seen.iter().filter(|u| matches!(u, Update::Progress(_))).count();
    assert_eq!(progress, 1);
    assert!(matches!(seen.last(), Some(Update::Phase(Phase::Closed))));
}

#[test]
fn sink_and_source_errors_keep_their_side() {
    #[derive(Debug)]
    struct FailAfter(usize);
    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.0 == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.0);
            self.0 -= n;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    let err = copy(io::repeat(0), -1, FailAfter(5000), config()).unwrap_err();
    assert!(matches!(err.error, TransferError::Sink(_)), "{}", err);
    assert_eq!(err.stat.bytes_transferred, 5000);

    struct Reset;
    impl Read for Reset {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))
        }
    }
    let err = copy(Reset, -1, Vec::new(), config()).unwrap_err();
    match err.error {
        TransferError::Source(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected source error, got {}", other),
    }
}

#[test]
fn standalone_leg_reports_quarter_progress() {
    let (mut sink, control) = start_leg(Vec::new(), 1000, &config());
    sink.write_all(&[0u8; 250]).unwrap();
    let stat = control.stat();
    assert_eq!(stat.percent, Some(0.25));
    assert_eq!(stat.phase, Phase::Downloading);
    assert_eq!(sink.into_inner().len(), 250);
}
