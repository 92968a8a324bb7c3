//! # Progress Reporting
//!
//! A ticker thread samples the shared byte counter on a fixed interval and
//! hands snapshots to a [`ProgressReporter`]. It never touches the data path.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded, select, tick};
use tracing::{debug, warn};

use crate::constants::MIB;

/// Progress snapshot reported during a transfer.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub label: &'static str,
    pub bytes_done: u64,
    pub total_bytes: u64,
    /// Completion percentage (0.0 - 100.0)
    pub percent: f64,
    pub elapsed_seconds: f64,
    pub throughput_mib: f64,
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    pub fn capture(label: &'static str, total_bytes: u64, bytes_done: u64, start: Instant) -> Self {
        let elapsed_seconds = start.elapsed().as_secs_f64();
        let bytes_per_sec = if elapsed_seconds > 0.0 {
            bytes_done as f64 / elapsed_seconds
        } else {
            0.0
        };
        let eta_seconds = if bytes_per_sec > 0.0 && bytes_done < total_bytes {
            Some(((total_bytes - bytes_done) as f64 / bytes_per_sec).round() as u64)
        } else {
            None
        };
        Self {
            label,
            bytes_done,
            total_bytes,
            percent: percent_of(bytes_done, total_bytes),
            elapsed_seconds,
            throughput_mib: bytes_per_sec / MIB as f64,
            eta_seconds,
        }
    }

    /// `<LABEL> progress: <done>/<total> bytes (<percent>%)`
    pub fn status_line(&self) -> String {
        format!(
            "{} progress: {}/{} bytes ({:.2}%)",
            self.label, self.bytes_done, self.total_bytes, self.percent
        )
    }
}

/// An empty device counts as fully transferred.
pub fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Progress callback for long-running transfers.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);

    /// Called once when the transfer stops, successfully or not.
    fn on_finish(&self, snapshot: &ProgressSnapshot);
}

/// Writes one status line per tick, and a blank line when the transfer
/// stops, to any writer. The CLI uses standard error.
#[derive(Debug)]
pub struct StatusLineReporter<W> {
    out: Mutex<W>,
}

impl StatusLineReporter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> StatusLineReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_out(&self, f: impl FnOnce(&mut W) -> io::Result<()>) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = f(&mut out) {
            debug!("status output failed: {err}");
        }
    }
}

impl<W: Write + Send> ProgressReporter for StatusLineReporter<W> {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.with_out(|out| writeln!(out, "{}", snapshot.status_line()));
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        debug!(
            "{} finished bytes={} elapsed_s={:.2} throughput_mib={:.2}",
            snapshot.label, snapshot.bytes_done, snapshot.elapsed_seconds, snapshot.throughput_mib
        );
        self.with_out(|out| {
            writeln!(out)?;
            out.flush()
        });
    }
}

/// Reporter that discards everything.
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    fn on_finish(&self, _snapshot: &ProgressSnapshot) {}
}

/// Handle to the ticker thread. Stops the thread on [`finish`](Self::finish)
/// or drop, whichever comes first.
pub struct ProgressTicker {
    done_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn spawn(
        label: &'static str,
        total_bytes: u64,
        counter: Arc<AtomicU64>,
        reporter: Arc<dyn ProgressReporter>,
        interval: Duration,
    ) -> Self {
        let (done_tx, done_rx) = bounded::<()>(0);
        let interval = interval.max(Duration::from_millis(1));

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let done = counter.load(Ordering::Relaxed);
                        reporter.on_progress(&ProgressSnapshot::capture(label, total_bytes, done, start));
                    }
                    recv(done_rx) -> _ => break,
                }
            }
            let done = counter.load(Ordering::Relaxed);
            reporter.on_finish(&ProgressSnapshot::capture(label, total_bytes, done, start));
        });

        Self {
            done_tx: Some(done_tx),
            handle: Some(handle),
        }
    }

    /// Signal completion and wait for the final report.
    pub fn finish(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.done_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("progress thread panicked");
            }
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
