//! # Pipeline Module
//!
//! Wires the chunk sequencer, worker pool, reorder stage and progress ticker
//! into the two transfer pipelines:
//!
//! - read: device -> workers -> reorder -> output stream
//! - write: input stream -> workers -> device
//!
//! Both run to completion or stop at the first failure. Nothing already
//! emitted or written is rolled back.

pub mod progress;
pub mod reorder;
pub mod workers;

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded};
use tracing::{debug, info, warn};

use crate::chunk::{ChunkDescriptor, ChunkIter, chunk_count};
use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_WORKERS, MIB};
use crate::device::BlockDevice;
use crate::error::TransferError;

use progress::{ProgressReporter, ProgressTicker};
use reorder::ReorderBuffer;
use workers::{ReadResult, WriteOutcome, WriteUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Read => "READ",
            Direction::Write => "WRITE",
        }
    }
}

/// Settings for one transfer, passed explicitly to the pipeline.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub block_size: usize,
    pub workers: usize,
    pub progress_interval: Duration,
    pub sync_on_finish: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: DEFAULT_WORKERS,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            sync_on_finish: true,
        }
    }
}

impl TransferOptions {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.block_size == 0 {
            return Err(TransferError::InvalidOptions(
                "block size must be positive".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(TransferError::InvalidOptions(
                "worker count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistics for a finished transfer.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub bytes_transferred: u64,
    pub chunks: u64,
    pub elapsed_seconds: f64,
    pub throughput_mib: f64,
}

impl TransferStats {
    fn new(bytes_transferred: u64, chunks: u64, start: Instant) -> Self {
        let elapsed_seconds = start.elapsed().as_secs_f64();
        let throughput_mib = if elapsed_seconds > 0.0 {
            bytes_transferred as f64 / MIB as f64 / elapsed_seconds
        } else {
            0.0
        };
        Self {
            bytes_transferred,
            chunks,
            elapsed_seconds,
            throughput_mib,
        }
    }
}

/// Shared state for the duration of one transfer.
struct TransferState {
    total_bytes: u64,
    bytes_done: Arc<AtomicU64>,
    abort: Arc<AtomicBool>,
}

impl TransferState {
    fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            bytes_done: Arc::new(AtomicU64::new(0)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    /// Stop dispatch and keep the failure with the lowest chunk index.
    fn fail(&self, slot: &mut Option<TransferError>, err: TransferError) {
        self.abort.store(true, Ordering::Relaxed);
        let replace = match slot.as_ref() {
            None => true,
            Some(current) => match (err.chunk_index(), current.chunk_index()) {
                (Some(new), Some(old)) => new < old,
                (Some(_), None) => true,
                _ => false,
            },
        };
        if replace {
            *slot = Some(err);
        }
    }
}

/// Stream the whole device to `output` in offset order.
pub fn read_device<W: Write>(
    device: Arc<dyn BlockDevice>,
    output: &mut W,
    opts: &TransferOptions,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<TransferStats, TransferError> {
    opts.validate()?;
    let state = TransferState::new(device.len());
    let total_chunks = chunk_count(state.total_bytes, opts.block_size);
    info!(
        "read start size={} chunk_count={} chunk_size={} workers={}",
        state.total_bytes, total_chunks, opts.block_size, opts.workers
    );

    let start = Instant::now();
    let ticker = ProgressTicker::spawn(
        Direction::Read.label(),
        state.total_bytes,
        state.bytes_done.clone(),
        reporter,
        opts.progress_interval,
    );

    let (task_tx, task_rx) = bounded::<ChunkDescriptor>(opts.workers);
    let (result_tx, result_rx) = bounded::<ReadResult>(opts.workers);

    let worker_handles = workers::spawn_read_workers(
        opts.workers,
        device,
        task_rx,
        result_tx,
        state.abort.clone(),
    );
    let sequencer = spawn_sequencer(
        state.total_bytes,
        opts.block_size,
        task_tx,
        state.abort.clone(),
    );

    let mut reorder = ReorderBuffer::new();
    let mut failure: Option<TransferError> = None;

    // Keep receiving after a failure so workers never block on a full
    // result channel; the loop ends once every worker has exited.
    for result in result_rx {
        let payload = match result.outcome {
            Ok(payload) => payload,
            Err(err) => {
                state.fail(&mut failure, err);
                continue;
            }
        };
        if failure.is_some() {
            continue;
        }
        let emitted = reorder.push(result.chunk.index, payload, |_, bytes| {
            output.write_all(bytes).map_err(TransferError::Output)?;
            state
                .bytes_done
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            Ok::<(), TransferError>(())
        });
        if let Err(err) = emitted {
            state.fail(&mut failure, err);
        }
    }

    let mut panicked = sequencer.join().is_err();
    for handle in worker_handles {
        panicked |= handle.join().is_err();
    }
    if failure.is_none() {
        if panicked {
            failure = Some(TransferError::WorkerPanicked("read pipeline"));
        } else if let Err(err) = output.flush() {
            failure = Some(TransferError::Output(err));
        }
    }
    ticker.finish();

    if let Some(err) = failure {
        warn!(
            "read aborted after {} of {} bytes ({} chunks held)",
            state.bytes_done(),
            state.total_bytes,
            reorder.pending()
        );
        return Err(err);
    }

    debug!("reorder buffer peak={} chunks", reorder.max_pending());
    let stats = TransferStats::new(state.bytes_done(), reorder.next_index(), start);
    info!(
        "read complete bytes={} chunks={} elapsed_s={:.2} throughput_mib={:.2}",
        stats.bytes_transferred, stats.chunks, stats.elapsed_seconds, stats.throughput_mib
    );
    Ok(stats)
}

/// Stream `input` into the device, chunk `i` landing at `i * block_size`.
///
/// Input is read on its own thread so a failed write is acted on even while
/// the upstream is stalled. On failure that thread is left to exit on its
/// next read.
pub fn write_device<R: Read + Send + 'static>(
    device: Arc<dyn BlockDevice>,
    input: R,
    opts: &TransferOptions,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<TransferStats, TransferError> {
    opts.validate()?;
    let state = TransferState::new(device.len());
    info!(
        "write start size={} chunk_size={} workers={}",
        state.total_bytes, opts.block_size, opts.workers
    );

    let start = Instant::now();
    let ticker = ProgressTicker::spawn(
        Direction::Write.label(),
        state.total_bytes,
        state.bytes_done.clone(),
        reporter,
        opts.progress_interval,
    );

    let (task_tx, task_rx) = bounded::<WriteUnit>(opts.workers);
    let (outcome_tx, outcome_rx) = unbounded::<WriteOutcome>();
    let (input_tx, input_rx) = bounded::<std::io::Result<Vec<u8>>>(opts.workers);

    let worker_handles = workers::spawn_write_workers(
        opts.workers,
        device.clone(),
        task_rx,
        outcome_tx,
        state.bytes_done.clone(),
        state.abort.clone(),
    );
    let reader = spawn_input_reader(
        input,
        input_buffer_len(opts.block_size, state.total_bytes),
        input_tx,
    );

    let mut failure: Option<TransferError> = None;
    let mut submitted = 0u64;
    let mut completed = 0u64;
    let mut input_done = false;
    let block = opts.block_size as u64;

    loop {
        select! {
            recv(outcome_rx) -> msg => match msg {
                Ok(outcome) => match outcome.result {
                    Ok(_) => completed += 1,
                    Err(err) => {
                        debug!(
                            "stopping dispatch after chunk {} at offset {} failed",
                            outcome.index, outcome.offset
                        );
                        state.fail(&mut failure, err);
                        break;
                    }
                },
                Err(_) => break,
            },
            recv(input_rx) -> msg => {
                let payload = match msg {
                    Ok(Ok(payload)) => payload,
                    Ok(Err(err)) => {
                        state.fail(&mut failure, TransferError::Input(err));
                        break;
                    }
                    Err(_) => {
                        input_done = true;
                        break;
                    }
                };
                let offset = submitted * block;
                if offset + payload.len() as u64 > state.total_bytes {
                    state.fail(
                        &mut failure,
                        TransferError::InputExceedsDevice {
                            index: submitted,
                            offset,
                            len: payload.len(),
                            capacity: state.total_bytes,
                        },
                    );
                    break;
                }
                let unit = WriteUnit {
                    index: submitted,
                    offset,
                    payload,
                };
                if task_tx.send(unit).is_err() {
                    break;
                }
                submitted += 1;
            },
        }
        if state.abort.load(Ordering::Relaxed) {
            break;
        }
    }

    drop(task_tx);
    let mut panicked = false;
    for handle in worker_handles {
        panicked |= handle.join().is_err();
    }
    for outcome in outcome_rx.try_iter() {
        match outcome.result {
            Ok(_) => completed += 1,
            Err(err) => state.fail(&mut failure, err),
        }
    }
    drop(input_rx);
    if input_done {
        panicked |= reader.join().is_err();
    } else {
        debug!("input reader detached before end of input");
    }
    if failure.is_none() && panicked {
        failure = Some(TransferError::WorkerPanicked("write pipeline"));
    }
    if failure.is_none() && opts.sync_on_finish {
        debug!("syncing device");
        if let Err(err) = device.sync() {
            failure = Some(TransferError::Sync(err));
        }
    }
    ticker.finish();

    if let Some(err) = failure {
        warn!(
            "write aborted after {} of {} bytes",
            state.bytes_done(),
            state.total_bytes
        );
        return Err(err);
    }

    if state.bytes_done() < state.total_bytes {
        info!(
            "input ended before device end: wrote {} of {} bytes",
            state.bytes_done(),
            state.total_bytes
        );
    }
    let stats = TransferStats::new(state.bytes_done(), submitted, start);
    debug!("write outcomes drained={completed} submitted={submitted}");
    info!(
        "write complete bytes={} chunks={} elapsed_s={:.2} throughput_mib={:.2}",
        stats.bytes_transferred, stats.chunks, stats.elapsed_seconds, stats.throughput_mib
    );
    Ok(stats)
}

/// Size of one input read. Never more than one byte past the device end, so
/// an oversized `block_size` does not allocate beyond what can be written
/// while excess input is still detected.
fn input_buffer_len(block_size: usize, total_bytes: u64) -> usize {
    usize::try_from(total_bytes.saturating_add(1)).map_or(block_size, |cap| cap.min(block_size))
}

/// Read `input` in `buf_len` pieces until it ends or fails. A short piece is
/// the last one sent; dropping `tx` marks the end of input.
fn spawn_input_reader<R: Read + Send + 'static>(
    mut input: R,
    buf_len: usize,
    tx: crossbeam_channel::Sender<std::io::Result<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            let mut payload = vec![0u8; buf_len];
            match fill_buffer(&mut input, &mut payload) {
                Ok(0) => break,
                Ok(filled) => {
                    payload.truncate(filled);
                    if tx.send(Ok(payload)).is_err() || filled < buf_len {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    })
}

/// Feed chunk descriptors to the read workers until done or aborted.
fn spawn_sequencer(
    total_bytes: u64,
    block_size: usize,
    tx: crossbeam_channel::Sender<ChunkDescriptor>,
    abort: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for chunk in ChunkIter::new(total_bytes, block_size) {
            if abort.load(Ordering::Relaxed) {
                debug!("sequencer stopping before chunk {}", chunk.index);
                break;
            }
            if tx.send(chunk).is_err() {
                break;
            }
        }
    })
}

/// Read until `buf` is full or the input ends. Returns the bytes read.
fn fill_buffer<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
