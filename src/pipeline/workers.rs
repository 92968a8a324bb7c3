//! # Pipeline Workers
//!
//! Positioned read and write workers. Each worker pulls one task at a time
//! from a shared bounded queue and reports a tagged outcome on the result
//! channel; none of them decide whether the transfer continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::chunk::ChunkDescriptor;
use crate::device::{BlockDevice, DeviceError};
use crate::error::TransferError;

/// Outcome of reading one chunk.
pub struct ReadResult {
    pub chunk: ChunkDescriptor,
    pub outcome: Result<Vec<u8>, TransferError>,
}

/// Input bytes destined for a fixed device offset.
#[derive(Debug, Clone)]
pub struct WriteUnit {
    pub index: u64,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Outcome of writing one unit.
pub struct WriteOutcome {
    pub index: u64,
    pub offset: u64,
    pub result: Result<usize, TransferError>,
}

/// Spawn positioned-read worker threads.
///
/// Once `abort` is raised, queued chunks are drained without touching the
/// device so the sequencer never blocks on a dead pipeline.
pub fn spawn_read_workers(
    workers: usize,
    device: Arc<dyn BlockDevice>,
    rx: Receiver<ChunkDescriptor>,
    tx: Sender<ReadResult>,
    abort: Arc<AtomicBool>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    let worker_count = workers.max(1);

    for worker_id in 0..worker_count {
        let device = device.clone();
        let rx = rx.clone();
        let tx = tx.clone();
        let abort = abort.clone();

        handles.push(thread::spawn(move || {
            for chunk in rx {
                if abort.load(Ordering::Relaxed) {
                    continue;
                }
                let outcome = read_chunk(device.as_ref(), &chunk);
                if outcome.is_err() {
                    abort.store(true, Ordering::Relaxed);
                }
                if tx.send(ReadResult { chunk, outcome }).is_err() {
                    debug!("read worker {worker_id}: result channel closed");
                    break;
                }
            }
        }));
    }

    handles
}

/// Spawn positioned-write worker threads.
///
/// Workers add to `bytes_written` themselves, only after a full write.
pub fn spawn_write_workers(
    workers: usize,
    device: Arc<dyn BlockDevice>,
    rx: Receiver<WriteUnit>,
    tx: Sender<WriteOutcome>,
    bytes_written: Arc<AtomicU64>,
    abort: Arc<AtomicBool>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    let worker_count = workers.max(1);

    for worker_id in 0..worker_count {
        let device = device.clone();
        let rx = rx.clone();
        let tx = tx.clone();
        let bytes_written = bytes_written.clone();
        let abort = abort.clone();

        handles.push(thread::spawn(move || {
            for unit in rx {
                if abort.load(Ordering::Relaxed) {
                    continue;
                }
                let result = write_unit(device.as_ref(), &unit);
                match &result {
                    Ok(written) => {
                        bytes_written.fetch_add(*written as u64, Ordering::Relaxed);
                    }
                    Err(_) => abort.store(true, Ordering::Relaxed),
                }
                let outcome = WriteOutcome {
                    index: unit.index,
                    offset: unit.offset,
                    result,
                };
                if tx.send(outcome).is_err() {
                    debug!("write worker {worker_id}: outcome channel closed");
                    break;
                }
            }
        }));
    }

    handles
}

/// Read exactly `chunk.length` bytes at `chunk.offset`.
///
/// End of device part way through is accepted only for the chunk that ends
/// at the probed device size; anywhere else it means the device shrank.
pub fn read_chunk(
    device: &dyn BlockDevice,
    chunk: &ChunkDescriptor,
) -> Result<Vec<u8>, TransferError> {
    let mut buf = vec![0u8; chunk.length];
    let mut filled = 0usize;
    while filled < buf.len() {
        match device.read_at(chunk.offset + filled as u64, &mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(DeviceError::Io(err)) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(source) => {
                return Err(TransferError::ChunkRead {
                    index: chunk.index,
                    offset: chunk.offset,
                    source,
                });
            }
        }
    }

    if filled == 0 && chunk.length > 0 {
        return Err(TransferError::EmptyRead {
            index: chunk.index,
            offset: chunk.offset,
        });
    }
    if filled < chunk.length {
        if chunk.end() < device.len() {
            return Err(TransferError::ShortRead {
                index: chunk.index,
                offset: chunk.offset,
                expected: chunk.length,
                actual: filled,
            });
        }
        warn!(
            "final chunk {} at offset {} short by {} bytes",
            chunk.index,
            chunk.offset,
            chunk.length - filled
        );
        buf.truncate(filled);
    }
    Ok(buf)
}

/// Write the whole payload with a single positioned write.
pub fn write_unit(device: &dyn BlockDevice, unit: &WriteUnit) -> Result<usize, TransferError> {
    let written = loop {
        match device.write_at(unit.offset, &unit.payload) {
            Ok(n) => break n,
            Err(DeviceError::Io(err)) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(source) => {
                return Err(TransferError::ChunkWrite {
                    index: unit.index,
                    offset: unit.offset,
                    source,
                });
            }
        }
    };
    if written != unit.payload.len() {
        return Err(TransferError::ShortWrite {
            index: unit.index,
            offset: unit.offset,
            expected: unit.payload.len(),
            written,
        });
    }
    Ok(written)
}
