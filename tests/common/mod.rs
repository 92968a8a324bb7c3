//! Shared fakes for pipeline tests.
//!
//! `MemoryDevice` is an in-memory block device that can delay, fail or
//! truncate individual chunks so tests can force out-of-order completion and
//! fault paths without a real disk.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use blockpipe::device::{BlockDevice, DeviceError};
use blockpipe::pipeline::progress::{ProgressReporter, ProgressSnapshot};

// ============================================================================
// Data Helpers
// ============================================================================

/// Deterministic, non-repeating-looking test content.
pub fn pattern(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

// ============================================================================
// Memory Device
// ============================================================================

type DelayFn = Box<dyn Fn(u64) -> Duration + Send + Sync>;

pub struct MemoryDevice {
    data: Mutex<Vec<u8>>,
    block_size: u64,
    delay: Option<DelayFn>,
    fail_read: HashSet<u64>,
    fail_write: HashSet<u64>,
    short_write: HashSet<u64>,
    write_log: Mutex<Vec<u64>>,
    read_log: Mutex<Vec<u64>>,
}

impl MemoryDevice {
    pub fn new(data: Vec<u8>, block_size: usize) -> Self {
        Self {
            data: Mutex::new(data),
            block_size: block_size as u64,
            delay: None,
            fail_read: HashSet::new(),
            fail_write: HashSet::new(),
            short_write: HashSet::new(),
            write_log: Mutex::new(Vec::new()),
            read_log: Mutex::new(Vec::new()),
        }
    }

    pub fn zeroed(len: usize, block_size: usize) -> Self {
        Self::new(vec![0u8; len], block_size)
    }

    /// Sleep for `delay(chunk_index)` before each I/O call.
    pub fn with_delay(mut self, delay: impl Fn(u64) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn failing_read(mut self, chunk: u64) -> Self {
        self.fail_read.insert(chunk);
        self
    }

    pub fn failing_write(mut self, chunk: u64) -> Self {
        self.fail_write.insert(chunk);
        self
    }

    /// Accept only half of the payload for this chunk.
    pub fn short_write(mut self, chunk: u64) -> Self {
        self.short_write.insert(chunk);
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Chunk indexes whose write reached the device, in call order.
    pub fn writes(&self) -> Vec<u64> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<u64> {
        self.read_log.lock().unwrap().clone()
    }

    fn chunk_of(&self, offset: u64) -> u64 {
        offset / self.block_size
    }

    fn pause(&self, chunk: u64) {
        if let Some(delay) = &self.delay {
            let d = delay(chunk);
            if !d.is_zero() {
                thread::sleep(d);
            }
        }
    }
}

impl BlockDevice for MemoryDevice {
    fn len(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let chunk = self.chunk_of(offset);
        self.read_log.lock().unwrap().push(chunk);
        self.pause(chunk);
        if self.fail_read.contains(&chunk) {
            return Err(DeviceError::Io(std::io::Error::other(format!(
                "injected read failure in chunk {chunk}"
            ))));
        }
        let data = self.data.lock().unwrap();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        let chunk = self.chunk_of(offset);
        self.pause(chunk);
        if self.fail_write.contains(&chunk) {
            return Err(DeviceError::Io(std::io::Error::other(format!(
                "injected write failure in chunk {chunk}"
            ))));
        }
        self.write_log.lock().unwrap().push(chunk);
        let n = if self.short_write.contains(&chunk) {
            buf.len() / 2
        } else {
            buf.len()
        };
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        let n = n.min(data.len().saturating_sub(start));
        data[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn sync(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

// ============================================================================
// Progress Recorder
// ============================================================================

#[derive(Default)]
pub struct RecordingReporter {
    pub ticks: Mutex<Vec<ProgressSnapshot>>,
    pub finished: Mutex<Option<ProgressSnapshot>>,
}

impl RecordingReporter {
    pub fn final_snapshot(&self) -> ProgressSnapshot {
        self.finished
            .lock()
            .unwrap()
            .clone()
            .expect("reporter was never finished")
    }

    pub fn tick_bytes(&self) -> Vec<u64> {
        self.ticks
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.bytes_done)
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.ticks.lock().unwrap().push(snapshot.clone());
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        *self.finished.lock().unwrap() = Some(snapshot.clone());
    }
}
