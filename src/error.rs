use thiserror::Error;

use crate::device::DeviceError;

/// Every failure that aborts a transfer.
///
/// Chunk-level variants carry the chunk index and device offset so the
/// message alone identifies where the transfer stopped.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("device setup failed: {0}")]
    Setup(#[from] DeviceError),

    #[error("invalid transfer options: {0}")]
    InvalidOptions(String),

    #[error("read failed for chunk {index} at offset {offset}: {source}")]
    ChunkRead {
        index: u64,
        offset: u64,
        source: DeviceError,
    },

    #[error("short read for chunk {index} at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        index: u64,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("empty read for chunk {index} at offset {offset}")]
    EmptyRead { index: u64, offset: u64 },

    #[error("write failed for chunk {index} at offset {offset}: {source}")]
    ChunkWrite {
        index: u64,
        offset: u64,
        source: DeviceError,
    },

    #[error("short write for chunk {index} at offset {offset}: wrote {written} of {expected} bytes")]
    ShortWrite {
        index: u64,
        offset: u64,
        expected: usize,
        written: usize,
    },

    #[error("input chunk {index} at offset {offset} ({len} bytes) exceeds device capacity {capacity}")]
    InputExceedsDevice {
        index: u64,
        offset: u64,
        len: usize,
        capacity: u64,
    },

    #[error("failed reading input stream: {0}")]
    Input(#[source] std::io::Error),

    #[error("failed writing output stream: {0}")]
    Output(#[source] std::io::Error),

    #[error("failed to flush device: {0}")]
    Sync(#[source] DeviceError),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

impl TransferError {
    /// Index of the chunk this error belongs to, if any.
    pub fn chunk_index(&self) -> Option<u64> {
        match self {
            Self::ChunkRead { index, .. }
            | Self::ShortRead { index, .. }
            | Self::EmptyRead { index, .. }
            | Self::ChunkWrite { index, .. }
            | Self::ShortWrite { index, .. }
            | Self::InputExceedsDevice { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_errors_name_index_and_offset() {
        let err = TransferError::ShortWrite {
            index: 4,
            offset: 4 * 65536,
            expected: 65536,
            written: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("chunk 4"));
        assert!(msg.contains("offset 262144"));
        assert_eq!(err.chunk_index(), Some(4));
    }

    #[test]
    fn stream_errors_have_no_chunk() {
        let err = TransferError::Input(std::io::Error::other("pipe closed"));
        assert_eq!(err.chunk_index(), None);
        assert!(err.to_string().contains("pipe closed"));
    }
}
