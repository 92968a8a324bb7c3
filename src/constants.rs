//! Shared constants for the transfer engine.

pub const MIB: u64 = 1024 * 1024;

/// Default chunk size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

pub const DEFAULT_WORKERS: usize = 4;

pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// Linux `BLKGETSIZE64` request code (`_IOR(0x12, 114, size_t)`).
#[cfg(target_os = "linux")]
pub const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;
