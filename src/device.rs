use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to determine size of {}: {source}", .path.display())]
    Probe {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device is not open for {0}")]
    Access(&'static str),
}

/// Positioned access to a fixed-size byte range.
///
/// Implementations must allow concurrent calls on disjoint ranges without
/// external locking.
pub trait BlockDevice: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError>;

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, DeviceError>;

    fn sync(&self) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// How the device size was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    BlockIoctl,
    Metadata,
}

pub struct RawDevice {
    file: File,
    len: u64,
    mode: AccessMode,
    probe: ProbeMethod,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl RawDevice {
    /// Open `path` and probe its size. The handle is kept for all later I/O.
    ///
    /// Write mode opens the target write-only and never creates or truncates
    /// it, so restoring into a regular file requires it to be pre-sized.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self, DeviceError> {
        let mut options = OpenOptions::new();
        match mode {
            AccessMode::Read => options.read(true),
            AccessMode::Write => options.write(true),
        };
        let file = options.open(path).map_err(|source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let (len, probe) = probe_size(&file).map_err(|source| DeviceError::Probe {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "opened device={} mode={:?} size={} probe={:?}",
            path.display(),
            mode,
            len,
            probe
        );
        Ok(Self {
            file,
            len,
            mode,
            probe,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }

    pub fn probe_method(&self) -> ProbeMethod {
        self.probe
    }
}

impl BlockDevice for RawDevice {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if self.mode != AccessMode::Read {
            return Err(DeviceError::Access("reading"));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.read(buf)?)
        }
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        if self.mode != AccessMode::Write {
            return Err(DeviceError::Access("writing"));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.write_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.write(buf)?)
        }
    }

    fn sync(&self) -> Result<(), DeviceError> {
        Ok(self.file.sync_all()?)
    }
}

pub fn open_device(path: &Path, mode: AccessMode) -> Result<Box<dyn BlockDevice>, DeviceError> {
    let device = RawDevice::open(path, mode)?;
    Ok(Box::new(device))
}

/// Capacity query first, file metadata second.
fn probe_size(file: &File) -> std::io::Result<(u64, ProbeMethod)> {
    match block_capacity(file) {
        Ok(size) => return Ok((size, ProbeMethod::BlockIoctl)),
        Err(err) => debug!("block capacity query failed ({err}); using file metadata"),
    }
    let len = file.metadata()?.len();
    Ok((len, ProbeMethod::Metadata))
}

#[cfg(target_os = "linux")]
fn block_capacity(file: &File) -> std::io::Result<u64> {
    use std::os::unix::io::AsRawFd;

    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer.
    let ret = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            crate::constants::BLKGETSIZE64 as _,
            &mut size as *mut u64,
        )
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(size)
}

#[cfg(not(target_os = "linux"))]
fn block_capacity(_file: &File) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "block capacity query is only available on linux",
    ))
}
