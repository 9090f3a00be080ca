//! File-backed store for the server side.

use super::{effective_len, Backing};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

/// Errors opening a file store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not a regular file: {0}")]
    NotRegular(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A disk image exported as a block device.
///
/// Opens a regular file read-only or read-write with synchronous writes.
/// The size is taken from the file metadata at open time and never changes.
/// The descriptor is guarded by a reader/writer lock so reads can proceed
/// concurrently while writes are exclusive; the current server drives it
/// from a single thread, but the store does not assume that.
pub struct FileStore {
    file: RwLock<File>,
    size: u64,
    read_only: bool,
}

impl FileStore {
    /// Open `path` as a backing store. Block-special and other non-regular
    /// files are rejected.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            warn!(target: "blockv::store", path = %path.display(), "refusing non-regular file");
            return Err(StoreError::NotRegular(path.to_path_buf()));
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if !read_only {
            options.write(true).custom_flags(libc::O_SYNC);
        }
        let file = options.open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            size: metadata.len(),
            read_only,
        })
    }
}

impl Backing for FileStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> usize {
        let len = effective_len(offset, buf.len(), self.size);
        if len == 0 {
            return 0;
        }

        let file = self.file.read().unwrap();
        match file.read_at(&mut buf[..len], offset) {
            Ok(n) => n,
            Err(e) => {
                warn!(target: "blockv::store", offset, len, error = %e, "pread failed");
                0
            }
        }
    }

    fn write(&self, data: &[u8], offset: u64) -> usize {
        if self.read_only {
            return 0;
        }
        let len = effective_len(offset, data.len(), self.size);
        if len == 0 {
            return 0;
        }

        let file = self.file.write().unwrap();
        match file.write_at(&data[..len], offset) {
            Ok(n) => n,
            Err(e) => {
                warn!(target: "blockv::store", offset, len, error = %e, "pwrite failed");
                0
            }
        }
    }
}
