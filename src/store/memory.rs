//! Memory-backed store for client-side devices.

use super::{effective_len, Backing};
use std::sync::RwLock;
use thiserror::Error;

/// Errors installing a memory store's contents.
#[derive(Debug, Error)]
pub enum AllocateError {
    /// The store already has contents; resizing is not permitted.
    #[error("device contents already allocated")]
    AlreadyAllocated,

    /// The buffer could not be allocated.
    #[error("allocation of {0} bytes failed")]
    OutOfMemory(u64),
}

/// An owned in-memory buffer acting as a block device.
///
/// Created empty; the buffer is allocated exactly once, by the
/// filesystem's truncate operation. Always writable.
#[derive(Default)]
pub struct MemoryStore {
    content: RwLock<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, for fixtures and tests.
    pub fn with_contents(content: Vec<u8>) -> Self {
        Self {
            content: RwLock::new(content),
        }
    }

    /// Install a zeroed buffer of `len` bytes. Fails once the store has
    /// any contents, or when the buffer cannot be allocated; `len` comes
    /// straight from an untrusted truncate argument.
    pub fn allocate(&self, len: u64) -> Result<(), AllocateError> {
        let mut content = self.content.write().unwrap();
        if !content.is_empty() {
            return Err(AllocateError::AlreadyAllocated);
        }

        let capacity = usize::try_from(len).map_err(|_| AllocateError::OutOfMemory(len))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| AllocateError::OutOfMemory(len))?;
        buf.resize(capacity, 0);

        *content = buf;
        Ok(())
    }
}

impl Backing for MemoryStore {
    fn size(&self) -> u64 {
        self.content.read().unwrap().len() as u64
    }

    fn read_only(&self) -> bool {
        false
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> usize {
        let content = self.content.read().unwrap();
        let len = effective_len(offset, buf.len(), content.len() as u64);
        if len == 0 {
            return 0;
        }
        let start = offset as usize;
        buf[..len].copy_from_slice(&content[start..start + len]);
        len
    }

    fn write(&self, data: &[u8], offset: u64) -> usize {
        let mut content = self.content.write().unwrap();
        let len = effective_len(offset, data.len(), content.len() as u64);
        if len == 0 {
            return 0;
        }
        let start = offset as usize;
        content[start..start + len].copy_from_slice(&data[..len]);
        len
    }
}
