//! Client-side block devices and the registry that names them.
//!
//! A device is either memory-backed (a heap buffer allocated by truncate)
//! or remote-backed (a proxy for a server connection). The filesystem
//! binding talks to the common capability set and uses the variant
//! accessors only for the operations that exist on one side: truncate on
//! memory devices, readlink on remote ones.

mod registry;
mod remote;

pub use registry::{DeviceOrigin, DeviceRegistry};
pub use remote::{RemoteDevice, ServerConnection};

use crate::store::{Backing, MemoryStore};

/// A block device exposed as a file in the mount.
pub enum BlockDevice {
    Memory(MemoryStore),
    Remote(RemoteDevice),
}

impl BlockDevice {
    pub fn read_only(&self) -> bool {
        match self {
            Self::Memory(store) => store.read_only(),
            Self::Remote(remote) => remote.read_only(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Memory(store) => store.size(),
            Self::Remote(remote) => remote.size(),
        }
    }

    /// Read up to `buf.len()` bytes at `offset`; returns the bytes read.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> usize {
        match self {
            Self::Memory(store) => store.read(buf, offset),
            Self::Remote(remote) => remote.read(buf, offset),
        }
    }

    /// Write `data` at `offset`; returns the bytes written.
    pub fn write(&self, data: &[u8], offset: u64) -> usize {
        match self {
            Self::Memory(store) => store.write(data, offset),
            Self::Remote(remote) => remote.write(data, offset),
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryStore> {
        match self {
            Self::Memory(store) => Some(store),
            Self::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteDevice> {
        match self {
            Self::Memory(_) => None,
            Self::Remote(remote) => Some(remote),
        }
    }
}
