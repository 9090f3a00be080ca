//! Path-to-device mapping for the mounted filesystem.

use super::{BlockDevice, RemoteDevice, ServerConnection};
use crate::store::MemoryStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Which index resolved a lookup.
///
/// A remote device found through its target index is presented to the
/// filesystem as a regular file rather than a symlink, so loop mounts can
/// dereference the link destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrigin {
    Path,
    Target,
}

/// Maps absolute paths (e.g. `/foo`) to block devices.
///
/// Remote devices are additionally indexed under `"/" + target`, pointing
/// at the same device. Entries are added by the filesystem's create and
/// symlink operations; nothing removes them yet.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<BlockDevice>>,
    targets: HashMap<String, Arc<BlockDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty memory-backed device at `path`. A duplicate path
    /// replaces the previous device.
    pub fn add_memory(&mut self, path: &str) {
        self.devices.insert(
            path.to_string(),
            Arc::new(BlockDevice::Memory(MemoryStore::new())),
        );
    }

    /// Add a remote device at `path`, taking ownership of an established
    /// connection, and index it under its target as well.
    pub fn add_remote(&mut self, path: &str, target: &str, conn: ServerConnection) {
        let device = Arc::new(BlockDevice::Remote(RemoteDevice::new(conn, target)));
        self.devices.insert(path.to_string(), Arc::clone(&device));
        self.targets.insert(format!("/{target}"), device);
    }

    /// Resolve `path` through the primary index, then the target index.
    pub fn lookup(&self, path: &str) -> Option<(Arc<BlockDevice>, DeviceOrigin)> {
        if let Some(device) = self.devices.get(path) {
            return Some((Arc::clone(device), DeviceOrigin::Path));
        }
        self.targets
            .get(path)
            .map(|device| (Arc::clone(device), DeviceOrigin::Target))
    }

    pub fn get(&self, path: &str) -> Option<Arc<BlockDevice>> {
        self.lookup(path).map(|(device, _)| device)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.devices.contains_key(path) || self.targets.contains_key(path)
    }

    /// Primary paths, for directory listings. Target aliases are not
    /// listed.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Drop the device at `path` from both indexes.
    ///
    /// TODO: wire this to unlink so removing a file tears the device down.
    pub fn remove(&mut self, path: &str) {
        if let Some(device) = self.devices.remove(path) {
            if let Some(remote) = device.as_remote() {
                self.targets.remove(&format!("/{}", remote.target()));
            }
        }
    }
}
