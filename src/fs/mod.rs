//! fuser::Filesystem binding over the device registry.
//!
//! The mount is a flat namespace: the root directory plus one entry per
//! device. Creating a regular file adds an empty memory device, truncating
//! it allocates its buffer, and symlinking to `host:port` dials a block
//! server and adds a remote device. Reads and writes multiplex onto the
//! device behind the entry.

mod mount;

pub use mount::mount;

use crate::device::{BlockDevice, DeviceOrigin, DeviceRegistry, ServerConnection};
use crate::store::{effective_len, AllocateError};
use fuser::{
    BsdFileFlags, Errno, FileAttr, FileHandle, FileType, FopenFlags, Generation, INodeNo,
    LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow, WriteFlags,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

/// The mounted filesystem: a registry of devices plus the inode table that
/// names them to the kernel.
pub struct BlockvFs {
    state: RwLock<FsState>,
}

struct FsState {
    registry: DeviceRegistry,
    inode_paths: HashMap<u64, String>,
    path_inodes: HashMap<String, u64>,
    next_ino: u64,
}

impl FsState {
    fn new() -> Self {
        Self {
            registry: DeviceRegistry::new(),
            inode_paths: HashMap::new(),
            path_inodes: HashMap::new(),
            next_ino: ROOT_INO + 1,
        }
    }

    /// Inode for `path`, assigning the next free number on first sight.
    /// Target aliases get their own inode, distinct from the link's.
    fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.path_inodes.get(path) {
            return *ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.path_inodes.insert(path.to_string(), ino);
        self.inode_paths.insert(ino, path.to_string());
        ino
    }

    fn device_for(&self, ino: u64) -> Option<(Arc<BlockDevice>, DeviceOrigin)> {
        let path = self.inode_paths.get(&ino)?;
        self.registry.lookup(path)
    }
}

impl BlockvFs {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(FsState::new()),
        }
    }
}

impl Default for BlockvFs {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_kind(device: &BlockDevice, origin: DeviceOrigin) -> FileType {
    match (device, origin) {
        (BlockDevice::Remote(_), DeviceOrigin::Path) => FileType::Symlink,
        _ => FileType::RegularFile,
    }
}

fn base_attr(ino: u64) -> FileAttr {
    let epoch: SystemTime = UNIX_EPOCH;
    FileAttr {
        ino: INodeNo(ino),
        size: 0,
        blocks: 0,
        atime: epoch,
        mtime: epoch,
        ctime: epoch,
        crtime: epoch,
        kind: FileType::RegularFile,
        perm: 0,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn root_attr() -> FileAttr {
    let mut attr = base_attr(ROOT_INO);
    attr.kind = FileType::Directory;
    attr.perm = 0o755;
    attr.nlink = 2;
    attr
}

fn device_attr(ino: u64, device: &BlockDevice, origin: DeviceOrigin) -> FileAttr {
    let mut attr = base_attr(ino);
    attr.kind = entry_kind(device, origin);
    attr.perm = if device.read_only() { 0o444 } else { 0o644 };
    attr.size = device.size();
    attr.blocks = attr.size.div_ceil(512);
    attr
}

impl fuser::Filesystem for BlockvFs {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let parent: u64 = parent.into();
        if parent != ROOT_INO {
            reply.error(Errno::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = format!("/{name}");

        let mut state = self.state.write().unwrap();
        match state.registry.lookup(&path) {
            Some((device, origin)) => {
                let ino = state.ino_for(&path);
                reply.entry(&TTL, &device_attr(ino, &device, origin), Generation(0));
            }
            None => reply.error(Errno::ENOENT),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let ino: u64 = ino.into();
        if ino == ROOT_INO {
            reply.attr(&TTL, &root_attr());
            return;
        }

        let state = self.state.read().unwrap();
        match state.device_for(ino) {
            Some((device, origin)) => reply.attr(&TTL, &device_attr(ino, &device, origin)),
            None => reply.error(Errno::ENOENT),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let ino: u64 = ino.into();
        if ino == ROOT_INO {
            reply.attr(&TTL, &root_attr());
            return;
        }

        let state = self.state.read().unwrap();
        let Some((device, origin)) = state.device_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };

        if let Some(size) = size {
            // Truncate backs the one-shot allocation of a memory device;
            // nothing else may change a device's size.
            let Some(store) = device.as_memory() else {
                reply.error(Errno::EPERM);
                return;
            };
            match store.allocate(size) {
                Ok(()) => {
                    debug!(target: "blockv::fs", ino, size, "allocated device contents");
                }
                Err(AllocateError::AlreadyAllocated) => {
                    reply.error(Errno::EPERM);
                    return;
                }
                Err(e @ AllocateError::OutOfMemory(_)) => {
                    warn!(target: "blockv::fs", ino, size, error = %e, "device allocation failed");
                    reply.error(Errno::EIO);
                    return;
                }
            }
        }

        reply.attr(&TTL, &device_attr(ino, &device, origin));
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let ino: u64 = ino.into();
        if ino != ROOT_INO {
            reply.error(Errno::ENOENT);
            return;
        }

        let mut state = self.state.write().unwrap();
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ROOT_INO, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        let paths: Vec<String> = state.registry.paths().map(str::to_string).collect();
        for path in paths {
            let Some((device, origin)) = state.registry.lookup(&path) else {
                continue;
            };
            let kind = entry_kind(&device, origin);
            let ino = state.ino_for(&path);
            entries.push((ino, kind, path[1..].to_string()));
        }

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(*ino), (i + 1) as u64, *kind, name.as_str()) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let ino: u64 = ino.into();
        let state = self.state.read().unwrap();
        let Some((device, _)) = state.device_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };

        if device.read_only() && (flags.0 & libc::O_ACCMODE) != libc::O_RDONLY {
            reply.error(Errno::EACCES);
            return;
        }
        reply.opened(FileHandle(0), FopenFlags::empty());
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let parent: u64 = parent.into();
        if parent != ROOT_INO {
            reply.error(Errno::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = format!("/{name}");

        let mut state = self.state.write().unwrap();
        if state.registry.contains(&path) {
            if flags & libc::O_EXCL != 0 {
                reply.error(Errno::EEXIST);
                return;
            }
        } else {
            state.registry.add_memory(&path);
            debug!(target: "blockv::fs", path, "added memory device");
        }

        let (device, origin) = state.registry.lookup(&path).expect("just inserted");
        let ino = state.ino_for(&path);
        reply.created(
            &TTL,
            &device_attr(ino, &device, origin),
            Generation(0),
            FileHandle(0),
            FopenFlags::empty(),
        );
    }

    fn symlink(
        &self,
        _req: &Request,
        parent: INodeNo,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let parent: u64 = parent.into();
        if parent != ROOT_INO {
            reply.error(Errno::ENOENT);
            return;
        }
        let (Some(name), Some(target)) = (link_name.to_str(), target.to_str()) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = format!("/{name}");

        {
            let state = self.state.read().unwrap();
            if state.registry.contains(&path) {
                reply.error(Errno::EEXIST);
                return;
            }
        }

        // Dial with the lock released so a slow or unreachable server only
        // stalls this operation, not every other device in the mount.
        let conn = match ServerConnection::connect(target) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(target: "blockv::fs", server = %target, error = %e, "block server connection failed");
                reply.error(Errno::EIO);
                return;
            }
        };

        let mut state = self.state.write().unwrap();
        if state.registry.contains(&path) {
            // Lost a race with another create or symlink while dialing.
            reply.error(Errno::EEXIST);
            return;
        }
        state.registry.add_remote(&path, target, conn);
        debug!(target: "blockv::fs", path, server = %target, "added remote device");

        let (device, origin) = state.registry.lookup(&path).expect("just inserted");
        let ino = state.ino_for(&path);
        reply.entry(&TTL, &device_attr(ino, &device, origin), Generation(0));
    }

    fn readlink(&self, _req: &Request, ino: INodeNo, reply: ReplyData) {
        let ino: u64 = ino.into();
        let state = self.state.read().unwrap();
        let Some((device, _)) = state.device_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };

        // Only remote devices are links; memory devices have no target.
        match device.as_remote() {
            Some(remote) => reply.data(remote.target().as_bytes()),
            None => reply.error(Errno::EPERM),
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let ino: u64 = ino.into();
        let state = self.state.read().unwrap();
        let Some((device, _)) = state.device_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        drop(state);

        let len = effective_len(offset, size as usize, device.size());
        if len == 0 {
            reply.data(&[]);
            return;
        }

        let mut buf = vec![0u8; len];
        let n = device.read(&mut buf, offset);
        if n != len {
            warn!(target: "blockv::fs", ino, offset, len, got = n, "short device read");
            reply.error(Errno::EIO);
            return;
        }
        reply.data(&buf);
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        let ino: u64 = ino.into();
        let state = self.state.read().unwrap();
        let Some((device, _)) = state.device_for(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        drop(state);

        if device.read_only() {
            reply.error(Errno::EBADF);
            return;
        }

        let len = effective_len(offset, data.len(), device.size());
        if len == 0 {
            reply.written(0);
            return;
        }

        let n = device.write(&data[..len], offset);
        if n != len {
            warn!(target: "blockv::fs", ino, offset, len, got = n, "short device write");
            reply.error(Errno::EIO);
            return;
        }
        reply.written(n as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_assignment_is_stable() {
        let mut state = FsState::new();
        let a = state.ino_for("/a");
        let b = state.ino_for("/b");
        assert_ne!(a, b);
        assert!(a > ROOT_INO);
        assert_eq!(state.ino_for("/a"), a);
    }

    #[test]
    fn test_memory_device_attr() {
        let mut state = FsState::new();
        state.registry.add_memory("/disk");
        let (device, origin) = state.registry.lookup("/disk").unwrap();
        let ino = state.ino_for("/disk");

        let attr = device_attr(ino, &device, origin);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.size, 0);

        device.as_memory().unwrap().allocate(1024).unwrap();
        let attr = device_attr(ino, &device, origin);
        assert_eq!(attr.size, 1024);
        assert_eq!(attr.blocks, 2);
    }

    #[test]
    fn test_root_attr() {
        let attr = root_attr();
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
    }
}
