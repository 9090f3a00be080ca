//! Remote block devices as files in a user-space filesystem.
//!
//! `blockv` is a client/server pair. The server wraps a disk image and
//! exports it over TCP; the client mounts a FUSE filesystem whose entries
//! are block devices, either memory-backed or proxies for remote servers.
//! Standard tools (`mkfs`, `mount -o loop`, `ln -s`) then treat those files
//! as block devices.
//!
//! - **Protocol**: fixed-layout big-endian messages, greeting-first
//! - **Store**: bounded positional I/O over a file or a heap buffer
//! - **Server**: synchronous accept loop, one session at a time
//! - **Device**: path registry multiplexing onto memory or remote devices
//! - **Fs**: the `fuser` binding and mount helper
//!
//! # Quick start
//!
//! ```rust,ignore
//! use blockv::{server::Server, store::FileStore};
//!
//! let store = FileStore::open("disk.img", false)?;
//! let server = Server::bind(("0.0.0.0", blockv::DEFAULT_PORT), store)?;
//! server.run()?;
//! ```

pub mod device;
pub mod fs;
pub mod protocol;
pub mod server;
pub mod store;

// Re-export the wire types at the crate root for convenience
pub use protocol::{
    FinishRequest, ProtocolError, ReadRequest, ReadResponse, RequestKind, ServerInfo, WriteRequest,
    WriteResponse, MAGIC,
};

/// TCP port block servers listen on by default.
pub const DEFAULT_PORT: u16 = 22000;
