//! Remote block device: a proxy for a server over one TCP stream.

use crate::protocol::{ReadRequest, ReadResponse, ServerInfo, WriteRequest, WriteResponse};
use crate::DEFAULT_PORT;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use tracing::{debug, warn};

/// An established connection to a block server: the greeting it sent plus
/// the stream carrying all subsequent RPCs.
pub struct ServerConnection {
    pub info: ServerInfo,
    stream: TcpStream,
}

impl ServerConnection {
    /// Connect to `target` (`host[:port]`, port defaulting to 22000), read
    /// the greeting and validate its magic.
    pub fn connect(target: &str) -> io::Result<Self> {
        let (host, port) = split_target(target);
        let mut stream = TcpStream::connect((host, port))?;

        let mut greeting = [0u8; ServerInfo::SERIALIZED_LEN];
        stream.read_exact(&mut greeting)?;
        let info = ServerInfo::decode(&greeting)?;

        debug!(
            target: "blockv::client",
            server = %target,
            device_size = info.device_size,
            read_only = info.read_only,
            "connected to block server"
        );
        Ok(Self { info, stream })
    }
}

/// Split a symlink target into host and port. A missing or malformed port
/// falls back to the default.
fn split_target(target: &str) -> (&str, u16) {
    match target.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (target, DEFAULT_PORT),
        },
        None => (target, DEFAULT_PORT),
    }
}

/// A block device served by a remote server.
///
/// The wire protocol has no request IDs, so the full RPC round-trip runs
/// under one mutex and any framing failure poisons the stream: the only
/// safe recovery is dropping the connection and dialing a fresh one. While
/// disconnected, every operation reports 0 bytes and the next call retries
/// the connect.
pub struct RemoteDevice {
    target: String,
    info: ServerInfo,
    conn: Mutex<Option<ServerConnection>>,
}

impl RemoteDevice {
    /// Wrap an established connection. Size and write policy come from its
    /// greeting and stay fixed for the device's lifetime.
    pub fn new(conn: ServerConnection, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            info: conn.info,
            conn: Mutex::new(Some(conn)),
        }
    }

    /// The symlink target this device was created from.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn read_only(&self) -> bool {
        self.info.read_only
    }

    pub fn size(&self) -> u64 {
        u64::from(self.info.device_size)
    }

    /// Read `buf.len()` bytes at `offset` from the server.
    ///
    /// Returns the bytes read, 0 on any connection or protocol failure.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> usize {
        let mut guard = self.conn.lock().unwrap();
        let Some(conn) = Self::connection(&mut guard, &self.target) else {
            return 0;
        };

        match read_rpc(conn, buf, offset) {
            Ok(n) => n,
            Err(e) => {
                warn!(target: "blockv::client", server = %self.target, error = %e, "read failed, reconnecting");
                Self::reconnect(&mut guard, &self.target);
                0
            }
        }
    }

    /// Write `data` at `offset` on the server.
    ///
    /// Returns `data.len()` on success, 0 on any connection failure.
    pub fn write(&self, data: &[u8], offset: u64) -> usize {
        let mut guard = self.conn.lock().unwrap();
        let Some(conn) = Self::connection(&mut guard, &self.target) else {
            return 0;
        };

        match write_rpc(conn, data, offset) {
            Ok(()) => data.len(),
            Err(e) => {
                warn!(target: "blockv::client", server = %self.target, error = %e, "write failed, reconnecting");
                Self::reconnect(&mut guard, &self.target);
                0
            }
        }
    }

    /// Current connection, dialing a new one if the last failure left the
    /// device disconnected.
    fn connection<'a>(
        guard: &'a mut Option<ServerConnection>,
        target: &str,
    ) -> Option<&'a mut ServerConnection> {
        if guard.is_none() {
            Self::reconnect(guard, target);
        }
        guard.as_mut()
    }

    /// Drop the current connection and dial a fresh one. On failure the
    /// device stays disconnected until the next operation retries.
    fn reconnect(guard: &mut Option<ServerConnection>, target: &str) {
        *guard = match ServerConnection::connect(target) {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(target: "blockv::client", server = %target, error = %e, "reconnect failed");
                None
            }
        };
    }
}

/// One read round-trip. A response size differing from the request is a
/// protocol failure; there is no way to resynchronize the stream.
fn read_rpc(conn: &mut ServerConnection, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let request = ReadRequest {
        size: buf.len() as u32,
        offset: offset as u32,
    };
    conn.stream.write_all(&request.encode())?;

    let mut metadata = [0u8; ReadResponse::METADATA_LEN];
    conn.stream.read_exact(&mut metadata)?;
    let size = ReadResponse::decode_size(&metadata)?;
    if size != request.size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response size {} does not match request {}", size, request.size),
        ));
    }

    conn.stream.read_exact(buf)?;
    Ok(buf.len())
}

/// One write round-trip: header and payload in a single buffer, then the
/// acknowledgement, whose reported count is not interpreted.
fn write_rpc(conn: &mut ServerConnection, data: &[u8], offset: u64) -> io::Result<()> {
    let request = WriteRequest::encode(data, offset as u32);
    conn.stream.write_all(&request)?;

    let mut ack = [0u8; WriteResponse::SERIALIZED_LEN];
    conn.stream.read_exact(&mut ack)?;
    let _ = WriteResponse::decode(&ack)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("127.0.0.1:22000"), ("127.0.0.1", 22000));
        assert_eq!(split_target("example.com:9000"), ("example.com", 9000));
        assert_eq!(split_target("example.com"), ("example.com", DEFAULT_PORT));
        assert_eq!(split_target("host:notaport"), ("host:notaport", DEFAULT_PORT));
    }
}
