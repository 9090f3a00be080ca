//! TCP server exporting a backing store.
//!
//! One listening socket, one client at a time, synchronous I/O. Each
//! accepted connection gets the [`ServerInfo`] greeting first, then a
//! request/response loop until the client sends `Finish`, closes the
//! socket, or breaks the protocol. The backing store outlives sessions.

use crate::protocol::{
    ProtocolError, ReadRequest, ReadResponse, RequestKind, ServerInfo, WriteRequest, WriteResponse,
};
use crate::store::Backing;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Scratch buffer for the per-request socket read.
const SCRATCH_LEN: usize = 4096;

/// Single-connection block server.
pub struct Server<B> {
    listener: TcpListener,
    backing: B,
    info: ServerInfo,
}

impl<B: Backing> Server<B> {
    /// Bind a listener and wrap `backing` for export.
    ///
    /// Fails if the backing is larger than the 32-bit wire size field can
    /// describe.
    pub fn bind<A: ToSocketAddrs>(addr: A, backing: B) -> io::Result<Self> {
        let device_size = u32::try_from(backing.size()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "device larger than the 4 GiB wire size limit",
            )
        })?;
        let info = ServerInfo {
            device_size,
            read_only: backing.read_only(),
        };

        let listener = TcpListener::bind(addr)?;
        info!(
            target: "blockv::server",
            port = listener.local_addr()?.port(),
            device_size,
            read_only = info.read_only,
            "listening"
        );

        Ok(Self {
            listener,
            backing,
            info,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients forever, one session at a time.
    pub fn run(&self) -> io::Result<()> {
        loop {
            self.serve_one()?;
        }
    }

    /// Accept a single client and run its session to completion.
    ///
    /// Session-level failures are logged, not returned; the server is ready
    /// to accept again afterwards.
    pub fn serve_one(&self) -> io::Result<()> {
        let (mut stream, peer) = self.listener.accept()?;
        info!(target: "blockv::server", peer = %peer, "client connected");

        if let Err(e) = self.serve_client(&mut stream) {
            warn!(target: "blockv::server", peer = %peer, error = %e, "session error");
        }
        Ok(())
    }

    fn serve_client(&self, stream: &mut TcpStream) -> io::Result<()> {
        stream.write_all(&self.info.encode())?;

        let mut scratch = [0u8; SCRATCH_LEN];
        loop {
            let n = stream.read(&mut scratch)?;
            if n == 0 {
                debug!(target: "blockv::server", "client disconnected");
                return Ok(());
            }

            let kind = match RequestKind::from_byte(scratch[0]) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(target: "blockv::server", error = %e, "terminating session");
                    return Ok(());
                }
            };

            let done = match kind {
                RequestKind::Read => self.handle_read(stream, &scratch[..n])?,
                RequestKind::Write => self.handle_write(stream, &scratch[..n])?,
                RequestKind::Finish => {
                    debug!(target: "blockv::server", "client finished");
                    true
                }
            };
            if done {
                return Ok(());
            }
        }
    }

    /// Serve a read request. Returns true when the session must end.
    fn handle_read(&self, stream: &mut TcpStream, buf: &[u8]) -> io::Result<bool> {
        let request = match ReadRequest::decode(buf) {
            Ok(request) => request,
            Err(e) => return Ok(fatal(e)),
        };
        debug!(
            target: "blockv::server",
            size = request.size,
            offset = request.offset,
            "read request"
        );

        let Some(mut response) = alloc_zeroed(ReadResponse::serialized_size(request.size)) else {
            warn!(target: "blockv::server", size = request.size, "read response allocation failed");
            return Ok(true);
        };

        // The backing may return less than requested; stamp the actual
        // count into the metadata and drop the unused tail.
        let n = self
            .backing
            .read(&mut response[ReadResponse::METADATA_LEN..], request.offset as u64);
        ReadResponse::set_size(&mut response, n as u32);
        response.truncate(ReadResponse::METADATA_LEN + n);

        let written = stream.write(&response)?;
        if written != response.len() {
            warn!(
                target: "blockv::server",
                expected = response.len(),
                actual = written,
                "partial response write"
            );
        }
        Ok(false)
    }

    /// Serve a write request, reassembling a payload that spans multiple
    /// socket reads. Returns true when the session must end.
    fn handle_write(&self, stream: &mut TcpStream, buf: &[u8]) -> io::Result<bool> {
        let header = match WriteRequest::decode_header(buf) {
            Ok(header) => header,
            Err(e) => return Ok(fatal(e)),
        };
        debug!(
            target: "blockv::server",
            size = header.size,
            offset = header.offset,
            "write request"
        );

        let total = header.size as usize;
        let Some(mut payload) = alloc_zeroed(total) else {
            warn!(target: "blockv::server", size = header.size, "write payload allocation failed");
            return Ok(true);
        };

        // The first socket read may already hold part (or all) of the
        // payload behind the header.
        let present = (buf.len() - WriteRequest::HEADER_LEN).min(total);
        payload[..present].copy_from_slice(&buf[WriteRequest::HEADER_LEN..][..present]);

        let mut filled = present;
        while filled < total {
            let m = stream.read(&mut payload[filled..])?;
            if m == 0 {
                warn!(
                    target: "blockv::server",
                    filled,
                    total,
                    "connection closed mid-payload"
                );
                return Ok(true);
            }
            filled += m;
        }

        if self.backing.read_only() {
            debug!(target: "blockv::server", "dropping write on read-only device");
            return Ok(false);
        }

        let written = self.backing.write(&payload, header.offset as u64);
        debug!(
            target: "blockv::server",
            requested = header.size,
            written,
            offset = header.offset,
            "write complete"
        );

        // The response echoes the requested size, not the written count.
        let response = WriteResponse { size: header.size };
        stream.write_all(&response.encode())?;
        Ok(false)
    }
}

/// Log a session-fatal protocol error; always true.
fn fatal(e: ProtocolError) -> bool {
    warn!(target: "blockv::server", error = %e, "terminating session");
    true
}

fn alloc_zeroed(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::thread;

    fn spawn_server(backing: MemoryStore, sessions: usize) -> std::net::SocketAddr {
        let server = Server::bind("127.0.0.1:0", backing).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || {
            for _ in 0..sessions {
                server.serve_one().unwrap();
            }
        });
        addr
    }

    #[test]
    fn test_greeting_then_read() {
        let addr = spawn_server(MemoryStore::with_contents(b"hello sir!\0".to_vec()), 1);
        let mut stream = TcpStream::connect(addr).unwrap();

        let mut greeting = [0u8; ServerInfo::SERIALIZED_LEN];
        stream.read_exact(&mut greeting).unwrap();
        let info = ServerInfo::decode(&greeting).unwrap();
        assert_eq!(info.device_size, 11);
        assert!(!info.read_only);

        let request = ReadRequest { size: 5, offset: 0 };
        stream.write_all(&request.encode()).unwrap();

        let mut metadata = [0u8; ReadResponse::METADATA_LEN];
        stream.read_exact(&mut metadata).unwrap();
        assert_eq!(ReadResponse::decode_size(&metadata).unwrap(), 5);

        let mut payload = [0u8; 5];
        stream.read_exact(&mut payload).unwrap();
        assert_eq!(&payload, b"hello");
    }

    #[test]
    fn test_bind_rejects_oversized_backing() {
        struct Huge;
        impl Backing for Huge {
            fn size(&self) -> u64 {
                u64::from(u32::MAX) + 1
            }
            fn read_only(&self) -> bool {
                true
            }
            fn read(&self, _buf: &mut [u8], _offset: u64) -> usize {
                0
            }
            fn write(&self, _data: &[u8], _offset: u64) -> usize {
                0
            }
        }

        let result = Server::bind("127.0.0.1:0", Huge);
        assert!(result.is_err());
    }
}
