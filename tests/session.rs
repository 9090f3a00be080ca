//! End-to-end server session tests over real TCP connections.
//!
//! Each test starts an in-process server on an ephemeral port and drives
//! it with a raw socket client, the way the filesystem client does.

use blockv::protocol::{
    FinishRequest, ReadRequest, ReadResponse, ServerInfo, WriteRequest, WriteResponse,
};
use blockv::server::Server;
use blockv::store::FileStore;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct ServerFixture {
    addr: SocketAddr,
    // Held so the image outlives the store's descriptor.
    _image: tempfile::NamedTempFile,
    handle: JoinHandle<()>,
}

impl ServerFixture {
    fn start(contents: &[u8], read_only: bool, sessions: usize) -> Self {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(contents).unwrap();
        image.flush().unwrap();

        let store = FileStore::open(image.path(), read_only).unwrap();
        let server = Server::bind("127.0.0.1:0", store).unwrap();
        let addr = server.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for _ in 0..sessions {
                server.serve_one().unwrap();
            }
        });

        Self {
            addr,
            _image: image,
            handle,
        }
    }

    fn connect(&self) -> (TcpStream, ServerInfo) {
        let mut stream = TcpStream::connect(self.addr).unwrap();
        let mut greeting = [0u8; ServerInfo::SERIALIZED_LEN];
        stream.read_exact(&mut greeting).unwrap();
        let info = ServerInfo::decode(&greeting).unwrap();
        (stream, info)
    }
}

fn read_at(stream: &mut TcpStream, size: u32, offset: u32) -> Vec<u8> {
    let request = ReadRequest { size, offset };
    stream.write_all(&request.encode()).unwrap();

    let mut metadata = [0u8; ReadResponse::METADATA_LEN];
    stream.read_exact(&mut metadata).unwrap();
    let size = ReadResponse::decode_size(&metadata).unwrap() as usize;

    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).unwrap();
    payload
}

fn write_at(stream: &mut TcpStream, payload: &[u8], offset: u32) -> WriteResponse {
    stream
        .write_all(&WriteRequest::encode(payload, offset))
        .unwrap();

    let mut ack = [0u8; WriteResponse::SERIALIZED_LEN];
    stream.read_exact(&mut ack).unwrap();
    WriteResponse::decode(&ack).unwrap()
}

#[test]
fn test_greeting_describes_device() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (_stream, info) = fixture.connect();
    assert_eq!(info.device_size, 11);
    assert!(info.read_only);
}

#[test]
fn test_read_from_start() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (mut stream, _) = fixture.connect();

    assert_eq!(read_at(&mut stream, 5, 0), b"hello");
}

#[test]
fn test_read_clamped_past_end() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (mut stream, _) = fixture.connect();

    assert_eq!(read_at(&mut stream, 100, 8), b"r!\0");
}

#[test]
fn test_read_beyond_device_is_empty() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (mut stream, _) = fixture.connect();

    assert_eq!(read_at(&mut stream, 10, 11), b"");
}

#[test]
fn test_write_then_read() {
    let fixture = ServerFixture::start(&[0u8; 10], false, 1);
    let (mut stream, info) = fixture.connect();
    assert!(!info.read_only);

    let ack = write_at(&mut stream, b"crazy", 0);
    assert_eq!(ack.size, 5);

    assert_eq!(read_at(&mut stream, 10, 0), b"crazy\0\0\0\0\0");
}

#[test]
fn test_finish_ends_session() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (mut stream, _) = fixture.connect();

    stream.write_all(&FinishRequest.encode()).unwrap();

    // No response; the server closes the socket and the session thread
    // returns.
    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf);
    assert!(matches!(n, Ok(0) | Err(_)));
    fixture.handle.join().unwrap();
}

#[test]
fn test_large_write_reassembled() {
    let fixture = ServerFixture::start(&[0u8; 16384], false, 1);
    let (mut stream, _) = fixture.connect();

    let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();

    // Send the header plus part of the payload, pause, then the rest, so
    // the server has to keep reading until the payload is complete.
    let request = WriteRequest::encode(&payload, 0);
    let (first, rest) = request.split_at(WriteRequest::HEADER_LEN + 4000);
    stream.write_all(first).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(rest).unwrap();

    let mut ack = [0u8; WriteResponse::SERIALIZED_LEN];
    stream.read_exact(&mut ack).unwrap();
    assert_eq!(WriteResponse::decode(&ack).unwrap().size, 8192);

    assert_eq!(read_at(&mut stream, 8192, 0), payload);
}

#[test]
fn test_invalid_kind_terminates_session() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 2);

    let (mut stream, _) = fixture.connect();
    stream.write_all(&[0x42]).unwrap();

    // The server drops the connection without responding.
    let mut buf = [0u8; 1];
    let n = stream.read(&mut buf);
    assert!(matches!(n, Ok(0) | Err(_)));

    // The next accept still works.
    let (mut stream, _) = fixture.connect();
    assert_eq!(read_at(&mut stream, 5, 0), b"hello");
}

#[test]
fn test_read_only_write_dropped_without_closing_session() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (mut stream, _) = fixture.connect();

    // No response is expected for a write dropped on a read-only device.
    stream
        .write_all(&WriteRequest::encode(b"crazy", 0))
        .unwrap();

    // The session survives and the contents are untouched.
    assert_eq!(read_at(&mut stream, 5, 0), b"hello");
}

#[test]
fn test_read_only_large_write_drains_payload() {
    let fixture = ServerFixture::start(b"hello sir!\0", true, 1);
    let (mut stream, _) = fixture.connect();

    // A payload bigger than the server's scratch read still gets drained,
    // otherwise its tail would be parsed as garbage requests.
    let payload = vec![0xAAu8; 8192];
    stream
        .write_all(&WriteRequest::encode(&payload, 0))
        .unwrap();

    assert_eq!(read_at(&mut stream, 5, 0), b"hello");
}

#[test]
fn test_sessions_share_backing_state() {
    let fixture = ServerFixture::start(&[0u8; 10], false, 2);

    let (mut stream, _) = fixture.connect();
    write_at(&mut stream, b"crazy", 0);
    stream.write_all(&FinishRequest.encode()).unwrap();
    drop(stream);

    let (mut stream, _) = fixture.connect();
    assert_eq!(read_at(&mut stream, 5, 0), b"crazy");
}
