//! Wire protocol for block-device traffic between client and server.
//!
//! # Message layout
//!
//! Every message has a fixed-offset, packed, big-endian layout; there is no
//! outer framing beyond the length fields carried inside the messages
//! themselves:
//!
//! ```text
//! ServerInfo     | magic u32 | device_size u32 | read_only u8 |          9 bytes
//! ReadRequest    | kind u8   | size u32        | offset u32   |          9 bytes
//! ReadResponse   | size u32  | payload ...     |                4 + size bytes
//! WriteRequest   | kind u8   | size u32        | offset u32   | payload  9 + size bytes
//! WriteResponse  | size u32  |                                           4 bytes
//! FinishRequest  | kind u8   |                                           1 byte
//! ```
//!
//! The server sends a `ServerInfo` greeting as the first bytes of every
//! connection; request/response pairs follow until the client sends
//! `Finish` or closes the socket. Callers of the variable-payload messages
//! read the metadata first, decode the payload length, then read the
//! remainder.

mod greeting;
mod request;
mod response;

pub use greeting::ServerInfo;
pub use request::{
    FinishRequest, ReadRequest, RequestKind, WriteRequest, REQUEST_FIRST, REQUEST_LAST,
};
pub use response::{ReadResponse, WriteResponse};

use std::io;
use thiserror::Error;

/// Magic value prefixing every `ServerInfo`; authenticates the protocol.
pub const MAGIC: u32 = 0xB0B0_B0B0;

/// Wire protocol errors. None of these are recoverable in place; the
/// caller drops the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic: expected 0x{MAGIC:08x}, got 0x{found:08x}")]
    InvalidMagic { found: u32 },

    #[error("invalid request kind: 0x{0:02x}")]
    InvalidKind(u8),

    #[error("buffer too short: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_response_roundtrip() {
        let req = ReadRequest {
            size: 4096,
            offset: 512,
        };
        let decoded = ReadRequest::decode(&req.encode()).unwrap();
        assert_eq!(req, decoded);

        let payload = b"crazy";
        let buf = WriteRequest::encode(payload, 3);
        let header = WriteRequest::decode_header(&buf).unwrap();
        assert_eq!(header.size, payload.len() as u32);
        assert_eq!(header.offset, 3);
        assert_eq!(&buf[WriteRequest::HEADER_LEN..], payload);

        let resp = WriteResponse { size: 5 };
        assert_eq!(WriteResponse::decode(&resp.encode()).unwrap(), resp);
    }

    #[test]
    fn test_greeting_roundtrip() {
        let info = ServerInfo {
            device_size: 10,
            read_only: true,
        };
        let decoded = ServerInfo::decode(&info.encode()).unwrap();
        assert_eq!(info, decoded);
    }
}
