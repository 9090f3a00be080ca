//! Client-to-server request messages.

use super::ProtocolError;

/// Exclusive lower bound of the request kind range.
pub const REQUEST_FIRST: u8 = 0xB0;
/// Exclusive upper bound of the request kind range.
pub const REQUEST_LAST: u8 = 0xB4;

/// Leading byte of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    Read = 0xB1,
    Write = 0xB2,
    Finish = 0xB3,
}

impl RequestKind {
    /// Parse a kind byte. Valid kinds lie strictly between
    /// [`REQUEST_FIRST`] and [`REQUEST_LAST`]; anything else is fatal to
    /// the session.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        if byte <= REQUEST_FIRST || byte >= REQUEST_LAST {
            return Err(ProtocolError::InvalidKind(byte));
        }
        match byte {
            0xB1 => Ok(Self::Read),
            0xB2 => Ok(Self::Write),
            0xB3 => Ok(Self::Finish),
            _ => Err(ProtocolError::InvalidKind(byte)),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Request `size` bytes starting at `offset`.
///
/// The server answers with a [`ReadResponse`](super::ReadResponse) whose
/// size may be smaller than requested (reads past the device end are
/// clamped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub size: u32,
    pub offset: u32,
}

impl ReadRequest {
    pub const SERIALIZED_LEN: usize = 9;

    pub fn encode(&self) -> [u8; Self::SERIALIZED_LEN] {
        let mut buf = [0u8; Self::SERIALIZED_LEN];
        buf[0] = RequestKind::Read.as_byte();
        buf[1..5].copy_from_slice(&self.size.to_be_bytes());
        buf[5..9].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    /// Parse a read request, kind byte included.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SERIALIZED_LEN {
            return Err(ProtocolError::ShortBuffer {
                need: Self::SERIALIZED_LEN,
                have: buf.len(),
            });
        }
        if buf[0] != RequestKind::Read.as_byte() {
            return Err(ProtocolError::InvalidKind(buf[0]));
        }
        Ok(Self {
            size: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            offset: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }
}

/// Header of a write request; `size` payload bytes follow it on the wire.
///
/// The payload may span several socket reads; receivers keep reading until
/// they have assembled exactly `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    pub size: u32,
    pub offset: u32,
}

impl WriteRequest {
    /// Metadata length; the payload starts at this offset.
    pub const HEADER_LEN: usize = 9;

    pub fn serialized_size(payload_len: u32) -> usize {
        Self::HEADER_LEN + payload_len as usize
    }

    /// Build a complete header + payload buffer ready to send.
    pub fn encode(payload: &[u8], offset: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + payload.len());
        buf.push(RequestKind::Write.as_byte());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Parse the leading header; the caller reads the payload separately.
    pub fn decode_header(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ProtocolError::ShortBuffer {
                need: Self::HEADER_LEN,
                have: buf.len(),
            });
        }
        if buf[0] != RequestKind::Write.as_byte() {
            return Err(ProtocolError::InvalidKind(buf[0]));
        }
        Ok(Self {
            size: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            offset: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }
}

/// Ends the session. No response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishRequest;

impl FinishRequest {
    pub const SERIALIZED_LEN: usize = 1;

    pub fn encode(&self) -> [u8; Self::SERIALIZED_LEN] {
        [RequestKind::Finish.as_byte()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_range() {
        assert!(RequestKind::from_byte(REQUEST_FIRST).is_err());
        assert!(RequestKind::from_byte(REQUEST_LAST).is_err());
        assert_eq!(RequestKind::from_byte(0xB1).unwrap(), RequestKind::Read);
        assert_eq!(RequestKind::from_byte(0xB2).unwrap(), RequestKind::Write);
        assert_eq!(RequestKind::from_byte(0xB3).unwrap(), RequestKind::Finish);
        assert!(matches!(
            RequestKind::from_byte(0x42),
            Err(ProtocolError::InvalidKind(0x42))
        ));
    }

    #[test]
    fn test_read_request_layout() {
        let req = ReadRequest {
            size: 5,
            offset: 0x0A0B_0C0D,
        };
        let buf = req.encode();
        assert_eq!(buf[0], 0xB1);
        assert_eq!(&buf[1..5], &[0, 0, 0, 5]);
        assert_eq!(&buf[5..9], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(ReadRequest::decode(&buf).unwrap(), req);
    }

    #[test]
    fn test_read_request_rejects_wrong_kind() {
        let mut buf = ReadRequest { size: 1, offset: 0 }.encode();
        buf[0] = RequestKind::Write.as_byte();
        assert!(matches!(
            ReadRequest::decode(&buf),
            Err(ProtocolError::InvalidKind(0xB2))
        ));
    }

    #[test]
    fn test_write_request_encode() {
        let buf = WriteRequest::encode(b"hello", 7);
        assert_eq!(buf.len(), WriteRequest::serialized_size(5));
        assert_eq!(buf[0], 0xB2);

        let header = WriteRequest::decode_header(&buf).unwrap();
        assert_eq!(header.size, 5);
        assert_eq!(header.offset, 7);
    }

    #[test]
    fn test_write_header_short_buffer() {
        let buf = [0xB2u8; 4];
        assert!(matches!(
            WriteRequest::decode_header(&buf),
            Err(ProtocolError::ShortBuffer { need: 9, have: 4 })
        ));
    }

    #[test]
    fn test_finish_encode() {
        assert_eq!(FinishRequest.encode(), [0xB3]);
    }
}
