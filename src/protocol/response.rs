//! Server-to-client response messages.

use super::ProtocolError;

/// Read response: 4 bytes of metadata carrying the payload size, followed
/// by that many payload bytes.
///
/// The metadata size may be smaller than the request asked for (short reads
/// are allowed); receivers read the metadata first, then exactly that many
/// payload bytes.
pub struct ReadResponse;

impl ReadResponse {
    /// Size of the metadata preceding the payload.
    pub const METADATA_LEN: usize = 4;

    pub fn serialized_size(payload_len: u32) -> usize {
        Self::METADATA_LEN + payload_len as usize
    }

    /// Build a complete metadata + payload buffer ready to send.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::METADATA_LEN + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Write the metadata into the first four bytes of `buf`.
    ///
    /// Lets a sender fill the payload region in place first and stamp the
    /// actual count afterwards.
    pub fn set_size(buf: &mut [u8], size: u32) {
        buf[..Self::METADATA_LEN].copy_from_slice(&size.to_be_bytes());
    }

    /// Decode the payload size from the metadata.
    pub fn decode_size(buf: &[u8]) -> Result<u32, ProtocolError> {
        if buf.len() < Self::METADATA_LEN {
            return Err(ProtocolError::ShortBuffer {
                need: Self::METADATA_LEN,
                have: buf.len(),
            });
        }
        Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }
}

/// Write response carrying the byte count the server reports for the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub size: u32,
}

impl WriteResponse {
    pub const SERIALIZED_LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::SERIALIZED_LEN] {
        self.size.to_be_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SERIALIZED_LEN {
            return Err(ProtocolError::ShortBuffer {
                need: Self::SERIALIZED_LEN,
                have: buf.len(),
            });
        }
        Ok(Self {
            size: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_response_encode() {
        let buf = ReadResponse::encode(b"hello");
        assert_eq!(buf.len(), ReadResponse::serialized_size(5));
        assert_eq!(ReadResponse::decode_size(&buf).unwrap(), 5);
        assert_eq!(&buf[ReadResponse::METADATA_LEN..], b"hello");
    }

    #[test]
    fn test_read_response_set_size_in_place() {
        let mut buf = vec![0u8; ReadResponse::serialized_size(16)];
        buf[ReadResponse::METADATA_LEN..][..3].copy_from_slice(b"abc");
        ReadResponse::set_size(&mut buf, 3);
        assert_eq!(ReadResponse::decode_size(&buf).unwrap(), 3);
    }

    #[test]
    fn test_decode_size_short_buffer() {
        assert!(matches!(
            ReadResponse::decode_size(&[0, 0]),
            Err(ProtocolError::ShortBuffer { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_write_response_roundtrip() {
        let resp = WriteResponse { size: 8192 };
        assert_eq!(WriteResponse::decode(&resp.encode()).unwrap(), resp);
    }
}
