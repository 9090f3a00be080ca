//! Server greeting sent once per connection.

use super::{ProtocolError, MAGIC};

/// Unsolicited first message of every session, server to client.
///
/// Advertises the exported device's size and write policy. The magic field
/// is fixed on the wire and checked on decode; it is not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    /// Device size in bytes. The wire field is 32 bits, which caps exported
    /// devices at 4 GiB.
    pub device_size: u32,
    pub read_only: bool,
}

impl ServerInfo {
    /// Serialized size: magic + device_size + read_only, packed.
    pub const SERIALIZED_LEN: usize = 9;

    /// Serialize with all integers in network byte order.
    pub fn encode(&self) -> [u8; Self::SERIALIZED_LEN] {
        let mut buf = [0u8; Self::SERIALIZED_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&self.device_size.to_be_bytes());
        buf[8] = self.read_only as u8;
        buf
    }

    /// Parse a greeting, validating the magic value.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SERIALIZED_LEN {
            return Err(ProtocolError::ShortBuffer {
                need: Self::SERIALIZED_LEN,
                have: buf.len(),
            });
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic { found: magic });
        }

        Ok(Self {
            device_size: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            read_only: buf[8] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let info = ServerInfo {
            device_size: 0x0102_0304,
            read_only: false,
        };
        let buf = info.encode();
        assert_eq!(buf.len(), ServerInfo::SERIALIZED_LEN);
        assert_eq!(&buf[0..4], &[0xB0, 0xB0, 0xB0, 0xB0]);
        assert_eq!(&buf[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf[8], 0);
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = ServerInfo {
            device_size: 10,
            read_only: true,
        }
        .encode();
        buf[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());

        let result = ServerInfo::decode(&buf);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidMagic { found: 0xDEAD_BEEF })
        ));
    }

    #[test]
    fn test_decode_short_buffer() {
        let buf = [0xB0u8; 5];
        assert!(matches!(
            ServerInfo::decode(&buf),
            Err(ProtocolError::ShortBuffer { need: 9, have: 5 })
        ));
    }
}
