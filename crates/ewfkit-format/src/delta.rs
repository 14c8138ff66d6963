//! Delta chunk section header
//!
//! A delta segment file overwrites individual chunks of a sealed image in
//! place. Each `delta_chunk` section carries an 18-byte header followed by
//! the replacement chunk data (with its trailing checksum).

use ewfkit_core::{Error, Result};

/// Marker bytes of the delta chunk header
const DELTA_MARKER: [u8; 6] = *b"DELTA\x00";

/// Header of a `delta_chunk` section (18 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaChunkHeader {
    /// 1-based chunk number as stored on disk
    pub chunk_number: u32,
    /// Size of the chunk data that follows, including its checksum
    pub chunk_data_size: u32,
    pub checksum: u32,
}

impl DeltaChunkHeader {
    /// Serialized size
    pub const SIZE: usize = 18;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("delta chunk header too short"));
        }
        if data[8..14] != DELTA_MARKER {
            return Err(Error::corrupted_section("delta chunk marker missing"));
        }
        Ok(Self {
            chunk_number: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            chunk_data_size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            checksum: u32::from_le_bytes([data[14], data[15], data[16], data[17]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.chunk_number.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.chunk_data_size.to_le_bytes());
        bytes[8..14].copy_from_slice(&DELTA_MARKER);
        bytes[14..18].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let header = DeltaChunkHeader {
            chunk_number: 2,
            chunk_data_size: 32772,
            checksum: 0xdeadbeef,
        };
        let bytes = header.to_bytes();
        assert_eq!(DeltaChunkHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_marker_enforced() {
        let mut bytes = DeltaChunkHeader {
            chunk_number: 1,
            chunk_data_size: 16,
            checksum: 0,
        }
        .to_bytes();
        bytes[8] = b'X';
        assert!(DeltaChunkHeader::parse(&bytes).is_err());
    }
}
