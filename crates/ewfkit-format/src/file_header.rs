//! Segment file headers
//!
//! Every segment file opens with a magic signature. Version 1 files carry a
//! 13-byte header with the segment-file type and segment number; version 2
//! files carry a larger header that also negotiates the compression method
//! and ties the file to its image through the set identifier.

use ewfkit_core::{CompressionMethod, Error, Result, SegmentFileType};
use ewfkit_codec::ewf_checksum;

/// EWF version 1 signature
pub const EVF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];

/// EWF version 2 signature
pub const EVF2_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0d, 0x0a, 0x81, 0x00];

/// Segment-file type byte of the v1 header
const V1_TYPE_SMART: u8 = 1;
const V1_TYPE_LOGICAL: u8 = 2;
const V1_TYPE_STANDARD: u8 = 3;
const V1_TYPE_DELTA: u8 = 4;

/// Version 1 file header (13 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeaderV1 {
    /// Segment file type
    pub segment_file_type: SegmentFileType,
    /// 1-based segment number
    pub segment_number: u16,
}

impl FileHeaderV1 {
    /// Serialized size
    pub const SIZE: usize = 13;

    /// Parse a v1 file header
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::magic_mismatch("v1 file header too short"));
        }
        if data[0..8] != EVF_SIGNATURE {
            return Err(Error::magic_mismatch("not an EWF v1 segment file"));
        }
        let segment_file_type = match data[8] {
            V1_TYPE_SMART => SegmentFileType::Ewf1Smart,
            V1_TYPE_LOGICAL => SegmentFileType::Ewf1Logical,
            V1_TYPE_STANDARD => SegmentFileType::Ewf1,
            V1_TYPE_DELTA => SegmentFileType::Ewf1Delta,
            value => {
                return Err(Error::magic_mismatch(format!(
                    "unknown v1 segment file type {value}"
                )))
            }
        };
        let segment_number = u16::from_le_bytes([data[9], data[10]]);
        if segment_number == 0 {
            return Err(Error::corrupted_section("segment number zero"));
        }
        Ok(Self {
            segment_file_type,
            segment_number,
        })
    }

    /// Serialize to the 13-byte wire form
    pub fn to_bytes(&self) -> Result<[u8; Self::SIZE]> {
        let type_byte = match self.segment_file_type {
            SegmentFileType::Ewf1Smart => V1_TYPE_SMART,
            SegmentFileType::Ewf1Logical => V1_TYPE_LOGICAL,
            SegmentFileType::Ewf1 => V1_TYPE_STANDARD,
            SegmentFileType::Ewf1Delta => V1_TYPE_DELTA,
            other => {
                return Err(Error::invalid_argument(format!(
                    "{other:?} is not a v1 segment file type"
                )))
            }
        };
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&EVF_SIGNATURE);
        bytes[8] = type_byte;
        bytes[9..11].copy_from_slice(&self.segment_number.to_le_bytes());
        Ok(bytes)
    }
}

/// Version 2 file header (36 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeaderV2 {
    /// Major format version; always 2
    pub major_version: u8,
    /// Minor format version
    pub minor_version: u8,
    /// Chunk compression method
    pub compression_method: CompressionMethod,
    /// Set identifier shared by all segment files of the image
    pub set_identifier: [u8; 16],
    /// 1-based segment number
    pub segment_number: u32,
}

impl FileHeaderV2 {
    /// Serialized size
    pub const SIZE: usize = 36;

    /// Parse a v2 file header, verifying its checksum
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::magic_mismatch("v2 file header too short"));
        }
        if data[0..8] != EVF2_SIGNATURE {
            return Err(Error::magic_mismatch("not an EWF v2 segment file"));
        }
        let major_version = data[8];
        let minor_version = data[9];
        if major_version != 2 {
            return Err(Error::unsupported(format!(
                "v2 major version {major_version}"
            )));
        }
        let method_value = u16::from_le_bytes([data[10], data[11]]);
        let compression_method = CompressionMethod::from_wire_value(method_value)
            .ok_or_else(|| Error::unsupported(format!("compression method {method_value}")))?;

        let mut set_identifier = [0u8; 16];
        set_identifier.copy_from_slice(&data[12..28]);

        let segment_number = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);
        if segment_number == 0 {
            return Err(Error::corrupted_section("segment number zero"));
        }
        let stored = u32::from_le_bytes([data[32], data[33], data[34], data[35]]);
        if ewf_checksum(&data[0..32]) != stored {
            return Err(Error::checksum_mismatch("v2 file header"));
        }
        Ok(Self {
            major_version,
            minor_version,
            compression_method,
            set_identifier,
            segment_number,
        })
    }

    /// Serialize to the 36-byte wire form, computing the checksum
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&EVF2_SIGNATURE);
        bytes[8] = self.major_version;
        bytes[9] = self.minor_version;
        bytes[10..12].copy_from_slice(&self.compression_method.wire_value().to_le_bytes());
        bytes[12..28].copy_from_slice(&self.set_identifier);
        bytes[28..32].copy_from_slice(&self.segment_number.to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..32]);
        bytes[32..36].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

/// Which header version a file starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVersion {
    V1,
    V2,
}

/// Sniff the header version from the first bytes of a file
pub fn detect_version(data: &[u8]) -> Result<HeaderVersion> {
    if data.len() >= 8 {
        if data[0..8] == EVF_SIGNATURE {
            return Ok(HeaderVersion::V1);
        }
        if data[0..8] == EVF2_SIGNATURE {
            return Ok(HeaderVersion::V2);
        }
    }
    Err(Error::magic_mismatch("unrecognized segment file signature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_roundtrip() {
        let header = FileHeaderV1 {
            segment_file_type: SegmentFileType::Ewf1,
            segment_number: 42,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 13);
        assert_eq!(FileHeaderV1::parse(&bytes).unwrap(), header);
        assert_eq!(detect_version(&bytes).unwrap(), HeaderVersion::V1);
    }

    #[test]
    fn test_v1_rejects_bad_magic() {
        let mut bytes = [0u8; 13];
        bytes[0..3].copy_from_slice(b"EVG");
        assert!(FileHeaderV1::parse(&bytes).is_err());
    }

    #[test]
    fn test_v1_rejects_segment_zero() {
        let header = FileHeaderV1 {
            segment_file_type: SegmentFileType::Ewf1Smart,
            segment_number: 1,
        };
        let mut bytes = header.to_bytes().unwrap();
        bytes[9] = 0;
        bytes[10] = 0;
        assert!(FileHeaderV1::parse(&bytes).is_err());
    }

    #[test]
    fn test_v2_roundtrip() {
        let header = FileHeaderV2 {
            major_version: 2,
            minor_version: 1,
            compression_method: CompressionMethod::Bzip2,
            set_identifier: [7u8; 16],
            segment_number: 3,
        };
        let bytes = header.to_bytes();
        assert_eq!(FileHeaderV2::parse(&bytes).unwrap(), header);
        assert_eq!(detect_version(&bytes).unwrap(), HeaderVersion::V2);
    }

    #[test]
    fn test_v2_checksum_is_verified() {
        let header = FileHeaderV2 {
            major_version: 2,
            minor_version: 1,
            compression_method: CompressionMethod::Deflate,
            set_identifier: [0u8; 16],
            segment_number: 1,
        };
        let mut bytes = header.to_bytes();
        bytes[12] ^= 0xff;
        assert!(matches!(
            FileHeaderV2::parse(&bytes),
            Err(Error::ChecksumMismatch(_))
        ));
    }
}
