//! Chunk offset table sections
//!
//! A v1 `table` section is a 24-byte header followed by 4-byte entries and a
//! 4-byte checksum footer over the entries. Bit 31 of an entry marks the
//! chunk compressed; the low 31 bits are the offset relative to
//! `base_offset` within the segment file. EnCase formats from version 4 on
//! write a redundant `table2` copy.
//!
//! A v2 `sector_table` uses the same header with 16-byte entries carrying an
//! absolute offset, size and flags.

use ewfkit_codec::ewf_checksum;
use ewfkit_core::{range_flags, Error, Result};

/// Compressed marker bit of a v1 table entry
const V1_COMPRESSED_BIT: u32 = 0x8000_0000;

/// Table section header (24 bytes, shared by v1 and v2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub number_of_entries: u32,
    pub base_offset: u64,
}

impl TableHeader {
    /// Serialized size
    pub const SIZE: usize = 24;

    /// Parse the header, verifying its checksum
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("table header too short"));
        }
        let stored = u32::from_le_bytes([data[20], data[21], data[22], data[23]]);
        if ewf_checksum(&data[0..20]) != stored {
            return Err(Error::checksum_mismatch("table header"));
        }
        let number_of_entries = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let base_offset = u64::from_le_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        Ok(Self {
            number_of_entries,
            base_offset,
        })
    }

    /// Serialize the header, computing the checksum
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.number_of_entries.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.base_offset.to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..20]);
        bytes[20..24].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

/// One v1 table entry: relative offset plus compressed bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntryV1 {
    /// Offset relative to the table's base offset; 31 bits
    pub relative_offset: u32,
    pub is_compressed: bool,
}

impl TableEntryV1 {
    /// Serialized size
    pub const SIZE: usize = 4;

    /// Largest storable relative offset
    pub const MAXIMUM_OFFSET: u32 = V1_COMPRESSED_BIT - 1;

    pub fn from_wire(value: u32) -> Self {
        Self {
            relative_offset: value & !V1_COMPRESSED_BIT,
            is_compressed: value & V1_COMPRESSED_BIT != 0,
        }
    }

    pub fn to_wire(self) -> u32 {
        let mut value = self.relative_offset & !V1_COMPRESSED_BIT;
        if self.is_compressed {
            value |= V1_COMPRESSED_BIT;
        }
        value
    }
}

/// One v2 sector table entry: absolute offset, size and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntryV2 {
    pub offset: u64,
    pub size: u32,
    pub flags: u32,
}

impl TableEntryV2 {
    /// Serialized size
    pub const SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("v2 table entry too short"));
        }
        Ok(Self {
            offset: u64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
            size: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            flags: u32::from_le_bytes([data[12], data[13], data[14], data[15]])
                & range_flags::ON_DISK_MASK,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes[12..16].copy_from_slice(&(self.flags & range_flags::ON_DISK_MASK).to_le_bytes());
        bytes
    }
}

/// Parse the v1 entry block and verify the footer checksum
///
/// The footer is optional in the earliest EWF/SMART images; pass
/// `has_footer` accordingly.
pub fn parse_entries_v1(
    data: &[u8],
    number_of_entries: u32,
    has_footer: bool,
) -> Result<Vec<TableEntryV1>> {
    let entries_size = number_of_entries as usize * TableEntryV1::SIZE;
    let required = entries_size + if has_footer { 4 } else { 0 };
    if data.len() < required {
        return Err(Error::corrupted_section(format!(
            "table entries truncated: {} of {required} bytes",
            data.len()
        )));
    }
    if has_footer {
        let stored = u32::from_le_bytes([
            data[entries_size],
            data[entries_size + 1],
            data[entries_size + 2],
            data[entries_size + 3],
        ]);
        if ewf_checksum(&data[0..entries_size]) != stored {
            return Err(Error::checksum_mismatch("table entries"));
        }
    }
    let mut entries = Vec::with_capacity(number_of_entries as usize);
    for index in 0..number_of_entries as usize {
        let offset = index * TableEntryV1::SIZE;
        let value = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        entries.push(TableEntryV1::from_wire(value));
    }
    Ok(entries)
}

/// Serialize the v1 entry block with its footer checksum
pub fn serialize_entries_v1(entries: &[TableEntryV1], with_footer: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.len() * TableEntryV1::SIZE + 4);
    for entry in entries {
        bytes.extend_from_slice(&entry.to_wire().to_le_bytes());
    }
    if with_footer {
        let checksum = ewf_checksum(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
    }
    bytes
}

/// Parse the v2 entry block and verify the footer checksum
pub fn parse_entries_v2(data: &[u8], number_of_entries: u32) -> Result<Vec<TableEntryV2>> {
    let entries_size = number_of_entries as usize * TableEntryV2::SIZE;
    if data.len() < entries_size + 4 {
        return Err(Error::corrupted_section("sector table entries truncated"));
    }
    let stored = u32::from_le_bytes([
        data[entries_size],
        data[entries_size + 1],
        data[entries_size + 2],
        data[entries_size + 3],
    ]);
    if ewf_checksum(&data[0..entries_size]) != stored {
        return Err(Error::checksum_mismatch("sector table entries"));
    }
    let mut entries = Vec::with_capacity(number_of_entries as usize);
    for index in 0..number_of_entries as usize {
        entries.push(TableEntryV2::parse(&data[index * TableEntryV2::SIZE..])?);
    }
    Ok(entries)
}

/// Serialize the v2 entry block with its footer checksum
pub fn serialize_entries_v2(entries: &[TableEntryV2]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.len() * TableEntryV2::SIZE + 4);
    for entry in entries {
        bytes.extend_from_slice(&entry.to_bytes());
    }
    let checksum = ewf_checksum(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = TableHeader {
            number_of_entries: 100,
            base_offset: 0x5000,
        };
        let bytes = header.to_bytes();
        assert_eq!(TableHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_checksum_enforced() {
        let mut bytes = TableHeader {
            number_of_entries: 1,
            base_offset: 0,
        }
        .to_bytes();
        bytes[0] ^= 1;
        assert!(TableHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_v1_entry_wire_format() {
        let compressed = TableEntryV1 {
            relative_offset: 0x1234,
            is_compressed: true,
        };
        assert_eq!(compressed.to_wire(), 0x8000_1234);
        assert_eq!(TableEntryV1::from_wire(0x8000_1234), compressed);

        let stored = TableEntryV1 {
            relative_offset: 0x7fff_ffff,
            is_compressed: false,
        };
        assert_eq!(stored.to_wire(), 0x7fff_ffff);
        assert_eq!(TableEntryV1::from_wire(0x7fff_ffff), stored);
    }

    #[test]
    fn test_v1_entries_roundtrip() {
        let entries = vec![
            TableEntryV1 {
                relative_offset: 76,
                is_compressed: true,
            },
            TableEntryV1 {
                relative_offset: 500,
                is_compressed: false,
            },
            TableEntryV1 {
                relative_offset: 33272,
                is_compressed: true,
            },
        ];
        let bytes = serialize_entries_v1(&entries, true);
        assert_eq!(bytes.len(), 3 * 4 + 4);
        assert_eq!(parse_entries_v1(&bytes, 3, true).unwrap(), entries);
    }

    #[test]
    fn test_v1_entries_footer_checksum_enforced() {
        let entries = vec![TableEntryV1 {
            relative_offset: 10,
            is_compressed: false,
        }];
        let mut bytes = serialize_entries_v1(&entries, true);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            parse_entries_v1(&bytes, 1, true),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn test_v2_entries_roundtrip() {
        let entries = vec![
            TableEntryV2 {
                offset: 0x9000,
                size: 4096,
                flags: range_flags::IS_COMPRESSED,
            },
            TableEntryV2 {
                offset: 0xa000,
                size: 32772,
                flags: range_flags::HAS_CHECKSUM,
            },
        ];
        let bytes = serialize_entries_v2(&entries);
        assert_eq!(parse_entries_v2(&bytes, 2).unwrap(), entries);
    }
}
