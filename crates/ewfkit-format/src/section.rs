//! Section descriptors
//!
//! A segment file is a chain of typed sections. Version 1 descriptors are
//! 76 bytes and link forward through `next_offset`; version 2 descriptors
//! link backward through `previous_offset` and are walked from the file
//! tail. Unknown section types are preserved so a rewrite keeps fidelity.

use std::fmt;

use ewfkit_codec::ewf_checksum;
use ewfkit_core::{Error, Result};

/// Typed section name, keyed by the 16-byte type string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionType {
    Header,
    Header2,
    Xheader,
    Volume,
    Disk,
    Data,
    Sectors,
    Table,
    Table2,
    Ltree,
    Session,
    Error2,
    Digest,
    Hash,
    Xhash,
    Done,
    Next,
    CaseData,
    DeviceInformation,
    SectorData,
    SectorTable,
    AnalyticalData,
    DeltaChunk,
    /// Unknown type, preserved verbatim for rewrite fidelity
    Other(String),
}

impl SectionType {
    /// Parse the NUL-padded 16-byte type string
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let name = bytes
            .iter()
            .take_while(|&&byte| byte != 0)
            .map(|&byte| byte as char)
            .collect::<String>();
        match name.as_str() {
            "header" => SectionType::Header,
            "header2" => SectionType::Header2,
            "xheader" => SectionType::Xheader,
            "volume" => SectionType::Volume,
            "disk" => SectionType::Disk,
            "data" => SectionType::Data,
            "sectors" => SectionType::Sectors,
            "table" => SectionType::Table,
            "table2" => SectionType::Table2,
            "ltree" => SectionType::Ltree,
            "session" => SectionType::Session,
            "error2" => SectionType::Error2,
            "digest" => SectionType::Digest,
            "hash" => SectionType::Hash,
            "xhash" => SectionType::Xhash,
            "done" => SectionType::Done,
            "next" => SectionType::Next,
            "case_data" => SectionType::CaseData,
            "device_information" => SectionType::DeviceInformation,
            "sector_data" => SectionType::SectorData,
            "sector_table" => SectionType::SectorTable,
            "analytical_data" => SectionType::AnalyticalData,
            "delta_chunk" => SectionType::DeltaChunk,
            _ => SectionType::Other(name),
        }
    }

    /// Canonical type string
    pub fn name(&self) -> &str {
        match self {
            SectionType::Header => "header",
            SectionType::Header2 => "header2",
            SectionType::Xheader => "xheader",
            SectionType::Volume => "volume",
            SectionType::Disk => "disk",
            SectionType::Data => "data",
            SectionType::Sectors => "sectors",
            SectionType::Table => "table",
            SectionType::Table2 => "table2",
            SectionType::Ltree => "ltree",
            SectionType::Session => "session",
            SectionType::Error2 => "error2",
            SectionType::Digest => "digest",
            SectionType::Hash => "hash",
            SectionType::Xhash => "xhash",
            SectionType::Done => "done",
            SectionType::Next => "next",
            SectionType::CaseData => "case_data",
            SectionType::DeviceInformation => "device_information",
            SectionType::SectorData => "sector_data",
            SectionType::SectorTable => "sector_table",
            SectionType::AnalyticalData => "analytical_data",
            SectionType::DeltaChunk => "delta_chunk",
            SectionType::Other(name) => name,
        }
    }

    /// Serialize to the NUL-padded 16-byte type string
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        let name = self.name().as_bytes();
        let length = name.len().min(16);
        bytes[..length].copy_from_slice(&name[..length]);
        bytes
    }

    /// Whether this section ends the section walk of a segment file
    pub fn is_terminator(&self) -> bool {
        matches!(self, SectionType::Done | SectionType::Next)
    }

    /// Whether this section belongs to the trailer group a resumable write
    /// backtracks over
    pub fn is_trailer(&self) -> bool {
        matches!(
            self,
            SectionType::Data
                | SectionType::Hash
                | SectionType::Xhash
                | SectionType::Digest
                | SectionType::Error2
                | SectionType::Session
        )
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Version 1 section descriptor (76 bytes)
///
/// `size` covers the descriptor plus the payload. `next_offset` is the
/// absolute file offset of the next descriptor; a terminator points at
/// itself or zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptorV1 {
    pub section_type: SectionType,
    pub next_offset: u64,
    pub size: u64,
}

impl SectionDescriptorV1 {
    /// Serialized size
    pub const SIZE: usize = 76;

    /// Parse a descriptor and verify its checksum
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("v1 section descriptor too short"));
        }
        let stored = u32::from_le_bytes([data[72], data[73], data[74], data[75]]);
        if ewf_checksum(&data[0..72]) != stored {
            return Err(Error::checksum_mismatch("v1 section descriptor"));
        }
        let mut type_bytes = [0u8; 16];
        type_bytes.copy_from_slice(&data[0..16]);
        let section_type = SectionType::from_bytes(&type_bytes);

        let next_offset = u64::from_le_bytes([
            data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
        ]);
        let size = u64::from_le_bytes([
            data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
        ]);
        if size != 0 && size < Self::SIZE as u64 {
            return Err(Error::corrupted_section(format!(
                "section size {size} smaller than descriptor"
            )));
        }
        Ok(Self {
            section_type,
            next_offset,
            size,
        })
    }

    /// Serialize, computing the checksum
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..16].copy_from_slice(&self.section_type.to_bytes());
        bytes[16..24].copy_from_slice(&self.next_offset.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.size.to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..72]);
        bytes[72..76].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Payload size excluding the descriptor itself
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(Self::SIZE as u64)
    }
}

/// Version 2 section descriptor
///
/// Links backward: `previous_offset` is the absolute offset of the previous
/// descriptor, zero for the first. The descriptor is written after its
/// payload, so the file is walked from the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptorV2 {
    pub section_type: SectionType,
    pub previous_offset: u64,
    /// Payload size excluding the descriptor
    pub data_size: u64,
    /// Alignment padding included in `data_size`
    pub padding_size: u32,
}

impl SectionDescriptorV2 {
    /// Serialized size of the fixed part
    pub const SIZE: usize = 44;

    /// Parse a descriptor and verify its checksum
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("v2 section descriptor too short"));
        }
        let stored = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
        if ewf_checksum(&data[0..40]) != stored {
            return Err(Error::checksum_mismatch("v2 section descriptor"));
        }
        let mut type_bytes = [0u8; 16];
        type_bytes.copy_from_slice(&data[0..16]);
        let section_type = SectionType::from_bytes(&type_bytes);

        let previous_offset = u64::from_le_bytes([
            data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
        ]);
        let data_size = u64::from_le_bytes([
            data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
        ]);
        let descriptor_size = u32::from_le_bytes([data[32], data[33], data[34], data[35]]);
        if (descriptor_size as usize) < Self::SIZE {
            return Err(Error::corrupted_section(
                "v2 descriptor size smaller than fixed part",
            ));
        }
        let padding_size = u32::from_le_bytes([data[36], data[37], data[38], data[39]]);
        Ok(Self {
            section_type,
            previous_offset,
            data_size,
            padding_size,
        })
    }

    /// Serialize, computing the checksum
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..16].copy_from_slice(&self.section_type.to_bytes());
        bytes[16..24].copy_from_slice(&self.previous_offset.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.data_size.to_le_bytes());
        bytes[32..36].copy_from_slice(&(Self::SIZE as u32).to_le_bytes());
        bytes[36..40].copy_from_slice(&self.padding_size.to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..40]);
        bytes[40..44].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}
