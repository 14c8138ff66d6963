//! Volume and disk section body
//!
//! The `volume` (or SMART `disk`) section carries the media geometry every
//! other component derives from: chunk layout, sector size, media size and
//! the set identifier. The body is a fixed 1052 bytes with a trailing
//! checksum over the first 1048.

use ewfkit_codec::ewf_checksum;
use ewfkit_core::{CompressionLevel, Error, MediaType, Result};

/// Parsed volume/disk section body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSection {
    pub media_type: MediaType,
    pub number_of_chunks: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub number_of_sectors: u64,
    pub chs_cylinders: u32,
    pub chs_heads: u32,
    pub chs_sectors: u32,
    pub media_flags: u8,
    pub palm_volume_start_sector: u32,
    pub smart_logs_start_sector: u32,
    pub compression_level: u8,
    pub error_granularity: u32,
    pub set_identifier: [u8; 16],
}

impl VolumeSection {
    /// Serialized size of the section body
    pub const SIZE: usize = 1052;

    /// Parse the section body, verifying its checksum
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("volume section too short"));
        }
        let stored = u32::from_le_bytes([data[1048], data[1049], data[1050], data[1051]]);
        if ewf_checksum(&data[0..1048]) != stored {
            return Err(Error::checksum_mismatch("volume section"));
        }

        let mut set_identifier = [0u8; 16];
        set_identifier.copy_from_slice(&data[75..91]);

        Ok(Self {
            media_type: MediaType::from(data[0]),
            number_of_chunks: read_u32(data, 3),
            sectors_per_chunk: read_u32(data, 7),
            bytes_per_sector: read_u32(data, 11),
            number_of_sectors: read_u64(data, 15),
            chs_cylinders: read_u32(data, 31),
            chs_heads: read_u32(data, 35),
            chs_sectors: read_u32(data, 39),
            media_flags: data[43],
            palm_volume_start_sector: read_u32(data, 51),
            smart_logs_start_sector: read_u32(data, 59),
            compression_level: data[63],
            error_granularity: read_u32(data, 67),
            set_identifier,
        })
    }

    /// Serialize the section body, computing the checksum
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::SIZE];
        bytes[0] = u8::from(self.media_type);
        write_u32(&mut bytes, 3, self.number_of_chunks);
        write_u32(&mut bytes, 7, self.sectors_per_chunk);
        write_u32(&mut bytes, 11, self.bytes_per_sector);
        write_u64(&mut bytes, 15, self.number_of_sectors);
        write_u32(&mut bytes, 31, self.chs_cylinders);
        write_u32(&mut bytes, 35, self.chs_heads);
        write_u32(&mut bytes, 39, self.chs_sectors);
        bytes[43] = self.media_flags;
        write_u32(&mut bytes, 51, self.palm_volume_start_sector);
        write_u32(&mut bytes, 59, self.smart_logs_start_sector);
        bytes[63] = self.compression_level;
        write_u32(&mut bytes, 67, self.error_granularity);
        bytes[75..91].copy_from_slice(&self.set_identifier);
        let checksum = ewf_checksum(&bytes[0..1048]);
        bytes[1048..1052].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Total media size in bytes
    pub fn media_size(&self) -> u64 {
        self.number_of_sectors * self.bytes_per_sector as u64
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> u32 {
        self.sectors_per_chunk * self.bytes_per_sector
    }
}

impl Default for VolumeSection {
    fn default() -> Self {
        Self {
            media_type: MediaType::Fixed,
            number_of_chunks: 0,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            number_of_sectors: 0,
            chs_cylinders: 0,
            chs_heads: 0,
            chs_sectors: 0,
            media_flags: 0,
            palm_volume_start_sector: 0,
            smart_logs_start_sector: 0,
            compression_level: CompressionLevel::Fast.wire_value(),
            error_granularity: 64,
            set_identifier: [0u8; 16],
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ])
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
