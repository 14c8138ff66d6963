//! Media values
//!
//! The geometry of the acquired media, immutable once the first chunk has
//! been read or written. All other components derive chunk addressing from
//! these values.

use ewfkit_core::{Error, MediaType, Result};

use crate::volume::VolumeSection;

/// Media geometry shared by every segment file of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaValues {
    pub media_size: u64,
    pub chunk_size: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub number_of_chunks: u64,
    pub number_of_sectors: u64,
    pub error_granularity: u32,
    pub media_type: MediaType,
    pub media_flags: u8,
    pub set_identifier: [u8; 16],
}

impl MediaValues {
    /// Build media values for a write session
    pub fn new(
        media_size: u64,
        sectors_per_chunk: u32,
        bytes_per_sector: u32,
        media_type: MediaType,
        set_identifier: [u8; 16],
    ) -> Result<Self> {
        if sectors_per_chunk == 0 || bytes_per_sector == 0 {
            return Err(Error::invalid_argument(
                "sectors per chunk and bytes per sector must be positive",
            ));
        }
        let chunk_size = sectors_per_chunk
            .checked_mul(bytes_per_sector)
            .ok_or_else(|| Error::invalid_argument("chunk size overflows 32 bits"))?;
        let number_of_chunks = media_size.div_ceil(chunk_size as u64);
        let number_of_sectors = media_size.div_ceil(bytes_per_sector as u64);
        Ok(Self {
            media_size,
            chunk_size,
            sectors_per_chunk,
            bytes_per_sector,
            number_of_chunks,
            number_of_sectors,
            error_granularity: sectors_per_chunk,
            media_type,
            media_flags: 0,
            set_identifier,
        })
    }

    /// Build media values from a parsed volume section
    pub fn from_volume(volume: &VolumeSection) -> Result<Self> {
        if volume.sectors_per_chunk == 0 || volume.bytes_per_sector == 0 {
            return Err(Error::corrupted_section(
                "volume section has zero chunk geometry",
            ));
        }
        let chunk_size = volume.chunk_size();
        let media_size = volume.media_size();
        Ok(Self {
            media_size,
            chunk_size,
            sectors_per_chunk: volume.sectors_per_chunk,
            bytes_per_sector: volume.bytes_per_sector,
            number_of_chunks: media_size.div_ceil(chunk_size as u64),
            number_of_sectors: volume.number_of_sectors,
            error_granularity: volume.error_granularity,
            media_type: volume.media_type,
            media_flags: volume.media_flags,
            set_identifier: volume.set_identifier,
        })
    }

    /// Produce the volume section for these values
    pub fn to_volume(&self, compression_level: u8) -> VolumeSection {
        VolumeSection {
            media_type: self.media_type,
            number_of_chunks: self.number_of_chunks.min(u32::MAX as u64) as u32,
            sectors_per_chunk: self.sectors_per_chunk,
            bytes_per_sector: self.bytes_per_sector,
            number_of_sectors: self.number_of_sectors,
            media_flags: self.media_flags,
            compression_level,
            error_granularity: self.error_granularity,
            set_identifier: self.set_identifier,
            ..VolumeSection::default()
        }
    }

    /// Fail unless another segment file's volume agrees on the fixed fields
    pub fn verify_consistency(&self, other: &MediaValues) -> Result<()> {
        if self.chunk_size != other.chunk_size {
            return Err(Error::field_mismatch(format!(
                "chunk size {} vs {}",
                self.chunk_size, other.chunk_size
            )));
        }
        if self.number_of_chunks != other.number_of_chunks {
            return Err(Error::field_mismatch(format!(
                "number of chunks {} vs {}",
                self.number_of_chunks, other.number_of_chunks
            )));
        }
        if self.set_identifier != other.set_identifier {
            return Err(Error::field_mismatch("set identifier differs"));
        }
        Ok(())
    }

    /// Chunk index covering a media byte offset
    pub fn chunk_index_for_offset(&self, offset: u64) -> u64 {
        offset / self.chunk_size as u64
    }

    /// Size of one chunk; the final chunk of the media may be short
    pub fn chunk_data_size(&self, chunk_index: u64) -> u64 {
        let start = chunk_index * self.chunk_size as u64;
        (self.media_size - start.min(self.media_size)).min(self.chunk_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_counts() {
        let media = MediaValues::new(98304, 64, 512, MediaType::Fixed, [0u8; 16]).unwrap();
        assert_eq!(media.chunk_size, 32768);
        assert_eq!(media.number_of_chunks, 3);
        assert_eq!(media.number_of_sectors, 192);
    }

    #[test]
    fn test_short_last_chunk() {
        let media = MediaValues::new(70000, 64, 512, MediaType::Fixed, [0u8; 16]).unwrap();
        assert_eq!(media.number_of_chunks, 3);
        assert_eq!(media.chunk_data_size(0), 32768);
        assert_eq!(media.chunk_data_size(2), 70000 - 2 * 32768);
    }

    #[test]
    fn test_volume_roundtrip() {
        let media = MediaValues::new(98304, 64, 512, MediaType::Fixed, [9u8; 16]).unwrap();
        let volume = media.to_volume(1);
        let restored = MediaValues::from_volume(&volume).unwrap();
        assert_eq!(restored, media);
    }

    #[test]
    fn test_consistency_check() {
        let media = MediaValues::new(98304, 64, 512, MediaType::Fixed, [1u8; 16]).unwrap();
        let mut sibling = media.clone();
        sibling.set_identifier = [2u8; 16];
        assert!(matches!(
            media.verify_consistency(&sibling),
            Err(Error::FormatFieldMismatch(_))
        ));
        assert!(media.verify_consistency(&media.clone()).is_ok());
    }

    #[test]
    fn test_zero_geometry_rejected() {
        assert!(MediaValues::new(1, 0, 512, MediaType::Fixed, [0u8; 16]).is_err());
        let volume = VolumeSection {
            sectors_per_chunk: 0,
            ..VolumeSection::default()
        };
        assert!(MediaValues::from_volume(&volume).is_err());
    }

    #[test]
    fn test_chunk_index_for_offset() {
        let media = MediaValues::new(98304, 64, 512, MediaType::Fixed, [0u8; 16]).unwrap();
        assert_eq!(media.chunk_index_for_offset(0), 0);
        assert_eq!(media.chunk_index_for_offset(32767), 0);
        assert_eq!(media.chunk_index_for_offset(32768), 1);
        assert_eq!(media.chunk_index_for_offset(98303), 2);
    }
}
