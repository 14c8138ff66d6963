//! Shared EWF type definitions
//!
//! The format and segment-file-type enums drive section layout, compression
//! codec selection and size caps throughout the engine.

use std::fmt;

/// 2 TiB media size boundary for the older v1 formats
pub const MEDIA_SIZE_2_TIB: u64 = 2 * 1024 * 1024 * 1024 * 1024;

/// EWF format variant
///
/// Determines section layout, compression codec and segment caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Original EWF (always compressed chunks)
    Ewf,
    /// SMART EWF-S01 (always compressed chunks)
    Smart,
    /// FTK Imager E01
    FtkImager,
    /// EnCase 1 through 7 E01
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Encase7,
    /// Linen (LinEn) 5 through 7
    Linen5,
    Linen6,
    Linen7,
    /// Logical evidence L01, EnCase 5 through 7
    LogicalEncase5,
    LogicalEncase6,
    LogicalEncase7,
    /// EWF eXtension (libewf native, unrestricted offset tables, delta files)
    Ewfx,
    /// EWF version 2, EnCase 7 Ex01
    V2Encase7,
    /// EWF version 2, EnCase 7 Lx01
    V2LogicalEncase7,
}

impl Format {
    /// Whether this format uses the version 2 segment file layout
    pub fn is_v2(&self) -> bool {
        matches!(self, Format::V2Encase7 | Format::V2LogicalEncase7)
    }

    /// Whether chunks are always stored compressed
    pub fn forces_compression(&self) -> bool {
        matches!(self, Format::Ewf | Format::Smart)
    }

    /// Whether this format writes a redundant `table2` section
    pub fn writes_table2(&self) -> bool {
        !self.is_v2() && !matches!(self, Format::Ewf | Format::Smart | Format::Encase1)
    }

    /// Whether the offset table may grow without the per-section chunk cap
    pub fn unrestricted_offset_table(&self) -> bool {
        matches!(self, Format::Ewfx)
    }

    /// Whether media larger than 2 TiB can be written
    pub fn allows_large_media(&self) -> bool {
        matches!(
            self,
            Format::Encase6 | Format::Encase7 | Format::V2Encase7 | Format::Ewfx
        )
    }

    /// Whether a media size of zero permits streamed writing
    pub fn allows_streamed_write(&self) -> bool {
        !matches!(self, Format::Ewf | Format::Smart | Format::Encase1)
    }

    /// The segment file type this format is written as
    pub fn segment_file_type(&self) -> SegmentFileType {
        match self {
            Format::Smart => SegmentFileType::Ewf1Smart,
            Format::LogicalEncase5 | Format::LogicalEncase6 | Format::LogicalEncase7 => {
                SegmentFileType::Ewf1Logical
            }
            Format::V2Encase7 => SegmentFileType::Ewf2,
            Format::V2LogicalEncase7 => SegmentFileType::Ewf2Logical,
            _ => SegmentFileType::Ewf1,
        }
    }

    /// Upper bound on chunks per table section, if the format restricts it
    pub fn maximum_chunks_per_section(&self) -> u32 {
        match self {
            // EnCase 6 and later raised the table cap to fill a u16 minus sentinel
            Format::Encase6 | Format::Encase7 | Format::Linen6 | Format::Linen7 => 65534,
            Format::V2Encase7 | Format::V2LogicalEncase7 => 65534,
            Format::Ewfx => u32::MAX,
            _ => 16375,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Ewf => "EWF",
            Format::Smart => "SMART",
            Format::FtkImager => "FTK Imager",
            Format::Encase1 => "EnCase 1",
            Format::Encase2 => "EnCase 2",
            Format::Encase3 => "EnCase 3",
            Format::Encase4 => "EnCase 4",
            Format::Encase5 => "EnCase 5",
            Format::Encase6 => "EnCase 6",
            Format::Encase7 => "EnCase 7",
            Format::Linen5 => "Linen 5",
            Format::Linen6 => "Linen 6",
            Format::Linen7 => "Linen 7",
            Format::LogicalEncase5 => "Logical EnCase 5",
            Format::LogicalEncase6 => "Logical EnCase 6",
            Format::LogicalEncase7 => "Logical EnCase 7",
            Format::Ewfx => "EWFX",
            Format::V2Encase7 => "EWF2 EnCase 7",
            Format::V2LogicalEncase7 => "EWF2 Logical EnCase 7",
        };
        write!(f, "{name}")
    }
}

/// Segment file type, as encoded in the file header and filename extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFileType {
    /// Standard EWF v1 (.E01)
    Ewf1,
    /// SMART (.S01)
    Ewf1Smart,
    /// Logical evidence (.L01)
    Ewf1Logical,
    /// Delta (.D01)
    Ewf1Delta,
    /// EWF v2 (.Ex01)
    Ewf2,
    /// EWF v2 logical (.Lx01)
    Ewf2Logical,
}

impl SegmentFileType {
    /// First letter of the filename extension series
    pub fn extension_letter(&self) -> char {
        match self {
            SegmentFileType::Ewf1 => 'E',
            SegmentFileType::Ewf1Smart => 'S',
            SegmentFileType::Ewf1Logical => 'L',
            SegmentFileType::Ewf1Delta => 'D',
            SegmentFileType::Ewf2 => 'E',
            SegmentFileType::Ewf2Logical => 'L',
        }
    }

    /// Whether this is a version 2 segment file
    pub fn is_v2(&self) -> bool {
        matches!(self, SegmentFileType::Ewf2 | SegmentFileType::Ewf2Logical)
    }

    /// Maximum number of segment files for this type
    pub fn maximum_number_of_segments(&self) -> u32 {
        match self {
            SegmentFileType::Ewf1Smart => 4831,
            SegmentFileType::Ewf2 | SegmentFileType::Ewf2Logical => 99999,
            _ => 14295,
        }
    }
}

/// Media type byte of the volume section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// Removable media (floppy, USB, ...)
    Removable,
    /// Fixed disk
    Fixed,
    /// Optical media (CD, DVD)
    Optical,
    /// Single files, logical evidence
    SingleFiles,
    /// Memory (RAM)
    Memory,
    /// Unknown media type
    Unknown(u8),
}

impl From<u8> for MediaType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x0e => MediaType::SingleFiles,
            0x10 => MediaType::Memory,
            v => MediaType::Unknown(v),
        }
    }
}

impl From<MediaType> for u8 {
    fn from(value: MediaType) -> Self {
        match value {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::SingleFiles => 0x0e,
            MediaType::Memory => 0x10,
            MediaType::Unknown(v) => v,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Removable => write!(f, "Removable"),
            MediaType::Fixed => write!(f, "Fixed Disk"),
            MediaType::Optical => write!(f, "Optical"),
            MediaType::SingleFiles => write!(f, "Single Files"),
            MediaType::Memory => write!(f, "Memory"),
            MediaType::Unknown(v) => write!(f, "Unknown (0x{v:02X})"),
        }
    }
}

/// Media flag bits of the volume section
pub mod media_flags {
    /// The media is a physical device rather than a logical volume
    pub const PHYSICAL: u8 = 0x02;
    /// A Fastbloc write blocker was used during acquisition
    pub const FASTBLOC: u8 = 0x04;
    /// A Tableau write blocker was used during acquisition
    pub const TABLEAU: u8 = 0x08;
}

/// Compression codec used for chunk data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    None,
    /// zlib deflate, all v1 formats and EWF2 method 1
    Deflate,
    /// bzip2, EWF2 method 2 only
    Bzip2,
}

impl CompressionMethod {
    /// Wire value used in the v2 file header and case data
    pub fn wire_value(&self) -> u16 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 1,
            CompressionMethod::Bzip2 => 2,
        }
    }

    /// Decode the wire value of the v2 file header
    pub fn from_wire_value(value: u16) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::Bzip2),
            _ => None,
        }
    }
}

/// Compression effort level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Store chunks uncompressed when they do not shrink
    None,
    /// Fast compression
    Fast,
    /// Best compression
    Best,
}

impl CompressionLevel {
    /// Volume section byte value
    pub fn wire_value(&self) -> u8 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Best => 2,
        }
    }
}

/// Chunk range flags
///
/// The low three bits match the on-disk flags of a v2 sector table entry;
/// the remaining bits are engine-internal state.
pub mod range_flags {
    /// Chunk data is stored compressed
    pub const IS_COMPRESSED: u32 = 0x0000_0001;
    /// Uncompressed chunk data carries a trailing 4-byte checksum
    pub const HAS_CHECKSUM: u32 = 0x0000_0002;
    /// Chunk is stored as an 8-byte repeating pattern
    pub const USES_PATTERN_FILL: u32 = 0x0000_0004;
    /// Chunk location points into a delta segment file
    pub const IS_DELTA: u32 = 0x0000_0010;
    /// Chunk was rewritten through a delta file
    pub const IS_TAINTED: u32 = 0x0000_0020;
    /// Chunk failed verification
    pub const IS_CORRUPTED: u32 = 0x0000_0040;
    /// Buffer currently holds the packed on-disk form
    pub const IS_PACKED: u32 = 0x0000_0080;

    /// Flag bits that are stored on disk in a v2 sector table entry
    pub const ON_DISK_MASK: u32 = IS_COMPRESSED | HAS_CHECKSUM | USES_PATTERN_FILL;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_segment_file_type() {
        assert_eq!(Format::Encase6.segment_file_type(), SegmentFileType::Ewf1);
        assert_eq!(Format::Smart.segment_file_type(), SegmentFileType::Ewf1Smart);
        assert_eq!(
            Format::LogicalEncase6.segment_file_type(),
            SegmentFileType::Ewf1Logical
        );
        assert_eq!(Format::V2Encase7.segment_file_type(), SegmentFileType::Ewf2);
    }

    #[test]
    fn test_format_capabilities() {
        assert!(Format::Smart.forces_compression());
        assert!(!Format::Encase6.forces_compression());
        assert!(Format::Encase6.writes_table2());
        assert!(!Format::Encase1.writes_table2());
        assert!(Format::Encase6.allows_large_media());
        assert!(!Format::Encase5.allows_large_media());
    }

    #[test]
    fn test_maximum_number_of_segments() {
        assert_eq!(SegmentFileType::Ewf1.maximum_number_of_segments(), 14295);
        assert_eq!(SegmentFileType::Ewf1Smart.maximum_number_of_segments(), 4831);
        assert_eq!(SegmentFileType::Ewf2.maximum_number_of_segments(), 99999);
    }

    #[test]
    fn test_media_type_roundtrip() {
        for value in [0x00u8, 0x01, 0x03, 0x0e, 0x10, 0x42] {
            let media_type = MediaType::from(value);
            assert_eq!(u8::from(media_type), value);
        }
    }

    #[test]
    fn test_compression_method_wire_values() {
        assert_eq!(CompressionMethod::from_wire_value(1), Some(CompressionMethod::Deflate));
        assert_eq!(CompressionMethod::from_wire_value(2), Some(CompressionMethod::Bzip2));
        assert_eq!(CompressionMethod::from_wire_value(9), None);
        assert_eq!(CompressionMethod::Deflate.wire_value(), 1);
    }
}
