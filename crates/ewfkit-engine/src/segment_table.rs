//! Segment table
//!
//! The ordered list of segment files making up one image, plus the delta
//! files overriding chunks of a sealed image. Built by parsing every pool
//! entry and slotting files by their declared segment number; gaps and
//! set-identifier mismatches are open-time failures.

use std::path::PathBuf;

use ewfkit_core::{Error, Result, SegmentFileType};
use ewfkit_pool::FilePool;

use crate::segment_file::SegmentFile;

/// Ordered segment files of one image
#[derive(Debug)]
pub struct SegmentTable {
    pub basename: PathBuf,
    pub maximum_segment_size: u64,
    segment_files: Vec<SegmentFile>,
    delta_files: Vec<SegmentFile>,
}

/// Default segment size cap: 1.4 GiB, the historical EnCase default
pub const DEFAULT_MAXIMUM_SEGMENT_SIZE: u64 = 1_572_864_000;

impl SegmentTable {
    pub fn new(basename: PathBuf, maximum_segment_size: u64) -> Self {
        Self {
            basename,
            maximum_segment_size,
            segment_files: Vec::new(),
            delta_files: Vec::new(),
        }
    }

    /// Parse every pool entry and build the ordered table
    ///
    /// Delta files are routed to their own list. With `tolerate_truncation`
    /// the last segment may be structurally incomplete (resume).
    pub fn build_from_pool(
        basename: PathBuf,
        maximum_segment_size: u64,
        pool: &FilePool,
        tolerate_truncation: bool,
    ) -> Result<Self> {
        let mut table = Self::new(basename, maximum_segment_size);
        let mut parsed: Vec<SegmentFile> = Vec::new();
        for pool_entry in 0..pool.number_of_entries() {
            match SegmentFile::parse(pool, pool_entry, tolerate_truncation) {
                Ok(segment) => parsed.push(segment),
                // A crashed writer can leave an empty or headerless file
                Err(error) if tolerate_truncation => {
                    tracing::warn!(pool_entry, %error, "skipping unparseable segment file");
                }
                Err(error) => return Err(error),
            }
        }

        let mut segments: Vec<SegmentFile> = Vec::new();
        for segment in parsed {
            if segment.segment_file_type == SegmentFileType::Ewf1Delta {
                table.delta_files.push(segment);
            } else {
                segments.push(segment);
            }
        }
        segments.sort_by_key(|segment| segment.segment_number);

        for (index, segment) in segments.iter().enumerate() {
            let expected = index as u32 + 1;
            if segment.segment_number != expected {
                return Err(Error::corrupted_section(format!(
                    "segment number {} where {expected} was expected",
                    segment.segment_number
                )));
            }
        }
        let reference_identifier = segments
            .iter()
            .chain(table.delta_files.iter())
            .find_map(|segment| segment.set_identifier);
        if let Some(reference) = reference_identifier {
            for segment in segments.iter().chain(table.delta_files.iter()) {
                if let Some(identifier) = segment.set_identifier {
                    if identifier != reference {
                        return Err(Error::field_mismatch(format!(
                            "segment {} carries a different set identifier",
                            segment.segment_number
                        )));
                    }
                }
            }
        }
        table.segment_files = segments;
        table.delta_files.sort_by_key(|segment| segment.segment_number);
        Ok(table)
    }

    /// Number of regular segment files
    pub fn number_of_segments(&self) -> u32 {
        self.segment_files.len() as u32
    }

    /// Number of delta segment files
    pub fn number_of_delta_segments(&self) -> u32 {
        self.delta_files.len() as u32
    }

    /// Segment file by 1-based segment number
    pub fn segment(&self, segment_number: u32) -> Option<&SegmentFile> {
        self.segment_files.get(segment_number.checked_sub(1)? as usize)
    }

    /// Iterate regular segment files in order
    pub fn segments(&self) -> impl Iterator<Item = &SegmentFile> {
        self.segment_files.iter()
    }

    /// Iterate delta segment files in order
    pub fn delta_segments(&self) -> impl Iterator<Item = &SegmentFile> {
        self.delta_files.iter()
    }

    /// Last regular segment file
    pub fn last_segment(&self) -> Option<&SegmentFile> {
        self.segment_files.last()
    }

    /// Last delta segment file
    pub fn last_delta_segment(&self) -> Option<&SegmentFile> {
        self.delta_files.last()
    }

    /// Append a segment produced by the writer
    pub fn push_segment(&mut self, segment: SegmentFile) {
        self.segment_files.push(segment);
    }

    /// Append a delta segment produced by the writer
    pub fn push_delta_segment(&mut self, segment: SegmentFile) {
        self.delta_files.push(segment);
    }

    /// Replace the delta segment backed by the same pool entry, or append
    pub fn replace_or_push_delta(&mut self, segment: SegmentFile) {
        if let Some(existing) = self
            .delta_files
            .iter_mut()
            .find(|delta| delta.pool_entry == segment.pool_entry)
        {
            *existing = segment;
        } else {
            self.delta_files.push(segment);
        }
    }

    /// Drop the last regular segment; resume uses this to retry a segment
    pub fn pop_segment(&mut self) -> Option<SegmentFile> {
        self.segment_files.pop()
    }

    /// Whether the image ends with a `done` section
    pub fn is_complete(&self) -> bool {
        self.segment_files
            .last()
            .map(|segment| segment.is_complete)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_file::{write_section_v1, write_terminator_v1};
    use ewfkit_format::{FileHeaderV1, SectionType, VolumeSection};
    use ewfkit_pool::AccessMode;
    use tempfile::TempDir;

    fn write_minimal_segment(
        pool: &FilePool,
        dir: &TempDir,
        name: &str,
        segment_number: u16,
        set_identifier: [u8; 16],
        last: bool,
    ) -> usize {
        let entry = pool.add(dir.path().join(name), AccessMode::Create);
        let header = FileHeaderV1 {
            segment_file_type: SegmentFileType::Ewf1,
            segment_number,
        };
        pool.write_at(entry, 0, &header.to_bytes().unwrap()).unwrap();
        let mut offset = FileHeaderV1::SIZE as u64;
        let volume = VolumeSection {
            set_identifier,
            ..VolumeSection::default()
        };
        offset = write_section_v1(pool, entry, offset, SectionType::Volume, &volume.to_bytes())
            .unwrap();
        let terminator = if last {
            SectionType::Done
        } else {
            SectionType::Next
        };
        write_terminator_v1(pool, entry, offset, terminator).unwrap();
        entry
    }

    #[test]
    fn test_build_orders_segments() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::new();
        // Added out of order on purpose
        write_minimal_segment(&pool, &dir, "img.E02", 2, [1u8; 16], true);
        write_minimal_segment(&pool, &dir, "img.E01", 1, [1u8; 16], false);

        let table = SegmentTable::build_from_pool(
            dir.path().join("img"),
            DEFAULT_MAXIMUM_SEGMENT_SIZE,
            &pool,
            false,
        )
        .unwrap();
        assert_eq!(table.number_of_segments(), 2);
        assert_eq!(table.segment(1).unwrap().segment_number, 1);
        assert_eq!(table.segment(2).unwrap().segment_number, 2);
        assert!(table.is_complete());
    }

    #[test]
    fn test_gap_is_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::new();
        write_minimal_segment(&pool, &dir, "img.E01", 1, [1u8; 16], false);
        write_minimal_segment(&pool, &dir, "img.E03", 3, [1u8; 16], true);

        let result = SegmentTable::build_from_pool(
            dir.path().join("img"),
            DEFAULT_MAXIMUM_SEGMENT_SIZE,
            &pool,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_set_identifier_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = FilePool::new();
        write_minimal_segment(&pool, &dir, "img.E01", 1, [1u8; 16], false);
        write_minimal_segment(&pool, &dir, "img.E02", 2, [2u8; 16], true);

        let result = SegmentTable::build_from_pool(
            dir.path().join("img"),
            DEFAULT_MAXIMUM_SEGMENT_SIZE,
            &pool,
            false,
        );
        assert!(matches!(result, Err(Error::FormatFieldMismatch(_))));
    }
}
