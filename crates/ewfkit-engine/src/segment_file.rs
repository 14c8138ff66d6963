//! Segment file parsing and section emission
//!
//! The read path walks the section chain of one segment file and collects
//! everything the engine needs: media geometry, metadata, table groups and
//! trailers. The write path emits sections with their descriptors; v1
//! descriptors lead their payload and link forward, v2 descriptors trail
//! their payload and link backward.

use ewfkit_codec::{decompress, DecompressOutcome};
use ewfkit_core::{CompressionMethod, Error, Result, SegmentFileType};
use ewfkit_format::{
    CaseData, DeltaChunkHeader, DeviceInformation, DigestSection, Error2Section, FileHeaderV1,
    FileHeaderV2, HashSection, HeaderValues, SectionDescriptorV1, SectionDescriptorV2, SectionType,
    SessionSection, TableEntryV1, TableEntryV2, TableHeader, VolumeSection,
};
use ewfkit_pool::FilePool;
use tracing::debug;

/// One section as located in a segment file
#[derive(Debug, Clone)]
pub struct SectionRecord {
    pub section_type: SectionType,
    /// Offset of the descriptor (v1) or payload (v2)
    pub start_offset: u64,
    pub end_offset: u64,
}

/// A v1 `sectors`/`table`/`table2` trio
#[derive(Debug, Clone)]
pub struct TableGroup {
    pub base_offset: u64,
    pub entries: Vec<TableEntryV1>,
    pub table2_entries: Option<Vec<TableEntryV1>>,
    /// End offset of the sectors payload, bounding the last chunk
    pub sectors_end: u64,
}

/// A v2 `sector_table` section
#[derive(Debug, Clone)]
pub struct SectorTableGroup {
    pub entries: Vec<TableEntryV2>,
}

/// One `delta_chunk` section
#[derive(Debug, Clone, Copy)]
pub struct DeltaChunkRecord {
    /// 0-based chunk index
    pub chunk_index: u64,
    /// Offset of the chunk data within the delta file
    pub data_offset: u64,
    /// Size of the chunk data including its checksum
    pub data_size: u32,
    /// Offset of the section descriptor, needed for in-place rewrite
    pub section_offset: u64,
}

/// Everything parsed out of one segment file
#[derive(Debug, Default)]
pub struct SegmentContent {
    pub volume: Option<VolumeSection>,
    /// Volume copy from a `data` section of a non-first segment
    pub data_volume: Option<VolumeSection>,
    pub header_values: Option<HeaderValues>,
    pub case_data: Option<CaseData>,
    pub device_information: Option<DeviceInformation>,
    pub hash: Option<HashSection>,
    pub digest: Option<DigestSection>,
    pub sessions: Option<SessionSection>,
    pub acquisition_errors: Option<Error2Section>,
    pub table_groups: Vec<TableGroup>,
    pub sector_tables: Vec<SectorTableGroup>,
    pub delta_chunks: Vec<DeltaChunkRecord>,
}

/// Parsed structure of one segment file
#[derive(Debug)]
pub struct SegmentFile {
    pub pool_entry: usize,
    pub segment_number: u32,
    pub segment_file_type: SegmentFileType,
    pub compression_method: CompressionMethod,
    pub set_identifier: Option<[u8; 16]>,
    pub sections: Vec<SectionRecord>,
    /// Ends with a `done` section
    pub is_complete: bool,
    pub content: SegmentContent,
}

impl SegmentFile {
    /// Parse a segment file from the pool
    ///
    /// With `tolerate_truncation` a structurally broken tail stops the walk
    /// instead of failing, leaving the sections parsed so far for resume.
    pub fn parse(
        pool: &FilePool,
        pool_entry: usize,
        tolerate_truncation: bool,
    ) -> Result<SegmentFile> {
        let mut signature = [0u8; 8];
        pool.read_at(pool_entry, 0, &mut signature)?;

        match ewfkit_format::detect_version(&signature)? {
            ewfkit_format::HeaderVersion::V1 => {
                Self::parse_v1(pool, pool_entry, tolerate_truncation)
            }
            ewfkit_format::HeaderVersion::V2 => Self::parse_v2(pool, pool_entry),
        }
    }

    fn parse_v1(
        pool: &FilePool,
        pool_entry: usize,
        tolerate_truncation: bool,
    ) -> Result<SegmentFile> {
        let mut header_bytes = [0u8; FileHeaderV1::SIZE];
        pool.read_at(pool_entry, 0, &mut header_bytes)?;
        let file_header = FileHeaderV1::parse(&header_bytes)?;

        let mut segment = SegmentFile {
            pool_entry,
            segment_number: file_header.segment_number as u32,
            segment_file_type: file_header.segment_file_type,
            compression_method: CompressionMethod::Deflate,
            set_identifier: None,
            sections: Vec::new(),
            is_complete: false,
            content: SegmentContent::default(),
        };

        let file_size = pool.size(pool_entry)?;
        let mut offset = FileHeaderV1::SIZE as u64;
        // The sectors payload waiting for its table sections
        let mut open_group: Option<(u64, u64)> = None;

        while offset + SectionDescriptorV1::SIZE as u64 <= file_size {
            let mut descriptor_bytes = [0u8; SectionDescriptorV1::SIZE];
            if let Err(error) = pool.read_at(pool_entry, offset, &mut descriptor_bytes) {
                if tolerate_truncation {
                    debug!(offset, "section walk stopped at unreadable descriptor");
                    break;
                }
                return Err(error);
            }
            let descriptor = match SectionDescriptorV1::parse(&descriptor_bytes) {
                Ok(descriptor) => descriptor,
                Err(error) => {
                    if tolerate_truncation {
                        debug!(offset, %error, "section walk stopped at corrupt descriptor");
                        break;
                    }
                    return Err(error);
                }
            };
            let payload_offset = offset + SectionDescriptorV1::SIZE as u64;
            let payload_size = descriptor.payload_size();
            let end_offset = payload_offset + payload_size;

            segment.sections.push(SectionRecord {
                section_type: descriptor.section_type.clone(),
                start_offset: offset,
                end_offset,
            });

            let parse_result = segment.ingest_v1_section(
                pool,
                &descriptor,
                payload_offset,
                payload_size,
                &mut open_group,
            );
            if let Err(error) = parse_result {
                if tolerate_truncation {
                    // Drop the section that failed to parse from the record
                    segment.sections.pop();
                    debug!(offset, %error, "section walk stopped at corrupt payload");
                    break;
                }
                return Err(error);
            }

            if descriptor.section_type.is_terminator() {
                segment.is_complete = descriptor.section_type == SectionType::Done;
                break;
            }
            if descriptor.next_offset <= offset {
                if tolerate_truncation {
                    break;
                }
                return Err(Error::corrupted_section(format!(
                    "section at {offset} links backward to {}",
                    descriptor.next_offset
                )));
            }
            offset = descriptor.next_offset;
        }

        let identifier_source = segment
            .content
            .volume
            .as_ref()
            .or(segment.content.data_volume.as_ref());
        if let Some(volume) = identifier_source {
            segment.set_identifier = Some(volume.set_identifier);
        }
        Ok(segment)
    }

    fn ingest_v1_section(
        &mut self,
        pool: &FilePool,
        descriptor: &SectionDescriptorV1,
        payload_offset: u64,
        payload_size: u64,
        open_group: &mut Option<(u64, u64)>,
    ) -> Result<()> {
        match &descriptor.section_type {
            SectionType::Header | SectionType::Header2 | SectionType::Xheader => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                let text = decompress_unsized(CompressionMethod::Deflate, &payload)?;
                // The first parseable header wins; later copies are identical
                if self.content.header_values.is_none() {
                    self.content.header_values =
                        Some(ewfkit_format::header_values::parse_header_text(&text)?);
                }
            }
            SectionType::Volume | SectionType::Disk => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.volume = Some(VolumeSection::parse(&payload)?);
            }
            SectionType::Data => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.data_volume = Some(VolumeSection::parse(&payload)?);
            }
            SectionType::Sectors => {
                *open_group = Some((payload_offset, payload_offset + payload_size));
            }
            SectionType::Table => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                let header = TableHeader::parse(&payload)?;
                let entries = ewfkit_format::table::parse_entries_v1(
                    &payload[TableHeader::SIZE..],
                    header.number_of_entries,
                    true,
                )?;
                let (_, sectors_end) = open_group.unwrap_or((0, 0));
                self.content.table_groups.push(TableGroup {
                    base_offset: header.base_offset,
                    entries,
                    table2_entries: None,
                    sectors_end,
                });
            }
            SectionType::Table2 => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                let header = TableHeader::parse(&payload)?;
                let entries = ewfkit_format::table::parse_entries_v1(
                    &payload[TableHeader::SIZE..],
                    header.number_of_entries,
                    true,
                )?;
                if let Some(group) = self.content.table_groups.last_mut() {
                    group.table2_entries = Some(entries);
                }
                *open_group = None;
            }
            SectionType::Hash => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.hash = Some(HashSection::parse(&payload)?);
            }
            SectionType::Digest => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.digest = Some(DigestSection::parse(&payload)?);
            }
            SectionType::Session => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.sessions = Some(SessionSection::parse(&payload)?);
            }
            SectionType::Error2 => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.acquisition_errors = Some(Error2Section::parse(&payload)?);
            }
            SectionType::DeltaChunk => {
                let mut header_bytes = [0u8; DeltaChunkHeader::SIZE];
                pool.read_at(self.pool_entry, payload_offset, &mut header_bytes)?;
                let header = DeltaChunkHeader::parse(&header_bytes)?;
                if header.chunk_number == 0 {
                    return Err(Error::corrupted_section("delta chunk number zero"));
                }
                self.content.delta_chunks.push(DeltaChunkRecord {
                    chunk_index: header.chunk_number as u64 - 1,
                    data_offset: payload_offset + DeltaChunkHeader::SIZE as u64,
                    data_size: header.chunk_data_size,
                    section_offset: payload_offset - SectionDescriptorV1::SIZE as u64,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_v2(pool: &FilePool, pool_entry: usize) -> Result<SegmentFile> {
        let mut header_bytes = [0u8; FileHeaderV2::SIZE];
        pool.read_at(pool_entry, 0, &mut header_bytes)?;
        let file_header = FileHeaderV2::parse(&header_bytes)?;

        let mut segment = SegmentFile {
            pool_entry,
            segment_number: file_header.segment_number,
            segment_file_type: SegmentFileType::Ewf2,
            compression_method: file_header.compression_method,
            set_identifier: Some(file_header.set_identifier),
            sections: Vec::new(),
            is_complete: false,
            content: SegmentContent::default(),
        };

        let file_size = pool.size(pool_entry)?;
        if file_size < (FileHeaderV2::SIZE + SectionDescriptorV2::SIZE) as u64 {
            return Err(Error::corrupted_section("v2 segment file too small"));
        }
        // Descriptors trail their payload; walk backward from the tail
        let mut descriptor_offset = file_size - SectionDescriptorV2::SIZE as u64;
        let mut reversed: Vec<(SectionDescriptorV2, u64)> = Vec::new();
        loop {
            let mut descriptor_bytes = [0u8; SectionDescriptorV2::SIZE];
            pool.read_at(pool_entry, descriptor_offset, &mut descriptor_bytes)?;
            let descriptor = SectionDescriptorV2::parse(&descriptor_bytes)?;
            let previous_offset = descriptor.previous_offset;
            reversed.push((descriptor, descriptor_offset));
            if previous_offset == 0 {
                break;
            }
            if previous_offset >= descriptor_offset {
                return Err(Error::corrupted_section(
                    "v2 section links forward or to itself",
                ));
            }
            descriptor_offset = previous_offset;
        }
        reversed.reverse();

        for (descriptor, descriptor_offset) in reversed {
            let payload_offset = descriptor_offset
                .checked_sub(descriptor.data_size)
                .ok_or_else(|| Error::corrupted_section("v2 payload larger than file prefix"))?;
            segment.sections.push(SectionRecord {
                section_type: descriptor.section_type.clone(),
                start_offset: payload_offset,
                end_offset: descriptor_offset + SectionDescriptorV2::SIZE as u64,
            });
            segment.ingest_v2_section(pool, &descriptor, payload_offset)?;
            if descriptor.section_type == SectionType::Done {
                segment.is_complete = true;
            }
        }
        Ok(segment)
    }

    fn ingest_v2_section(
        &mut self,
        pool: &FilePool,
        descriptor: &SectionDescriptorV2,
        payload_offset: u64,
    ) -> Result<()> {
        let payload_size = descriptor
            .data_size
            .saturating_sub(descriptor.padding_size as u64);
        match &descriptor.section_type {
            SectionType::CaseData => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                let text = decompress_unsized(self.compression_method, &payload)?;
                self.content.case_data = Some(CaseData::parse(&text)?);
            }
            SectionType::DeviceInformation => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                let text = decompress_unsized(self.compression_method, &payload)?;
                self.content.device_information = Some(DeviceInformation::parse(&text)?);
            }
            SectionType::SectorTable => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                let header = TableHeader::parse(&payload)?;
                let entries = ewfkit_format::table::parse_entries_v2(
                    &payload[TableHeader::SIZE..],
                    header.number_of_entries,
                )?;
                self.content.sector_tables.push(SectorTableGroup { entries });
            }
            SectionType::Hash => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.hash = Some(HashSection::parse(&payload)?);
            }
            SectionType::Digest => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.digest = Some(DigestSection::parse(&payload)?);
            }
            SectionType::Session => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.sessions = Some(SessionSection::parse(&payload)?);
            }
            SectionType::Error2 => {
                let payload = read_payload(pool, self.pool_entry, payload_offset, payload_size)?;
                self.content.acquisition_errors = Some(Error2Section::parse(&payload)?);
            }
            // sector_data payloads are addressed through the sector table
            _ => {}
        }
        Ok(())
    }
}

/// Write a v1 section: descriptor followed by payload
///
/// Returns the offset just past the section.
pub fn write_section_v1(
    pool: &FilePool,
    pool_entry: usize,
    offset: u64,
    section_type: SectionType,
    payload: &[u8],
) -> Result<u64> {
    let size = SectionDescriptorV1::SIZE as u64 + payload.len() as u64;
    let descriptor = SectionDescriptorV1 {
        section_type,
        next_offset: offset + size,
        size,
    };
    pool.write_at(pool_entry, offset, &descriptor.to_bytes())?;
    pool.write_at(pool_entry, offset + SectionDescriptorV1::SIZE as u64, payload)?;
    Ok(offset + size)
}

/// Write a v1 `done` or `next` terminator section
pub fn write_terminator_v1(
    pool: &FilePool,
    pool_entry: usize,
    offset: u64,
    section_type: SectionType,
) -> Result<u64> {
    let descriptor = SectionDescriptorV1 {
        section_type,
        next_offset: 0,
        size: SectionDescriptorV1::SIZE as u64,
    };
    pool.write_at(pool_entry, offset, &descriptor.to_bytes())?;
    Ok(offset + SectionDescriptorV1::SIZE as u64)
}

/// Write a v2 section: payload followed by descriptor
///
/// Returns the offset just past the descriptor and the descriptor offset,
/// which the next section links back to.
pub fn write_section_v2(
    pool: &FilePool,
    pool_entry: usize,
    offset: u64,
    previous_descriptor_offset: u64,
    section_type: SectionType,
    payload: &[u8],
    padding_size: u32,
) -> Result<(u64, u64)> {
    pool.write_at(pool_entry, offset, payload)?;
    let descriptor_offset = offset + payload.len() as u64;
    let descriptor = SectionDescriptorV2 {
        section_type,
        previous_offset: previous_descriptor_offset,
        data_size: payload.len() as u64,
        padding_size,
    };
    pool.write_at(pool_entry, descriptor_offset, &descriptor.to_bytes())?;
    Ok((
        descriptor_offset + SectionDescriptorV2::SIZE as u64,
        descriptor_offset,
    ))
}

fn read_payload(pool: &FilePool, pool_entry: usize, offset: u64, size: u64) -> Result<Vec<u8>> {
    if size > 64 * 1024 * 1024 {
        return Err(Error::corrupted_section(format!(
            "implausible section payload of {size} bytes"
        )));
    }
    let mut payload = vec![0u8; size as usize];
    pool.read_at(pool_entry, offset, &mut payload)?;
    Ok(payload)
}

/// Decompress a metadata payload whose unpacked size is not recorded
pub fn decompress_unsized(method: CompressionMethod, payload: &[u8]) -> Result<Vec<u8>> {
    let mut capacity = (payload.len() * 8).max(1024);
    loop {
        let mut output = vec![0u8; capacity];
        match decompress(method, payload, &mut output)? {
            DecompressOutcome::Complete(written) => {
                output.truncate(written);
                return Ok(output);
            }
            DecompressOutcome::NeedsCapacity(required) => {
                if required > 256 * 1024 * 1024 {
                    return Err(Error::corrupted_section(
                        "metadata payload expands implausibly",
                    ));
                }
                capacity = required;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewfkit_codec::compress;
    use ewfkit_core::CompressionLevel;
    use ewfkit_pool::AccessMode;
    use tempfile::TempDir;

    fn pool_with_file(dir: &TempDir, name: &str) -> (FilePool, usize) {
        let pool = FilePool::new();
        let entry = pool.add(dir.path().join(name), AccessMode::Create);
        (pool, entry)
    }

    #[test]
    fn test_v1_write_then_parse() {
        let dir = TempDir::new().unwrap();
        let (pool, entry) = pool_with_file(&dir, "seg.E01");

        let file_header = FileHeaderV1 {
            segment_file_type: SegmentFileType::Ewf1,
            segment_number: 1,
        };
        pool.write_at(entry, 0, &file_header.to_bytes().unwrap())
            .unwrap();
        let mut offset = FileHeaderV1::SIZE as u64;

        let header_text = "1\r\nmain\r\nc\tn\r\ncase-9\tevd\r\n\r\n";
        let compressed_header = compress(
            CompressionMethod::Deflate,
            CompressionLevel::Best,
            header_text.as_bytes(),
        )
        .unwrap();
        offset = write_section_v1(&pool, entry, offset, SectionType::Header, &compressed_header)
            .unwrap();

        let volume = VolumeSection {
            number_of_chunks: 2,
            number_of_sectors: 128,
            set_identifier: [5u8; 16],
            ..VolumeSection::default()
        };
        offset =
            write_section_v1(&pool, entry, offset, SectionType::Volume, &volume.to_bytes())
                .unwrap();
        write_terminator_v1(&pool, entry, offset, SectionType::Done).unwrap();

        let segment = SegmentFile::parse(&pool, entry, false).unwrap();
        assert_eq!(segment.segment_number, 1);
        assert!(segment.is_complete);
        assert_eq!(segment.sections.len(), 3);
        assert_eq!(segment.set_identifier, Some([5u8; 16]));
        assert_eq!(segment.content.volume.as_ref().unwrap(), &volume);
        let values = segment.content.header_values.as_ref().unwrap();
        assert_eq!(values.get("case_number"), Some("case-9"));
        assert_eq!(values.get("evidence_number"), Some("evd"));
    }

    #[test]
    fn test_v1_truncated_tail_tolerated() {
        let dir = TempDir::new().unwrap();
        let (pool, entry) = pool_with_file(&dir, "seg.E01");

        let file_header = FileHeaderV1 {
            segment_file_type: SegmentFileType::Ewf1,
            segment_number: 1,
        };
        pool.write_at(entry, 0, &file_header.to_bytes().unwrap())
            .unwrap();
        let mut offset = FileHeaderV1::SIZE as u64;
        let volume = VolumeSection::default();
        offset =
            write_section_v1(&pool, entry, offset, SectionType::Volume, &volume.to_bytes())
                .unwrap();
        // A descriptor that promises more than the file holds
        let dangling = SectionDescriptorV1 {
            section_type: SectionType::Sectors,
            next_offset: offset + 100_000,
            size: 100_000,
        };
        pool.write_at(entry, offset, &dangling.to_bytes()).unwrap();

        // Strict parse fails on the unreadable continuation
        assert!(SegmentFile::parse(&pool, entry, false).is_err());

        let segment = SegmentFile::parse(&pool, entry, true).unwrap();
        assert!(!segment.is_complete);
        assert!(segment.content.volume.is_some());
    }

    #[test]
    fn test_v2_write_then_parse() {
        let dir = TempDir::new().unwrap();
        let (pool, entry) = pool_with_file(&dir, "seg.Ex01");

        let file_header = FileHeaderV2 {
            major_version: 2,
            minor_version: 1,
            compression_method: CompressionMethod::Deflate,
            set_identifier: [9u8; 16],
            segment_number: 1,
        };
        pool.write_at(entry, 0, &file_header.to_bytes()).unwrap();
        let mut offset = FileHeaderV2::SIZE as u64;
        let mut previous = 0u64;

        let case_data = CaseData {
            number_of_chunks: Some(2),
            sectors_per_chunk: Some(64),
            ..CaseData::default()
        };
        let payload = compress(
            CompressionMethod::Deflate,
            CompressionLevel::Best,
            &case_data.generate(),
        )
        .unwrap();
        let (next, descriptor) = write_section_v2(
            &pool,
            entry,
            offset,
            previous,
            SectionType::CaseData,
            &payload,
            0,
        )
        .unwrap();
        offset = next;
        previous = descriptor;

        write_section_v2(&pool, entry, offset, previous, SectionType::Done, &[], 0).unwrap();

        let segment = SegmentFile::parse(&pool, entry, false).unwrap();
        assert_eq!(segment.segment_number, 1);
        assert!(segment.is_complete);
        assert_eq!(segment.set_identifier, Some([9u8; 16]));
        let parsed = segment.content.case_data.as_ref().unwrap();
        assert_eq!(parsed.number_of_chunks, Some(2));
        assert_eq!(parsed.sectors_per_chunk, Some(64));
    }
}
