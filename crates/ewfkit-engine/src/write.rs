//! Write IO engine
//!
//! Streams chunks into numbered segment files under a size cap. Chunks are
//! packed, appended to an open chunks section, and the section's offset
//! table is written when the section closes. Segment files rotate when the
//! next chunk would not fit; the last segment carries the hash trailers and
//! the `done` section. A truncated write can be resumed from the last
//! durable table.

use md5::{Digest, Md5};
use sha1::Sha1;
use tracing::{debug, info};

use ewfkit_codec::{compress, ewf_checksum};
use ewfkit_core::{
    range_flags, CompressionLevel, CompressionMethod, Error, Format, Result, SegmentFileType,
    MEDIA_SIZE_2_TIB,
};
use ewfkit_format::{
    table, CaseData, DeltaChunkHeader, DeviceInformation, DigestSection, Error2Section,
    FileHeaderV1, FileHeaderV2, HashSection, HeaderValues, MediaValues, SectionDescriptorV1,
    SectionDescriptorV2, SectionType, SectorRange, SessionSection, TableEntryV1, TableEntryV2,
    TableHeader,
};
use ewfkit_pool::{AccessMode, FilePool};

use crate::chunk::{pack_flags, ChunkData};
use crate::chunk_table::{ChunkLocation, ChunkTable};
use crate::filename::segment_filename;
use crate::segment_file::{write_section_v1, write_section_v2, write_terminator_v1, SegmentFile};
use crate::segment_table::SegmentTable;

/// One recorded chunk of the open chunks section
#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    file_offset: u64,
    size: u32,
    flags: u32,
}

/// The open chunks section of the current segment file
#[derive(Debug)]
struct ChunksSection {
    /// Offset of the reserved v1 `sectors` descriptor; unused for v2
    descriptor_offset: u64,
    /// Start of the packed chunk payload
    data_start: u64,
    entries: Vec<PendingEntry>,
}

/// The segment file currently being written
#[derive(Debug)]
struct CurrentSegment {
    pool_entry: usize,
    segment_number: u32,
    /// Append offset
    offset: u64,
    /// v2 backward link
    previous_descriptor_offset: u64,
    chunks_in_segment: u64,
    chunks_section: Option<ChunksSection>,
}

/// Chunk-level writer with segment rotation and resume
pub struct WriteEngine {
    format: Format,
    segment_file_type: SegmentFileType,
    compression_method: CompressionMethod,
    compression_level: CompressionLevel,
    pack_flags: u8,
    header_values: HeaderValues,
    sessions: Vec<SectorRange>,
    acquisition_errors: Vec<SectorRange>,

    values_initialized: bool,
    finalized: bool,
    compressed_zero_block: Option<Vec<u8>>,

    number_of_chunks_written: u64,
    input_write_count: u64,
    segments_created: u32,
    delta_segments_created: u32,

    current: Option<CurrentSegment>,

    md5: Md5,
    sha1: Sha1,
}

impl WriteEngine {
    pub fn new(
        format: Format,
        compression_method: CompressionMethod,
        compression_level: CompressionLevel,
        header_values: HeaderValues,
    ) -> Result<Self> {
        if compression_method == CompressionMethod::Bzip2 && !format.is_v2() {
            return Err(Error::unsupported("bzip2 requires an EWF2 format"));
        }
        Ok(Self {
            format,
            segment_file_type: format.segment_file_type(),
            compression_method,
            compression_level,
            pack_flags: 0,
            header_values,
            sessions: Vec::new(),
            acquisition_errors: Vec::new(),
            values_initialized: false,
            finalized: false,
            compressed_zero_block: None,
            number_of_chunks_written: 0,
            input_write_count: 0,
            segments_created: 0,
            delta_segments_created: 0,
            current: None,
            md5: Md5::new(),
            sha1: Sha1::new(),
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    pub fn number_of_chunks_written(&self) -> u64 {
        self.number_of_chunks_written
    }

    pub fn input_write_count(&self) -> u64 {
        self.input_write_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Replace the header values; only before the first segment exists
    pub fn set_header_values(&mut self, header_values: HeaderValues) -> Result<()> {
        if self.segments_created > 0 {
            return Err(Error::invalid_argument(
                "header values are fixed once writing starts",
            ));
        }
        self.header_values = header_values;
        Ok(())
    }

    /// Record a session to be written with the trailers
    pub fn add_session(&mut self, session: SectorRange) {
        self.sessions.push(session);
    }

    /// Record an acquisition read error to be written with the trailers
    pub fn add_acquisition_error(&mut self, range: SectorRange) {
        self.acquisition_errors.push(range);
    }

    /// One-time setup before the first chunk is written
    fn initialize_values(
        &mut self,
        media: &MediaValues,
        segment_table: &SegmentTable,
    ) -> Result<()> {
        if self.values_initialized {
            return Ok(());
        }
        self.pack_flags = pack_flags::CALCULATE_CHECKSUM;
        if self.format.forces_compression() {
            self.pack_flags |= pack_flags::FORCE_COMPRESSION;
        }
        if self.format.is_v2() {
            self.pack_flags |= pack_flags::ADD_ALIGNMENT_PADDING | pack_flags::USE_PATTERN_FILL;
        }

        if media.media_size == 0 {
            // The v2 case data cannot be patched in place afterwards
            if !self.format.allows_streamed_write() || self.format.is_v2() {
                return Err(Error::unsupported(format!(
                    "{} does not allow streamed writing",
                    self.format
                )));
            }
        } else {
            let required_segments = media.media_size / segment_table.maximum_segment_size;
            let maximum = self.segment_file_type.maximum_number_of_segments() as u64;
            if required_segments > maximum {
                return Err(Error::limit_exceeded(format!(
                    "{} bytes need more than {maximum} segment files of {} bytes",
                    media.media_size, segment_table.maximum_segment_size
                )));
            }
        }
        if media.media_size > MEDIA_SIZE_2_TIB && !self.format.allows_large_media() {
            return Err(Error::limit_exceeded(format!(
                "{} does not allow media larger than 2 TiB",
                self.format
            )));
        }
        if self.pack_flags & pack_flags::FORCE_COMPRESSION == 0 {
            // Zero chunks recur constantly; compress one up front
            let level = if self.compression_level == CompressionLevel::None {
                CompressionLevel::Best
            } else {
                self.compression_level
            };
            let zero_chunk = vec![0u8; media.chunk_size as usize];
            self.compressed_zero_block =
                Some(compress(self.compression_method, level, &zero_chunk)?);
        }
        self.values_initialized = true;
        Ok(())
    }

    /// Size of a terminator section
    fn terminator_size(&self) -> u64 {
        if self.format.is_v2() {
            SectionDescriptorV2::SIZE as u64
        } else {
            SectionDescriptorV1::SIZE as u64
        }
    }

    /// Exact cost of closing a chunks section holding `entries` chunks
    fn table_cost(&self, entries: usize) -> u64 {
        let v1_table =
            SectionDescriptorV1::SIZE as u64 + TableHeader::SIZE as u64 + 4 * entries as u64 + 4;
        if self.format.is_v2() {
            // sector_data descriptor plus the sector_table section
            SectionDescriptorV2::SIZE as u64
                + TableHeader::SIZE as u64
                + TableEntryV2::SIZE as u64 * entries as u64
                + 4
                + SectionDescriptorV2::SIZE as u64
        } else if self.format.writes_table2() {
            2 * v1_table
        } else {
            v1_table
        }
    }

    /// Whether another chunk of `packed_size` fits in the current segment
    fn chunk_fits(&self, maximum_segment_size: u64, packed_size: u64) -> bool {
        let Some(segment) = self.current.as_ref() else {
            return false;
        };
        let entries = segment
            .chunks_section
            .as_ref()
            .map(|section| section.entries.len())
            .unwrap_or(0);
        let projected = segment.offset
            + packed_size
            + self.table_cost(entries + 1)
            + self.terminator_size();
        projected <= maximum_segment_size
    }

    /// Write the next sequential chunk
    pub fn write_chunk(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        chunk_table: &mut ChunkTable,
        segment_table: &mut SegmentTable,
        data: &[u8],
    ) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_argument("writer is finalized"));
        }
        self.initialize_values(media, segment_table)?;

        let chunk_index = self.number_of_chunks_written;
        if media.number_of_chunks > 0 && chunk_index >= media.number_of_chunks {
            return Err(Error::invalid_argument("all chunks are already written"));
        }
        let expected = if media.number_of_chunks > 0 {
            media.chunk_data_size(chunk_index) as usize
        } else {
            data.len()
        };
        if data.len() != expected {
            return Err(Error::invalid_argument(format!(
                "chunk {chunk_index} expects {expected} bytes, got {}",
                data.len()
            )));
        }

        let mut chunk = ChunkData::from_media(data.to_vec());
        chunk.pack(
            media.chunk_size,
            self.compression_method,
            self.compression_level,
            self.pack_flags,
            self.compressed_zero_block.as_deref(),
        )?;
        let packed_size = chunk.packed().len() as u64;

        // Find a segment file with room for the chunk
        loop {
            if self.current.is_none() {
                self.create_segment_file(pool, media, segment_table)?;
            }
            self.ensure_chunks_section(pool)?;
            if self.chunk_fits(segment_table.maximum_segment_size, packed_size) {
                break;
            }
            let holds_chunks = self
                .current
                .as_ref()
                .map(|segment| segment.chunks_in_segment > 0)
                .unwrap_or(false);
            if !holds_chunks {
                // Even an empty segment cannot fit it; take it anyway rather
                // than rotating forever
                break;
            }
            self.close_chunks_section(pool)?;
            self.close_segment_file(pool, segment_table, false)?;
        }

        {
            let segment = self
                .current
                .as_mut()
                .ok_or_else(|| Error::invalid_argument("no current segment"))?;
            let section = segment
                .chunks_section
                .as_mut()
                .ok_or_else(|| Error::invalid_argument("no open chunks section"))?;

            pool.write_at(segment.pool_entry, segment.offset, chunk.packed())?;
            let entry_flags = chunk.range_flags() & !range_flags::IS_PACKED;
            section.entries.push(PendingEntry {
                file_offset: segment.offset,
                size: packed_size as u32,
                flags: entry_flags,
            });
            chunk_table.set(
                chunk_index,
                ChunkLocation {
                    pool_entry: segment.pool_entry,
                    file_offset: segment.offset,
                    size: packed_size as u32,
                    range_flags: entry_flags,
                },
            );
            segment.offset += packed_size;
            segment.chunks_in_segment += 1;
        }
        self.number_of_chunks_written += 1;
        self.input_write_count += data.len() as u64;
        self.md5.update(data);
        self.sha1.update(data);

        // Close the section on the per-section chunk cap
        let section_entries = self
            .current
            .as_ref()
            .and_then(|segment| segment.chunks_section.as_ref())
            .map(|section| section.entries.len() as u32)
            .unwrap_or(0);
        if !self.format.unrestricted_offset_table()
            && section_entries >= self.format.maximum_chunks_per_section()
        {
            self.close_chunks_section(pool)?;
        }

        // All chunks written: seal the image
        if media.number_of_chunks > 0 && self.number_of_chunks_written == media.number_of_chunks {
            self.close_chunks_section(pool)?;
            self.close_segment_file(pool, segment_table, true)?;
        }
        Ok(())
    }

    fn create_segment_file(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        segment_table: &SegmentTable,
    ) -> Result<()> {
        let segment_number = self.segments_created + 1;
        if segment_number > self.segment_file_type.maximum_number_of_segments() {
            return Err(Error::limit_exceeded(format!(
                "cannot create segment {segment_number}"
            )));
        }
        let path = segment_filename(
            &segment_table.basename,
            self.segment_file_type,
            segment_number,
        )?;
        debug!(segment_number, path = %path.display(), "creating segment file");
        let pool_entry = pool.add(&path, AccessMode::Create);

        let mut segment = CurrentSegment {
            pool_entry,
            segment_number,
            offset: 0,
            previous_descriptor_offset: 0,
            chunks_in_segment: 0,
            chunks_section: None,
        };
        if self.format.is_v2() {
            let file_header = FileHeaderV2 {
                major_version: 2,
                minor_version: 1,
                compression_method: self.compression_method,
                set_identifier: media.set_identifier,
                segment_number,
            };
            pool.write_at(pool_entry, 0, &file_header.to_bytes())?;
            segment.offset = FileHeaderV2::SIZE as u64;
            self.write_v2_start_sections(pool, media, &mut segment)?;
        } else {
            let file_header = FileHeaderV1 {
                segment_file_type: self.segment_file_type,
                segment_number: segment_number as u16,
            };
            pool.write_at(pool_entry, 0, &file_header.to_bytes()?)?;
            segment.offset = FileHeaderV1::SIZE as u64;
            self.write_v1_start_sections(pool, media, &mut segment)?;
        }
        self.segments_created = segment_number;
        self.current = Some(segment);
        Ok(())
    }

    fn write_v1_start_sections(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        segment: &mut CurrentSegment,
    ) -> Result<()> {
        let volume = media.to_volume(self.compression_level.wire_value());
        if segment.segment_number == 1 {
            let header_text =
                ewfkit_format::header_values::generate_header_text(&self.header_values);
            let compressed = compress(
                CompressionMethod::Deflate,
                CompressionLevel::Best,
                header_text.as_bytes(),
            )?;
            segment.offset = write_section_v1(
                pool,
                segment.pool_entry,
                segment.offset,
                SectionType::Header,
                &compressed,
            )?;
            let volume_type = if self.segment_file_type == SegmentFileType::Ewf1Smart {
                SectionType::Disk
            } else {
                SectionType::Volume
            };
            segment.offset = write_section_v1(
                pool,
                segment.pool_entry,
                segment.offset,
                volume_type,
                &volume.to_bytes(),
            )?;
        } else {
            segment.offset = write_section_v1(
                pool,
                segment.pool_entry,
                segment.offset,
                SectionType::Data,
                &volume.to_bytes(),
            )?;
        }
        Ok(())
    }

    fn write_v2_start_sections(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        segment: &mut CurrentSegment,
    ) -> Result<()> {
        if segment.segment_number == 1 {
            let mut information = DeviceInformation {
                number_of_sectors: Some(media.number_of_sectors),
                bytes_per_sector: Some(media.bytes_per_sector),
                media_type: Some(media.media_type),
                media_flags: media.media_flags,
                ..DeviceInformation::default()
            };
            for identifier in [
                ewfkit_format::identifiers::MODEL,
                ewfkit_format::identifiers::SERIAL_NUMBER,
                ewfkit_format::identifiers::DEVICE_LABEL,
            ] {
                if let Some(value) = self.header_values.get(identifier) {
                    information.header_values.set(identifier, value.to_string());
                }
            }
            let payload = compress(
                self.compression_method,
                CompressionLevel::Best,
                &information.generate(),
            )?;
            let (next, descriptor) = write_section_v2(
                pool,
                segment.pool_entry,
                segment.offset,
                segment.previous_descriptor_offset,
                SectionType::DeviceInformation,
                &payload,
                0,
            )?;
            segment.offset = next;
            segment.previous_descriptor_offset = descriptor;
        }

        let case_data = self.build_case_data(media);
        let payload = compress(
            self.compression_method,
            CompressionLevel::Best,
            &case_data.generate(),
        )?;
        let (next, descriptor) = write_section_v2(
            pool,
            segment.pool_entry,
            segment.offset,
            segment.previous_descriptor_offset,
            SectionType::CaseData,
            &payload,
            0,
        )?;
        segment.offset = next;
        segment.previous_descriptor_offset = descriptor;
        Ok(())
    }

    fn build_case_data(&self, media: &MediaValues) -> CaseData {
        CaseData {
            header_values: self.header_values.clone(),
            number_of_chunks: Some(media.number_of_chunks),
            sectors_per_chunk: Some(media.sectors_per_chunk),
            error_granularity: Some(media.error_granularity),
            compression_method: Some(self.compression_method),
            media_flags: media.media_flags,
        }
    }

    fn ensure_chunks_section(&mut self, pool: &FilePool) -> Result<()> {
        let is_v2 = self.format.is_v2();
        let segment = self
            .current
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("no current segment"))?;
        if segment.chunks_section.is_some() {
            return Ok(());
        }
        let descriptor_offset = segment.offset;
        if !is_v2 {
            // Reserve the sectors descriptor slot; patched on close
            let placeholder = [0u8; SectionDescriptorV1::SIZE];
            pool.write_at(segment.pool_entry, descriptor_offset, &placeholder)?;
            segment.offset += SectionDescriptorV1::SIZE as u64;
        }
        segment.chunks_section = Some(ChunksSection {
            descriptor_offset,
            data_start: segment.offset,
            entries: Vec::new(),
        });
        Ok(())
    }

    fn close_chunks_section(&mut self, pool: &FilePool) -> Result<()> {
        let is_v2 = self.format.is_v2();
        let writes_table2 = self.format.writes_table2();
        let Some(segment) = self.current.as_mut() else {
            return Ok(());
        };
        let Some(section) = segment.chunks_section.take() else {
            return Ok(());
        };
        if section.entries.is_empty() {
            // Nothing was written; give the reserved descriptor back
            if !is_v2 {
                segment.offset = section.descriptor_offset;
            }
            return Ok(());
        }
        if is_v2 {
            Self::close_chunks_section_v2(pool, segment, &section)
        } else {
            Self::close_chunks_section_v1(pool, segment, &section, writes_table2)
        }
    }

    fn close_chunks_section_v1(
        pool: &FilePool,
        segment: &mut CurrentSegment,
        section: &ChunksSection,
        writes_table2: bool,
    ) -> Result<()> {
        // Patch the reserved sectors descriptor
        let sectors_size = SectionDescriptorV1::SIZE as u64 + (segment.offset - section.data_start);
        let descriptor = SectionDescriptorV1 {
            section_type: SectionType::Sectors,
            next_offset: segment.offset,
            size: sectors_size,
        };
        pool.write_at(
            segment.pool_entry,
            section.descriptor_offset,
            &descriptor.to_bytes(),
        )?;

        // Offsets must fit the 31-bit entry; larger files shift the base
        let needs_base = section
            .entries
            .iter()
            .any(|entry| entry.file_offset > TableEntryV1::MAXIMUM_OFFSET as u64);
        let base_offset = if needs_base { section.data_start } else { 0 };
        let entries: Vec<TableEntryV1> = section
            .entries
            .iter()
            .map(|entry| TableEntryV1 {
                relative_offset: (entry.file_offset - base_offset) as u32,
                is_compressed: entry.flags & range_flags::IS_COMPRESSED != 0,
            })
            .collect();

        let header = TableHeader {
            number_of_entries: entries.len() as u32,
            base_offset,
        };
        let mut payload = header.to_bytes().to_vec();
        payload.extend_from_slice(&table::serialize_entries_v1(&entries, true));

        segment.offset = write_section_v1(
            pool,
            segment.pool_entry,
            segment.offset,
            SectionType::Table,
            &payload,
        )?;
        if writes_table2 {
            segment.offset = write_section_v1(
                pool,
                segment.pool_entry,
                segment.offset,
                SectionType::Table2,
                &payload,
            )?;
        }
        Ok(())
    }

    fn close_chunks_section_v2(
        pool: &FilePool,
        segment: &mut CurrentSegment,
        section: &ChunksSection,
    ) -> Result<()> {
        // The sector_data descriptor trails its payload
        let data_size = segment.offset - section.data_start;
        let descriptor = SectionDescriptorV2 {
            section_type: SectionType::SectorData,
            previous_offset: segment.previous_descriptor_offset,
            data_size,
            padding_size: 0,
        };
        pool.write_at(segment.pool_entry, segment.offset, &descriptor.to_bytes())?;
        segment.previous_descriptor_offset = segment.offset;
        segment.offset += SectionDescriptorV2::SIZE as u64;

        let entries: Vec<TableEntryV2> = section
            .entries
            .iter()
            .map(|entry| TableEntryV2 {
                offset: entry.file_offset,
                size: entry.size,
                flags: entry.flags & range_flags::ON_DISK_MASK,
            })
            .collect();
        let header = TableHeader {
            number_of_entries: entries.len() as u32,
            base_offset: 0,
        };
        let mut payload = header.to_bytes().to_vec();
        payload.extend_from_slice(&table::serialize_entries_v2(&entries));

        let (next, descriptor_offset) = write_section_v2(
            pool,
            segment.pool_entry,
            segment.offset,
            segment.previous_descriptor_offset,
            SectionType::SectorTable,
            &payload,
            0,
        )?;
        segment.offset = next;
        segment.previous_descriptor_offset = descriptor_offset;
        Ok(())
    }

    fn close_segment_file(
        &mut self,
        pool: &FilePool,
        segment_table: &mut SegmentTable,
        is_last: bool,
    ) -> Result<()> {
        self.close_chunks_section(pool)?;
        let Some(mut segment) = self.current.take() else {
            return Ok(());
        };
        if is_last {
            self.write_trailers(pool, &mut segment)?;
        }
        let terminator = if is_last {
            SectionType::Done
        } else {
            SectionType::Next
        };
        if self.format.is_v2() {
            let (next, descriptor_offset) = write_section_v2(
                pool,
                segment.pool_entry,
                segment.offset,
                segment.previous_descriptor_offset,
                terminator,
                &[],
                0,
            )?;
            segment.offset = next;
            segment.previous_descriptor_offset = descriptor_offset;
        } else {
            segment.offset =
                write_terminator_v1(pool, segment.pool_entry, segment.offset, terminator)?;
        }
        pool.close(segment.pool_entry)?;
        info!(
            segment_number = segment.segment_number,
            size = segment.offset,
            "segment file closed"
        );

        let parsed = SegmentFile::parse(pool, segment.pool_entry, false)?;
        segment_table.push_segment(parsed);
        Ok(())
    }

    fn write_trailers(&mut self, pool: &FilePool, segment: &mut CurrentSegment) -> Result<()> {
        let md5: [u8; 16] = self.md5.clone().finalize().into();
        let sha1: [u8; 20] = self.sha1.clone().finalize().into();

        let mut payloads: Vec<(SectionType, Vec<u8>)> = Vec::new();
        if !self.sessions.is_empty() {
            let session = SessionSection {
                sessions: self.sessions.clone(),
            };
            payloads.push((SectionType::Session, session.to_bytes()));
        }
        if !self.acquisition_errors.is_empty() {
            let errors = Error2Section {
                errors: self.acquisition_errors.clone(),
            };
            payloads.push((SectionType::Error2, errors.to_bytes()));
        }
        payloads.push((SectionType::Digest, DigestSection { md5, sha1 }.to_bytes().to_vec()));
        payloads.push((SectionType::Hash, HashSection { md5 }.to_bytes().to_vec()));

        for (section_type, payload) in payloads {
            if self.format.is_v2() {
                let (next, descriptor_offset) = write_section_v2(
                    pool,
                    segment.pool_entry,
                    segment.offset,
                    segment.previous_descriptor_offset,
                    section_type,
                    &payload,
                    0,
                )?;
                segment.offset = next;
                segment.previous_descriptor_offset = descriptor_offset;
            } else {
                segment.offset = write_section_v1(
                    pool,
                    segment.pool_entry,
                    segment.offset,
                    section_type,
                    &payload,
                )?;
            }
        }
        Ok(())
    }

    /// Close any open section and segment, then backfill corrections
    ///
    /// Idempotent; a second call is a no-op.
    pub fn finalize(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        segment_table: &mut SegmentTable,
    ) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.current.is_some() {
            self.close_segment_file(pool, segment_table, true)?;
        }
        self.write_sections_corrections(pool, media, segment_table)?;
        self.finalized = true;
        Ok(())
    }

    /// Rewrite volume/data sections with the final media values
    fn write_sections_corrections(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        segment_table: &mut SegmentTable,
    ) -> Result<()> {
        if self.format.is_v2() {
            // Case data is written per segment with final values already
            return Ok(());
        }
        let volume = media.to_volume(self.compression_level.wire_value());
        let volume_bytes = volume.to_bytes();
        for segment in segment_table.segments() {
            for record in &segment.sections {
                let rewrite = matches!(
                    record.section_type,
                    SectionType::Volume | SectionType::Disk | SectionType::Data
                );
                if rewrite {
                    let payload_offset = record.start_offset + SectionDescriptorV1::SIZE as u64;
                    pool.reopen(segment.pool_entry, AccessMode::ReadWrite)?;
                    pool.write_at(segment.pool_entry, payload_offset, &volume_bytes)?;
                    pool.close(segment.pool_entry)?;
                }
            }
        }
        Ok(())
    }

    /// Overwrite a committed chunk through a delta segment file
    pub fn write_existing_chunk(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        chunk_table: &mut ChunkTable,
        segment_table: &mut SegmentTable,
        chunk_index: u64,
        data: &[u8],
    ) -> Result<()> {
        if self.format.is_v2() {
            return Err(Error::unsupported(
                "delta chunks are not defined for EWF2 formats",
            ));
        }
        let expected = media.chunk_data_size(chunk_index) as usize;
        if data.len() != expected {
            return Err(Error::invalid_argument(format!(
                "chunk {chunk_index} expects {expected} bytes, got {}",
                data.len()
            )));
        }
        let existing = chunk_table
            .get(chunk_index)
            .ok_or(Error::InvalidChunk(chunk_index))?;

        // Delta chunk data is stored uncompressed with its checksum
        let checksum = ewf_checksum(data);
        let mut chunk_bytes = data.to_vec();
        chunk_bytes.extend_from_slice(&checksum.to_le_bytes());
        let header = DeltaChunkHeader {
            chunk_number: (chunk_index + 1) as u32,
            chunk_data_size: chunk_bytes.len() as u32,
            checksum: ewf_checksum(&chunk_bytes),
        };
        let mut payload = Vec::with_capacity(DeltaChunkHeader::SIZE + chunk_bytes.len());
        payload.extend_from_slice(&header.to_bytes());
        payload.extend_from_slice(&chunk_bytes);

        if existing.range_flags & range_flags::IS_DELTA != 0 {
            // Exact-length in-place overwrite of the existing delta section
            let section_offset = existing
                .file_offset
                .checked_sub((SectionDescriptorV1::SIZE + DeltaChunkHeader::SIZE) as u64)
                .ok_or_else(|| Error::corrupted_section("delta chunk offset underflow"))?;
            pool.reopen(existing.pool_entry, AccessMode::ReadWrite)?;
            write_section_v1(
                pool,
                existing.pool_entry,
                section_offset,
                SectionType::DeltaChunk,
                &payload,
            )?;
            chunk_table.apply_delta(
                chunk_index,
                existing.pool_entry,
                existing.file_offset,
                chunk_bytes.len() as u32,
            );
            return Ok(());
        }

        // Append to the newest delta file, creating one when needed
        let (pool_entry, append_offset) = match segment_table.last_delta_segment() {
            Some(delta) => {
                let done_offset = delta
                    .sections
                    .iter()
                    .rev()
                    .find(|record| record.section_type == SectionType::Done)
                    .map(|record| record.start_offset)
                    .ok_or_else(|| {
                        Error::corrupted_section("delta segment file has no done section")
                    })?;
                pool.reopen(delta.pool_entry, AccessMode::ReadWrite)?;
                (delta.pool_entry, done_offset)
            }
            None => {
                let delta_number = self.delta_segments_created + 1;
                let path = segment_filename(
                    &segment_table.basename,
                    SegmentFileType::Ewf1Delta,
                    delta_number,
                )?;
                info!(path = %path.display(), "creating delta segment file");
                let pool_entry = pool.add(&path, AccessMode::Create);
                let file_header = FileHeaderV1 {
                    segment_file_type: SegmentFileType::Ewf1Delta,
                    segment_number: delta_number as u16,
                };
                pool.write_at(pool_entry, 0, &file_header.to_bytes()?)?;
                self.delta_segments_created = delta_number;
                (pool_entry, FileHeaderV1::SIZE as u64)
            }
        };

        let data_offset =
            append_offset + (SectionDescriptorV1::SIZE + DeltaChunkHeader::SIZE) as u64;
        let end = write_section_v1(
            pool,
            pool_entry,
            append_offset,
            SectionType::DeltaChunk,
            &payload,
        )?;
        write_terminator_v1(pool, pool_entry, end, SectionType::Done)?;
        pool.close(pool_entry)?;

        chunk_table.apply_delta(chunk_index, pool_entry, data_offset, chunk_bytes.len() as u32);

        let parsed = SegmentFile::parse(pool, pool_entry, false)?;
        segment_table.replace_or_push_delta(parsed);
        Ok(())
    }

    /// Rebuild writer state from a truncated image
    ///
    /// The chunk table must already hold every chunk recoverable from
    /// durable tables. Returns the number of committed chunks; the caller
    /// re-reads them to warm the media hashes via [`Self::rehash`].
    pub fn initialize_resume(
        &mut self,
        pool: &FilePool,
        media: &MediaValues,
        chunk_table: &mut ChunkTable,
        segment_table: &mut SegmentTable,
    ) -> Result<u64> {
        if self.format.is_v2() {
            return Err(Error::unsupported("resume of EWF2 images"));
        }
        if segment_table.is_complete() {
            return Err(Error::invalid_argument("image is already complete"));
        }
        if segment_table.number_of_delta_segments() > 0 {
            return Err(Error::unsupported("resume over delta segment files"));
        }
        self.initialize_values(media, segment_table)?;

        let committed = chunk_table.first_unmapped();
        chunk_table.truncate_from(committed);
        self.number_of_chunks_written = committed;
        self.input_write_count = if committed >= media.number_of_chunks {
            media.media_size
        } else {
            committed * media.chunk_size as u64
        };
        self.segments_created = segment_table.number_of_segments();

        let Some(last) = segment_table.last_segment() else {
            // Nothing durable yet; restart from scratch
            return Ok(0);
        };
        let ended_with_next = last
            .sections
            .last()
            .map(|record| record.section_type == SectionType::Next)
            .unwrap_or(false);
        if ended_with_next {
            // The crash hit after a clean rotation; continue in a new file
            info!(committed, "resuming after a completed segment");
            return Ok(committed);
        }

        // Resume within the truncated segment, just past its last durable
        // table group
        let durable_table_type = if self.format.writes_table2() {
            SectionType::Table2
        } else {
            SectionType::Table
        };
        let resume_offset = last
            .sections
            .iter()
            .rev()
            .find(|record| record.section_type == durable_table_type)
            .map(|record| record.end_offset);
        let chunks_in_segment: u64 = last
            .content
            .table_groups
            .iter()
            .filter(|group| {
                !self.format.writes_table2() || group.table2_entries.is_some()
            })
            .map(|group| group.entries.len() as u64)
            .sum();

        match resume_offset {
            Some(resume_offset) => {
                let pool_entry = last.pool_entry;
                let segment_number = last.segment_number;
                pool.reopen(pool_entry, AccessMode::ReadWrite)?;
                segment_table.pop_segment();
                info!(
                    committed,
                    segment_number, resume_offset, "resuming inside a truncated segment"
                );
                self.segments_created = segment_number;
                self.current = Some(CurrentSegment {
                    pool_entry,
                    segment_number,
                    offset: resume_offset,
                    previous_descriptor_offset: 0,
                    chunks_in_segment,
                    chunks_section: None,
                });
            }
            None => {
                // No durable table in the last file; recreate it entirely
                info!(
                    committed,
                    segment_number = last.segment_number,
                    "discarding a segment with no durable table"
                );
                self.segments_created = last.segment_number - 1;
                segment_table.pop_segment();
            }
        }
        Ok(committed)
    }

    /// Re-feed the media hashes with committed data during resume
    pub fn rehash(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
    }
}
