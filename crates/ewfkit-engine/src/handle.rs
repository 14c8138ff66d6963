//! Thread-safe handle façade
//!
//! The handle owns the pool, segment table, chunk table, media values and
//! both IO engines, and exposes the byte-oriented surface embedders use:
//! open or create an image, read and write at offsets, query media values
//! and trailers, abort long operations.
//!
//! Read operations take the state read lock; everything mutating takes the
//! write lock. The chunk cache and checksum-error list synchronize
//! internally so concurrent readers never serialize on the handle lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use uuid::Uuid;

use ewfkit_core::{
    range_flags, CompressionLevel, CompressionMethod, Error, Format, MediaType, Result,
};
use ewfkit_format::{HeaderValues, MediaValues, SectorRange};
use ewfkit_pool::{AccessMode, FilePool};

use crate::cache::ChunkCache;
use crate::chunk_table::ChunkTable;
use crate::filename::basename_of;
use crate::read::ReadEngine;
use crate::segment_table::{SegmentTable, DEFAULT_MAXIMUM_SEGMENT_SIZE};
use crate::write::WriteEngine;

/// How an existing image is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only
    Read,
    /// Read plus delta overwrites of existing chunks
    ReadWrite,
}

/// Parameters for creating or resuming an image
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub format: Format,
    pub compression_method: CompressionMethod,
    pub compression_level: CompressionLevel,
    pub media_size: u64,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub media_type: MediaType,
    pub maximum_segment_size: u64,
    pub header_values: HeaderValues,
    /// Generated when absent
    pub set_identifier: Option<[u8; 16]>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            format: Format::Encase6,
            compression_method: CompressionMethod::Deflate,
            compression_level: CompressionLevel::Fast,
            media_size: 0,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            media_type: MediaType::Fixed,
            maximum_segment_size: DEFAULT_MAXIMUM_SEGMENT_SIZE,
            header_values: HeaderValues::new(),
            set_identifier: None,
        }
    }
}

struct HandleState {
    pool: FilePool,
    media: MediaValues,
    chunk_table: ChunkTable,
    segment_table: SegmentTable,
    read_engine: ReadEngine,
    write_engine: Option<WriteEngine>,
    compression_method: CompressionMethod,
    md5_hash: Option<String>,
    sha1_hash: Option<String>,
    header_values: HeaderValues,
    sessions: Vec<SectorRange>,
    acquisition_errors: Vec<SectorRange>,
}

/// An open EWF image
pub struct Handle {
    state: RwLock<HandleState>,
    cache: ChunkCache,
    abort: AtomicBool,
    position: Mutex<u64>,
}

impl Handle {
    /// Open an existing image from its segment file paths
    pub fn open(paths: &[PathBuf], mode: OpenMode) -> Result<Handle> {
        if paths.is_empty() {
            return Err(Error::invalid_argument("no segment files given"));
        }
        let pool = FilePool::new();
        for path in paths {
            pool.add(path, AccessMode::Read);
        }
        let basename = basename_of(&paths[0]);
        let segment_table =
            SegmentTable::build_from_pool(basename, DEFAULT_MAXIMUM_SEGMENT_SIZE, &pool, false)?;
        if !segment_table.is_complete() {
            return Err(Error::corrupted_section(
                "image is incomplete; open it for resume instead",
            ));
        }
        Self::assemble(pool, segment_table, mode, None)
    }

    /// Open an existing image from caller-supplied stream objects
    ///
    /// Object-backed images support reading only; delta overwrites need
    /// path-backed segment files.
    pub fn open_file_objects(
        objects: Vec<Box<dyn ewfkit_core::ReadWriteSeek>>,
    ) -> Result<Handle> {
        if objects.is_empty() {
            return Err(Error::invalid_argument("no file objects given"));
        }
        let pool = FilePool::new();
        for object in objects {
            pool.add_object(object, AccessMode::Read);
        }
        let segment_table = SegmentTable::build_from_pool(
            PathBuf::new(),
            DEFAULT_MAXIMUM_SEGMENT_SIZE,
            &pool,
            false,
        )?;
        if !segment_table.is_complete() {
            return Err(Error::corrupted_section(
                "image is incomplete; open it for resume instead",
            ));
        }
        Self::assemble(pool, segment_table, OpenMode::Read, None)
    }

    /// Resume writing a truncated image
    ///
    /// `options` must repeat the parameters of the interrupted session;
    /// segment rotation is recomputed from them.
    pub fn open_resume(paths: &[PathBuf], options: WriteOptions) -> Result<Handle> {
        if paths.is_empty() {
            return Err(Error::invalid_argument("no segment files given"));
        }
        let pool = FilePool::new();
        for path in paths {
            pool.add(path, AccessMode::Read);
        }
        let basename = basename_of(&paths[0]);
        let segment_table =
            SegmentTable::build_from_pool(basename, options.maximum_segment_size, &pool, true)?;
        Self::assemble(pool, segment_table, OpenMode::ReadWrite, Some(options))
    }

    /// Create a new image for writing
    pub fn create(basename: impl AsRef<Path>, options: WriteOptions) -> Result<Handle> {
        let set_identifier = options
            .set_identifier
            .unwrap_or_else(|| *Uuid::new_v4().as_bytes());
        let media = MediaValues::new(
            options.media_size,
            options.sectors_per_chunk,
            options.bytes_per_sector,
            options.media_type,
            set_identifier,
        )?;
        let write_engine = WriteEngine::new(
            options.format,
            options.compression_method,
            options.compression_level,
            options.header_values.clone(),
        )?;
        let state = HandleState {
            pool: FilePool::new(),
            media,
            chunk_table: ChunkTable::new(0),
            segment_table: SegmentTable::new(
                basename.as_ref().to_path_buf(),
                options.maximum_segment_size,
            ),
            read_engine: ReadEngine::new(true),
            write_engine: Some(write_engine),
            compression_method: options.compression_method,
            md5_hash: None,
            sha1_hash: None,
            header_values: options.header_values,
            sessions: Vec::new(),
            acquisition_errors: Vec::new(),
        };
        Ok(Handle {
            state: RwLock::new(state),
            cache: ChunkCache::new(ChunkCache::DEFAULT_CAPACITY),
            abort: AtomicBool::new(false),
            position: Mutex::new(0),
        })
    }

    /// Shared tail of open and resume
    fn assemble(
        pool: FilePool,
        segment_table: SegmentTable,
        mode: OpenMode,
        resume: Option<WriteOptions>,
    ) -> Result<Handle> {
        let media = derive_media_values(&segment_table)?;
        verify_segment_consistency(&segment_table, &media)?;

        let mut chunk_table = ChunkTable::new(media.number_of_chunks);
        populate_chunk_table(&segment_table, &mut chunk_table, resume.is_some())?;

        let compression_method = segment_table
            .segments()
            .next()
            .map(|segment| segment.compression_method)
            .unwrap_or(CompressionMethod::Deflate);

        let mut header_values = HeaderValues::new();
        let mut md5_hash = None;
        let mut sha1_hash = None;
        let mut sessions = Vec::new();
        let mut acquisition_errors = Vec::new();
        for segment in segment_table.segments() {
            let content = &segment.content;
            if let Some(values) = &content.header_values {
                header_values = values.clone();
            }
            if let Some(case_data) = &content.case_data {
                header_values = case_data.header_values.clone();
            }
            if let Some(hash) = &content.hash {
                md5_hash = Some(hash.md5_hex());
            }
            if let Some(digest) = &content.digest {
                md5_hash = Some(hex::encode(digest.md5));
                sha1_hash = Some(digest.sha1_hex());
            }
            if let Some(session) = &content.sessions {
                sessions = session.sessions.clone();
            }
            if let Some(errors) = &content.acquisition_errors {
                acquisition_errors = errors.errors.clone();
            }
        }

        let write_engine = match (&resume, mode) {
            (Some(options), _) => Some(WriteEngine::new(
                options.format,
                options.compression_method,
                options.compression_level,
                options.header_values.clone(),
            )?),
            (None, OpenMode::ReadWrite) => {
                // Delta overwrites only; the format just selects v1 behavior
                let format = if segment_table
                    .segments()
                    .next()
                    .map(|segment| segment.segment_file_type.is_v2())
                    .unwrap_or(false)
                {
                    Format::V2Encase7
                } else {
                    Format::Encase6
                };
                Some(WriteEngine::new(
                    format,
                    compression_method,
                    CompressionLevel::Fast,
                    header_values.clone(),
                )?)
            }
            (None, OpenMode::Read) => None,
        };

        let mut state = HandleState {
            pool,
            media,
            chunk_table,
            segment_table,
            read_engine: ReadEngine::new(true),
            write_engine,
            compression_method,
            md5_hash,
            sha1_hash,
            header_values,
            sessions,
            acquisition_errors,
        };

        let mut position = 0u64;
        if resume.is_some() {
            let committed = {
                let HandleState {
                    pool,
                    media,
                    chunk_table,
                    segment_table,
                    write_engine,
                    ..
                } = &mut state;
                let engine = write_engine
                    .as_mut()
                    .ok_or_else(|| Error::invalid_argument("resume without write engine"))?;
                engine.initialize_resume(pool, media, chunk_table, segment_table)?
            };
            // Committed data feeds the media hashes again
            let rehash_cache = ChunkCache::new(2);
            let strict_reader = ReadEngine::new(false);
            for chunk_index in 0..committed {
                let data = strict_reader.read_chunk(
                    &state.pool,
                    &state.media,
                    &state.chunk_table,
                    &rehash_cache,
                    state.compression_method,
                    chunk_index,
                )?;
                if let Some(engine) = state.write_engine.as_mut() {
                    engine.rehash(&data);
                }
            }
            position = (committed * state.media.chunk_size as u64).min(state.media.media_size);
        }

        Ok(Handle {
            state: RwLock::new(state),
            cache: ChunkCache::new(ChunkCache::DEFAULT_CAPACITY),
            abort: AtomicBool::new(false),
            position: Mutex::new(position),
        })
    }

    /// Read at an absolute media offset
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.read().expect("handle state lock");
        state.read_engine.read_buffer(
            &state.pool,
            &state.media,
            &state.chunk_table,
            &self.cache,
            state.compression_method,
            offset,
            buf,
            &self.abort,
        )
    }

    /// Read at the current position, advancing it
    pub fn read_buffer(&self, buf: &mut [u8]) -> Result<usize> {
        let mut position = self.position.lock().expect("handle position lock");
        let read = self.read_at(*position, buf)?;
        *position += read as u64;
        Ok(read)
    }

    /// Write at an absolute media offset
    ///
    /// The offset must be chunk aligned and the buffer must cover whole
    /// chunks (the final chunk of the media may be short). New data must
    /// append sequentially; chunks already on disk are overwritten through
    /// delta segment files.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.write().expect("handle state lock");
        let chunk_size = state.media.chunk_size as u64;
        if offset % chunk_size != 0 {
            return Err(Error::invalid_argument(format!(
                "write offset {offset} is not chunk aligned"
            )));
        }
        let mut written = 0usize;
        let mut chunk_index = offset / chunk_size;
        while written < buf.len() {
            if self.abort.load(Ordering::Relaxed) {
                break;
            }
            let expected = expected_chunk_size(&state.media, chunk_index, buf.len() - written);
            let piece = &buf[written..written + expected];

            let HandleState {
                pool,
                media,
                chunk_table,
                segment_table,
                write_engine,
                ..
            } = &mut *state;
            let engine = write_engine
                .as_mut()
                .ok_or_else(|| Error::invalid_argument("handle is not open for writing"))?;

            if chunk_table.get(chunk_index).is_some() {
                engine.write_existing_chunk(
                    pool,
                    media,
                    chunk_table,
                    segment_table,
                    chunk_index,
                    piece,
                )?;
                self.cache.invalidate(chunk_index);
            } else if chunk_index == engine.number_of_chunks_written() {
                engine.write_chunk(pool, media, chunk_table, segment_table, piece)?;
            } else {
                return Err(Error::invalid_argument(format!(
                    "chunk {chunk_index} is neither committed nor next in sequence"
                )));
            }
            written += expected;
            chunk_index += 1;
        }
        Ok(written)
    }

    /// Write at the current position, advancing it
    pub fn write_buffer(&self, buf: &[u8]) -> Result<usize> {
        let mut position = self.position.lock().expect("handle position lock");
        let written = self.write_at(*position, buf)?;
        *position += written as u64;
        Ok(written)
    }

    /// Read one chunk in its packed on-disk form, without unpacking
    pub fn read_data_chunk(&self, chunk_index: u64) -> Result<crate::chunk::ChunkData> {
        let state = self.state.read().expect("handle state lock");
        if chunk_index >= state.media.number_of_chunks {
            return Err(Error::InvalidChunk(chunk_index));
        }
        let location = state
            .chunk_table
            .get(chunk_index)
            .ok_or(Error::InvalidChunk(chunk_index))?;
        let mut packed = vec![0u8; location.size as usize];
        state
            .pool
            .read_at(location.pool_entry, location.file_offset, &mut packed)?;
        Ok(crate::chunk::ChunkData::from_packed(
            packed,
            location.range_flags,
        ))
    }

    /// Move the stream position
    pub fn seek(&self, pos: std::io::SeekFrom) -> Result<u64> {
        let media_size = self.media_size();
        let mut position = self.position.lock().expect("handle position lock");
        let target = match pos {
            std::io::SeekFrom::Start(offset) => Some(offset),
            std::io::SeekFrom::End(offset) => media_size.checked_add_signed(offset),
            std::io::SeekFrom::Current(offset) => position.checked_add_signed(offset),
        };
        let target =
            target.ok_or_else(|| Error::invalid_argument("seek before start of media"))?;
        *position = target;
        Ok(*position)
    }

    /// Current stream position
    pub fn position(&self) -> u64 {
        *self.position.lock().expect("handle position lock")
    }

    /// Close any open segment and backfill final sections
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.state.write().expect("handle state lock");
        let HandleState {
            pool,
            media,
            segment_table,
            write_engine,
            md5_hash,
            ..
        } = &mut *state;
        let Some(engine) = write_engine.as_mut() else {
            return Ok(());
        };
        // Streamed writes learn the media size at the end
        if media.media_size == 0 && engine.input_write_count() > 0 {
            *media = MediaValues::new(
                engine.input_write_count(),
                media.sectors_per_chunk,
                media.bytes_per_sector,
                media.media_type,
                media.set_identifier,
            )?;
        }
        engine.finalize(pool, media, segment_table)?;
        if md5_hash.is_none() {
            if let Some(last) = segment_table.last_segment() {
                if let Some(hash) = &last.content.hash {
                    *md5_hash = Some(hash.md5_hex());
                }
            }
        }
        Ok(())
    }

    /// Raise the abort flag checked between chunks
    pub fn signal_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    // Media values

    pub fn media_size(&self) -> u64 {
        self.state.read().expect("handle state lock").media.media_size
    }

    pub fn chunk_size(&self) -> u32 {
        self.state.read().expect("handle state lock").media.chunk_size
    }

    pub fn number_of_chunks(&self) -> u64 {
        self.state
            .read()
            .expect("handle state lock")
            .media
            .number_of_chunks
    }

    pub fn sectors_per_chunk(&self) -> u32 {
        self.state
            .read()
            .expect("handle state lock")
            .media
            .sectors_per_chunk
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.state
            .read()
            .expect("handle state lock")
            .media
            .bytes_per_sector
    }

    pub fn media_type(&self) -> MediaType {
        self.state.read().expect("handle state lock").media.media_type
    }

    pub fn set_identifier(&self) -> [u8; 16] {
        self.state
            .read()
            .expect("handle state lock")
            .media
            .set_identifier
    }

    pub fn number_of_segments(&self) -> u32 {
        self.state
            .read()
            .expect("handle state lock")
            .segment_table
            .number_of_segments()
    }

    // Verification results

    pub fn number_of_checksum_errors(&self) -> usize {
        self.state
            .read()
            .expect("handle state lock")
            .read_engine
            .number_of_checksum_errors()
    }

    pub fn checksum_errors(&self) -> Vec<SectorRange> {
        self.state
            .read()
            .expect("handle state lock")
            .read_engine
            .checksum_errors()
    }

    pub fn md5_hash(&self) -> Option<String> {
        self.state.read().expect("handle state lock").md5_hash.clone()
    }

    pub fn sha1_hash(&self) -> Option<String> {
        self.state.read().expect("handle state lock").sha1_hash.clone()
    }

    // Sessions and acquisition errors

    pub fn number_of_sessions(&self) -> usize {
        self.state.read().expect("handle state lock").sessions.len()
    }

    pub fn session(&self, index: usize) -> Option<SectorRange> {
        self.state
            .read()
            .expect("handle state lock")
            .sessions
            .get(index)
            .copied()
    }

    /// Record an optical session to be written with the trailers
    pub fn add_session(&self, first_sector: u64, number_of_sectors: u64) -> Result<()> {
        let mut state = self.state.write().expect("handle state lock");
        let range = SectorRange {
            first_sector,
            number_of_sectors,
        };
        let engine = state
            .write_engine
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("handle is not open for writing"))?;
        engine.add_session(range);
        state.sessions.push(range);
        Ok(())
    }

    /// Record an acquisition read error to be written with the trailers
    pub fn add_acquisition_error(&self, first_sector: u64, number_of_sectors: u64) -> Result<()> {
        let mut state = self.state.write().expect("handle state lock");
        let range = SectorRange {
            first_sector,
            number_of_sectors,
        };
        let engine = state
            .write_engine
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("handle is not open for writing"))?;
        engine.add_acquisition_error(range);
        state.acquisition_errors.push(range);
        Ok(())
    }

    pub fn number_of_acquisition_errors(&self) -> usize {
        self.state
            .read()
            .expect("handle state lock")
            .acquisition_errors
            .len()
    }

    pub fn acquisition_error(&self, index: usize) -> Option<SectorRange> {
        self.state
            .read()
            .expect("handle state lock")
            .acquisition_errors
            .get(index)
            .copied()
    }

    // Header values

    pub fn header_value(&self, identifier: &str) -> Option<String> {
        self.state
            .read()
            .expect("handle state lock")
            .header_values
            .get(identifier)
            .map(str::to_string)
    }

    /// Set a header value; only before the first chunk is written
    pub fn set_header_value(&self, identifier: &str, value: &str) -> Result<()> {
        let mut state = self.state.write().expect("handle state lock");
        let writing_started = state
            .write_engine
            .as_ref()
            .map(|engine| engine.number_of_chunks_written() > 0)
            .unwrap_or(true);
        if writing_started {
            return Err(Error::invalid_argument(
                "header values are fixed once writing starts",
            ));
        }
        state.header_values.set(identifier, value.to_string());
        // The engine keeps its own copy for the header sections
        let header_values = state.header_values.clone();
        if let Some(engine) = state.write_engine.as_mut() {
            engine.set_header_values(header_values)?;
        }
        Ok(())
    }
}

fn expected_chunk_size(media: &MediaValues, chunk_index: u64, remaining: usize) -> usize {
    if media.number_of_chunks > 0 {
        media.chunk_data_size(chunk_index) as usize
    } else {
        remaining.min(media.chunk_size as usize)
    }
}

/// Derive media values from the first segment's metadata sections
fn derive_media_values(segment_table: &SegmentTable) -> Result<MediaValues> {
    let first = segment_table
        .segments()
        .next()
        .ok_or_else(|| Error::corrupted_section("image has no segment files"))?;

    if let Some(volume) = &first.content.volume {
        return MediaValues::from_volume(volume);
    }
    // EWF2 images carry geometry in case data and device information
    let case_data = first
        .content
        .case_data
        .as_ref()
        .ok_or_else(|| Error::corrupted_section("segment has neither volume nor case data"))?;
    let device = first.content.device_information.as_ref();

    let sectors_per_chunk = case_data
        .sectors_per_chunk
        .ok_or_else(|| Error::corrupted_section("case data misses sectors per chunk"))?;
    let bytes_per_sector = device
        .and_then(|information| information.bytes_per_sector)
        .unwrap_or(512);
    let number_of_sectors = device
        .and_then(|information| information.number_of_sectors)
        .ok_or_else(|| Error::corrupted_section("device information misses sector count"))?;
    let media_type = device
        .and_then(|information| information.media_type)
        .unwrap_or(MediaType::Fixed);
    let set_identifier = first.set_identifier.unwrap_or_default();

    let mut media = MediaValues::new(
        number_of_sectors * bytes_per_sector as u64,
        sectors_per_chunk,
        bytes_per_sector,
        media_type,
        set_identifier,
    )?;
    if let Some(granularity) = case_data.error_granularity {
        media.error_granularity = granularity;
    }
    media.media_flags = case_data.media_flags
        | device.map(|information| information.media_flags).unwrap_or(0);
    if let Some(number_of_chunks) = case_data.number_of_chunks {
        if number_of_chunks != media.number_of_chunks {
            return Err(Error::field_mismatch(format!(
                "case data claims {number_of_chunks} chunks, geometry implies {}",
                media.number_of_chunks
            )));
        }
    }
    Ok(media)
}

/// Every segment must agree on the fixed media fields
fn verify_segment_consistency(segment_table: &SegmentTable, media: &MediaValues) -> Result<()> {
    for segment in segment_table.segments() {
        for volume in [&segment.content.volume, &segment.content.data_volume]
            .into_iter()
            .flatten()
        {
            let sibling = MediaValues::from_volume(volume)?;
            media.verify_consistency(&sibling)?;
        }
        if let Some(identifier) = segment.set_identifier {
            if identifier != media.set_identifier {
                return Err(Error::field_mismatch("set identifier differs"));
            }
        }
    }
    Ok(())
}

/// Walk every segment's table groups and fill the chunk table
///
/// In resume mode, trailing groups of the last segment that lack their
/// redundant `table2` are not durable and are skipped.
fn populate_chunk_table(
    segment_table: &SegmentTable,
    chunk_table: &mut ChunkTable,
    resume: bool,
) -> Result<()> {
    let number_of_segments = segment_table.number_of_segments() as usize;
    let image_writes_table2 = segment_table.segments().any(|segment| {
        segment
            .content
            .table_groups
            .iter()
            .any(|group| group.table2_entries.is_some())
    });

    let mut cursor = 0u64;
    for (index, segment) in segment_table.segments().enumerate() {
        let is_last = index + 1 == number_of_segments;
        for group in &segment.content.table_groups {
            if resume && is_last && image_writes_table2 && group.table2_entries.is_none() {
                break;
            }
            chunk_table.populate_v1(
                cursor,
                segment.pool_entry,
                group.base_offset,
                &group.entries,
                group.table2_entries.as_deref(),
                group.sectors_end,
            )?;
            cursor += group.entries.len() as u64;
        }
        for group in &segment.content.sector_tables {
            chunk_table.populate_v2(cursor, segment.pool_entry, &group.entries);
            cursor += group.entries.len() as u64;
        }
    }

    for delta in segment_table.delta_segments() {
        for record in &delta.content.delta_chunks {
            chunk_table.apply_delta(
                record.chunk_index,
                delta.pool_entry,
                record.data_offset,
                record.data_size,
            );
            // The base location is shadowed but the data stays tainted
            if let Some(location) = chunk_table.get(record.chunk_index) {
                debug_assert!(location.range_flags & range_flags::IS_DELTA != 0);
            }
        }
    }
    Ok(())
}
