//! Read IO engine
//!
//! Resolves chunk indices through the chunk table, unpacks chunk data with
//! verification, and assembles arbitrary byte ranges. Verification failures
//! are recorded as sector ranges; under the zero-on-error policy the read
//! still succeeds with zeroed data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ewfkit_core::{CompressionMethod, Error, Result};
use ewfkit_format::{MediaValues, SectorRange};
use ewfkit_pool::FilePool;
use tracing::warn;

use crate::cache::ChunkCache;
use crate::chunk::ChunkData;
use crate::chunk_table::ChunkTable;

/// Chunk-level reader with checksum-error accounting
pub struct ReadEngine {
    /// Return zeroed data for unreadable chunks instead of failing
    pub zero_on_error: bool,
    checksum_errors: Mutex<Vec<SectorRange>>,
}

impl ReadEngine {
    pub fn new(zero_on_error: bool) -> Self {
        Self {
            zero_on_error,
            checksum_errors: Mutex::new(Vec::new()),
        }
    }

    /// Sector ranges that failed verification so far
    pub fn checksum_errors(&self) -> Vec<SectorRange> {
        self.checksum_errors
            .lock()
            .expect("checksum errors lock")
            .clone()
    }

    pub fn number_of_checksum_errors(&self) -> usize {
        self.checksum_errors
            .lock()
            .expect("checksum errors lock")
            .len()
    }

    fn record_checksum_error(&self, media: &MediaValues, chunk_index: u64) {
        let start_sector = chunk_index * media.sectors_per_chunk as u64;
        let mut number_of_sectors = media.sectors_per_chunk as u64;
        if start_sector + number_of_sectors > media.number_of_sectors {
            number_of_sectors = media.number_of_sectors.saturating_sub(start_sector);
        }
        let mut errors = self.checksum_errors.lock().expect("checksum errors lock");
        let range = SectorRange {
            first_sector: start_sector,
            number_of_sectors,
        };
        if !errors.contains(&range) {
            errors.push(range);
        }
    }

    /// Read and unpack one chunk
    pub fn read_chunk(
        &self,
        pool: &FilePool,
        media: &MediaValues,
        chunk_table: &ChunkTable,
        cache: &ChunkCache,
        method: CompressionMethod,
        chunk_index: u64,
    ) -> Result<Arc<Vec<u8>>> {
        if chunk_index >= media.number_of_chunks {
            return Err(Error::InvalidChunk(chunk_index));
        }
        if let Some(cached) = cache.get(chunk_index) {
            return Ok(cached);
        }
        let data_size = media.chunk_data_size(chunk_index) as usize;

        let Some(location) = chunk_table.get(chunk_index) else {
            warn!(chunk_index, "chunk has no mapped location");
            self.record_checksum_error(media, chunk_index);
            if !self.zero_on_error {
                return Err(Error::InvalidChunk(chunk_index));
            }
            let zeroed = Arc::new(vec![0u8; data_size]);
            cache.put(chunk_index, zeroed.clone());
            return Ok(zeroed);
        };

        let mut packed = vec![0u8; location.size as usize];
        pool.read_at(location.pool_entry, location.file_offset, &mut packed)?;

        let mut chunk = ChunkData::from_packed(packed, location.range_flags);
        chunk.unpack(data_size, method)?;

        if chunk.is_corrupted() {
            warn!(chunk_index, "chunk failed verification");
            self.record_checksum_error(media, chunk_index);
            if !self.zero_on_error {
                return Err(Error::checksum_mismatch(format!("chunk {chunk_index}")));
            }
        }
        let data = Arc::new(chunk.data().to_vec());
        cache.put(chunk_index, data.clone());
        Ok(data)
    }

    /// Read a byte range spanning chunks
    ///
    /// Checks `abort` between chunks and returns the bytes produced so far
    /// when it is raised. Reads past the media end are truncated.
    #[allow(clippy::too_many_arguments)]
    pub fn read_buffer(
        &self,
        pool: &FilePool,
        media: &MediaValues,
        chunk_table: &ChunkTable,
        cache: &ChunkCache,
        method: CompressionMethod,
        offset: u64,
        buf: &mut [u8],
        abort: &AtomicBool,
    ) -> Result<usize> {
        if offset >= media.media_size {
            return Ok(0);
        }
        let available = (media.media_size - offset).min(buf.len() as u64) as usize;
        let mut produced = 0usize;

        while produced < available {
            if abort.load(Ordering::Relaxed) {
                break;
            }
            let media_offset = offset + produced as u64;
            let chunk_index = media.chunk_index_for_offset(media_offset);
            let within_chunk = (media_offset % media.chunk_size as u64) as usize;

            let data = self.read_chunk(pool, media, chunk_table, cache, method, chunk_index)?;
            let take = (data.len() - within_chunk).min(available - produced);
            buf[produced..produced + take]
                .copy_from_slice(&data[within_chunk..within_chunk + take]);
            produced += take;
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{pack_flags, ChunkData};
    use crate::chunk_table::ChunkLocation;
    use ewfkit_core::{range_flags, CompressionLevel, MediaType};
    use ewfkit_pool::AccessMode;
    use tempfile::TempDir;

    const CHUNK: usize = 32768;

    /// Lay three packed chunks into a bare file and map them
    fn fixture(dir: &TempDir, patterns: [u8; 3]) -> (FilePool, usize, MediaValues, ChunkTable) {
        let pool = FilePool::new();
        let entry = pool.add(dir.path().join("chunks.bin"), AccessMode::Create);
        let media =
            MediaValues::new((CHUNK * 3) as u64, 64, 512, MediaType::Fixed, [0u8; 16]).unwrap();
        let mut table = ChunkTable::new(3);

        let mut offset = 0u64;
        for (index, &pattern) in patterns.iter().enumerate() {
            let mut chunk = ChunkData::from_media(vec![pattern; CHUNK]);
            chunk
                .pack(
                    CHUNK as u32,
                    CompressionMethod::Deflate,
                    CompressionLevel::Fast,
                    pack_flags::CALCULATE_CHECKSUM,
                    None,
                )
                .unwrap();
            pool.write_at(entry, offset, chunk.packed()).unwrap();
            table.set(
                index as u64,
                ChunkLocation {
                    pool_entry: entry,
                    file_offset: offset,
                    size: chunk.packed().len() as u32,
                    range_flags: chunk.range_flags() & !range_flags::IS_PACKED,
                },
            );
            offset += chunk.packed().len() as u64;
        }
        (pool, entry, media, table)
    }

    #[test]
    fn test_read_chunk() {
        let dir = TempDir::new().unwrap();
        let (pool, _, media, table) = fixture(&dir, [0x00, 0xaa, 0x55]);
        let engine = ReadEngine::new(true);
        let cache = ChunkCache::new(8);

        let data = engine
            .read_chunk(&pool, &media, &table, &cache, CompressionMethod::Deflate, 1)
            .unwrap();
        assert_eq!(data.as_slice(), &vec![0xaau8; CHUNK][..]);
        assert_eq!(engine.number_of_checksum_errors(), 0);
        // Second read is served from the cache
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn test_read_buffer_across_chunks() {
        let dir = TempDir::new().unwrap();
        let (pool, _, media, table) = fixture(&dir, [0x01, 0x02, 0x03]);
        let engine = ReadEngine::new(true);
        let cache = ChunkCache::new(8);
        let abort = AtomicBool::new(false);

        let mut buf = vec![0u8; CHUNK];
        let read = engine
            .read_buffer(
                &pool,
                &media,
                &table,
                &cache,
                CompressionMethod::Deflate,
                (CHUNK / 2) as u64,
                &mut buf,
                &abort,
            )
            .unwrap();
        assert_eq!(read, CHUNK);
        assert_eq!(&buf[..CHUNK / 2], &vec![0x01u8; CHUNK / 2][..]);
        assert_eq!(&buf[CHUNK / 2..], &vec![0x02u8; CHUNK / 2][..]);
    }

    #[test]
    fn test_read_past_end_truncates() {
        let dir = TempDir::new().unwrap();
        let (pool, _, media, table) = fixture(&dir, [0x01, 0x02, 0x03]);
        let engine = ReadEngine::new(true);
        let cache = ChunkCache::new(8);
        let abort = AtomicBool::new(false);

        let mut buf = vec![0u8; 1000];
        let read = engine
            .read_buffer(
                &pool,
                &media,
                &table,
                &cache,
                CompressionMethod::Deflate,
                media.media_size - 100,
                &mut buf,
                &abort,
            )
            .unwrap();
        assert_eq!(read, 100);

        let read = engine
            .read_buffer(
                &pool,
                &media,
                &table,
                &cache,
                CompressionMethod::Deflate,
                media.media_size,
                &mut buf,
                &abort,
            )
            .unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn test_unmapped_chunk_zeroes_and_records() {
        let dir = TempDir::new().unwrap();
        let (pool, _, media, mut table) = fixture(&dir, [0x01, 0x02, 0x03]);
        table.truncate_from(1);
        let engine = ReadEngine::new(true);
        let cache = ChunkCache::new(8);

        let data = engine
            .read_chunk(&pool, &media, &table, &cache, CompressionMethod::Deflate, 1)
            .unwrap();
        assert_eq!(data.as_slice(), &vec![0u8; CHUNK][..]);
        let errors = engine.checksum_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].first_sector, 64);
        assert_eq!(errors[0].number_of_sectors, 64);
    }

    #[test]
    fn test_corrupted_chunk_policy_off_fails() {
        let dir = TempDir::new().unwrap();
        let (pool, entry, media, table) = fixture(&dir, [0x01, 0x02, 0x03]);
        // Flip a byte inside chunk 1's packed payload
        let location = table.get(1).unwrap();
        let mut byte = [0u8; 1];
        pool.read_at(entry, location.file_offset + 10, &mut byte)
            .unwrap();
        byte[0] ^= 0xff;
        pool.write_at(entry, location.file_offset + 10, &byte).unwrap();

        let strict = ReadEngine::new(false);
        let cache = ChunkCache::new(8);
        let result =
            strict.read_chunk(&pool, &media, &table, &cache, CompressionMethod::Deflate, 1);
        assert!(result.is_err());
        assert_eq!(strict.number_of_checksum_errors(), 1);

        let lenient = ReadEngine::new(true);
        let cache = ChunkCache::new(8);
        let data = lenient
            .read_chunk(&pool, &media, &table, &cache, CompressionMethod::Deflate, 1)
            .unwrap();
        assert_eq!(data.as_slice(), &vec![0u8; CHUNK][..]);
    }

    #[test]
    fn test_abort_returns_partial() {
        let dir = TempDir::new().unwrap();
        let (pool, _, media, table) = fixture(&dir, [0x01, 0x02, 0x03]);
        let engine = ReadEngine::new(true);
        let cache = ChunkCache::new(8);
        let abort = AtomicBool::new(true);

        let mut buf = vec![0u8; CHUNK * 2];
        let read = engine
            .read_buffer(
                &pool,
                &media,
                &table,
                &cache,
                CompressionMethod::Deflate,
                0,
                &mut buf,
                &abort,
            )
            .unwrap();
        assert_eq!(read, 0);
    }
}
