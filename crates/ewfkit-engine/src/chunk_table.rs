//! Chunk table
//!
//! Maps every logical chunk index to its on-disk location: pool entry,
//! absolute file offset, stored size and range flags. Populated from the
//! `table`/`table2`/`sectors` trios of v1 segment files or the
//! `sector_table` sections of v2 files, and updated live by the writer.

use ewfkit_core::{range_flags, Error, Result};
use ewfkit_format::table::{TableEntryV1, TableEntryV2};
use tracing::warn;

/// On-disk location of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub pool_entry: usize,
    pub file_offset: u64,
    pub size: u32,
    pub range_flags: u32,
}

/// Dense per-chunk location table
#[derive(Debug, Default)]
pub struct ChunkTable {
    locations: Vec<Option<ChunkLocation>>,
}

impl ChunkTable {
    /// Create a table for a known number of chunks
    pub fn new(number_of_chunks: u64) -> Self {
        Self {
            locations: vec![None; number_of_chunks as usize],
        }
    }

    /// Number of chunk slots
    pub fn number_of_chunks(&self) -> u64 {
        self.locations.len() as u64
    }

    /// Number of slots with a mapped location
    pub fn number_of_mapped_chunks(&self) -> u64 {
        self.locations.iter().filter(|slot| slot.is_some()).count() as u64
    }

    /// Location of a chunk, if mapped
    pub fn get(&self, chunk_index: u64) -> Option<ChunkLocation> {
        self.locations
            .get(chunk_index as usize)
            .copied()
            .flatten()
    }

    /// Map a chunk, growing the table when streaming past the known end
    pub fn set(&mut self, chunk_index: u64, location: ChunkLocation) {
        let index = chunk_index as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, None);
        }
        self.locations[index] = Some(location);
    }

    /// Unmap every chunk from `chunk_index` on; used by resume
    pub fn truncate_from(&mut self, chunk_index: u64) {
        for slot in self.locations.iter_mut().skip(chunk_index as usize) {
            *slot = None;
        }
    }

    /// First unmapped chunk index
    pub fn first_unmapped(&self) -> u64 {
        self.locations
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or(self.locations.len()) as u64
    }

    /// Populate from a v1 table group
    ///
    /// Entry offsets are relative to `base_offset` within the segment file.
    /// Chunk sizes are inferred from the delta to the next entry; the final
    /// entry is bounded by `sectors_end`, the end offset of the `sectors`
    /// payload. When a CRC-valid `table2` disagrees with `table`, the
    /// `table` entries win and the group is marked corrupted.
    pub fn populate_v1(
        &mut self,
        first_chunk_index: u64,
        pool_entry: usize,
        base_offset: u64,
        entries: &[TableEntryV1],
        table2_entries: Option<&[TableEntryV1]>,
        sectors_end: u64,
    ) -> Result<()> {
        let mut group_corrupted = false;
        if let Some(table2_entries) = table2_entries {
            if table2_entries != entries {
                warn!(
                    first_chunk_index,
                    "table and table2 disagree; trusting table and marking chunks corrupted"
                );
                group_corrupted = true;
            }
        }
        for (position, entry) in entries.iter().enumerate() {
            let chunk_offset = base_offset + entry.relative_offset as u64;
            let next_offset = match entries.get(position + 1) {
                Some(next) => base_offset + next.relative_offset as u64,
                None => sectors_end,
            };
            if next_offset <= chunk_offset {
                return Err(Error::corrupted_section(format!(
                    "non-monotonic table entry at chunk {}",
                    first_chunk_index + position as u64
                )));
            }
            let size = next_offset - chunk_offset;
            if size > u32::MAX as u64 {
                return Err(Error::corrupted_section("table entry size overflow"));
            }
            let mut flags = if entry.is_compressed {
                range_flags::IS_COMPRESSED
            } else {
                // Uncompressed v1 chunks always carry a checksum trailer
                range_flags::HAS_CHECKSUM
            };
            if group_corrupted {
                flags |= range_flags::IS_CORRUPTED;
            }
            self.set(
                first_chunk_index + position as u64,
                ChunkLocation {
                    pool_entry,
                    file_offset: chunk_offset,
                    size: size as u32,
                    range_flags: flags,
                },
            );
        }
        Ok(())
    }

    /// Populate from v2 sector table entries, which are self-describing
    pub fn populate_v2(
        &mut self,
        first_chunk_index: u64,
        pool_entry: usize,
        entries: &[TableEntryV2],
    ) {
        for (position, entry) in entries.iter().enumerate() {
            self.set(
                first_chunk_index + position as u64,
                ChunkLocation {
                    pool_entry,
                    file_offset: entry.offset,
                    size: entry.size,
                    range_flags: entry.flags,
                },
            );
        }
    }

    /// Redirect a chunk to a delta segment file location
    pub fn apply_delta(&mut self, chunk_index: u64, pool_entry: usize, file_offset: u64, size: u32) {
        self.set(
            chunk_index,
            ChunkLocation {
                pool_entry,
                file_offset,
                size,
                range_flags: range_flags::HAS_CHECKSUM
                    | range_flags::IS_DELTA
                    | range_flags::IS_TAINTED,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(relative_offset: u32, is_compressed: bool) -> TableEntryV1 {
        TableEntryV1 {
            relative_offset,
            is_compressed,
        }
    }

    #[test]
    fn test_populate_v1_sizes_from_deltas() {
        let mut table = ChunkTable::new(3);
        table
            .populate_v1(
                0,
                0,
                1000,
                &[entry(0, true), entry(500, false), entry(33276, true)],
                None,
                1000 + 34000,
            )
            .unwrap();

        let first = table.get(0).unwrap();
        assert_eq!(first.file_offset, 1000);
        assert_eq!(first.size, 500);
        assert!(first.range_flags & range_flags::IS_COMPRESSED != 0);

        let second = table.get(1).unwrap();
        assert_eq!(second.file_offset, 1500);
        assert_eq!(second.size, 33276 - 500);
        assert!(second.range_flags & range_flags::HAS_CHECKSUM != 0);

        // Last chunk bounded by the end of the sectors payload
        let third = table.get(2).unwrap();
        assert_eq!(third.size, 34000 - 33276);
    }

    #[test]
    fn test_populate_v1_rejects_non_monotonic() {
        let mut table = ChunkTable::new(2);
        let result = table.populate_v1(
            0,
            0,
            0,
            &[entry(500, false), entry(100, false)],
            None,
            1000,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_table2_mismatch_marks_corrupted() {
        let mut table = ChunkTable::new(2);
        table
            .populate_v1(
                0,
                0,
                0,
                &[entry(0, true), entry(100, true)],
                Some(&[entry(0, true), entry(160, true)]),
                300,
            )
            .unwrap();
        assert!(table.get(0).unwrap().range_flags & range_flags::IS_CORRUPTED != 0);
        assert!(table.get(1).unwrap().range_flags & range_flags::IS_CORRUPTED != 0);
        // The table entries themselves are trusted
        assert_eq!(table.get(1).unwrap().file_offset, 100);
    }

    #[test]
    fn test_truncate_from() {
        let mut table = ChunkTable::new(4);
        for index in 0..4 {
            table.set(
                index,
                ChunkLocation {
                    pool_entry: 0,
                    file_offset: index * 100,
                    size: 100,
                    range_flags: 0,
                },
            );
        }
        table.truncate_from(2);
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_none());
        assert_eq!(table.first_unmapped(), 2);
        assert_eq!(table.number_of_mapped_chunks(), 2);
    }

    #[test]
    fn test_set_grows_for_streamed_writes() {
        let mut table = ChunkTable::new(0);
        table.set(
            5,
            ChunkLocation {
                pool_entry: 1,
                file_offset: 0,
                size: 10,
                range_flags: 0,
            },
        );
        assert_eq!(table.number_of_chunks(), 6);
        assert!(table.get(5).is_some());
    }
}
