//! Chunk data packing and unpacking
//!
//! A chunk buffers one logical unit of media data in either its unpacked
//! plaintext form or its packed on-disk form. Packing compresses when that
//! wins, falls back to plaintext with a trailing checksum, and recognizes
//! zero blocks and 8-byte pattern fills. Exactly one of the two buffers is
//! authoritative; `IS_PACKED` says which.

use ewfkit_codec::{
    compress, decompress, detect_pattern_fill, ewf_checksum, expand_pattern_fill, is_zero_block,
    split_trailing_checksum, DecompressOutcome,
};
use ewfkit_core::{range_flags, CompressionLevel, CompressionMethod, Error, Result};

/// Packing behavior flags
pub mod pack_flags {
    /// Append a checksum trailer to uncompressed chunks
    pub const CALCULATE_CHECKSUM: u8 = 0x01;
    /// Store every chunk compressed, as EWF and SMART require
    pub const FORCE_COMPRESSION: u8 = 0x02;
    /// Pad the packed form to a 16-byte boundary (EWF2)
    pub const ADD_ALIGNMENT_PADDING: u8 = 0x04;
    /// Store 8-byte repeating chunks as their pattern (EWF2)
    pub const USE_PATTERN_FILL: u8 = 0x08;
}

/// One logical chunk in packed and/or unpacked form
#[derive(Debug, Clone)]
pub struct ChunkData {
    data: Vec<u8>,
    packed: Vec<u8>,
    padding_size: usize,
    range_flags: u32,
}

impl ChunkData {
    /// Wrap unpacked media data
    pub fn from_media(data: Vec<u8>) -> Self {
        Self {
            data,
            packed: Vec::new(),
            padding_size: 0,
            range_flags: 0,
        }
    }

    /// Wrap the packed on-disk form read from a segment file
    pub fn from_packed(packed: Vec<u8>, range_flags: u32) -> Self {
        Self {
            data: Vec::new(),
            packed,
            padding_size: 0,
            range_flags: range_flags | range_flags::IS_PACKED,
        }
    }

    /// Unpacked data; empty until unpacked
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Packed on-disk form; empty until packed
    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn range_flags(&self) -> u32 {
        self.range_flags
    }

    pub fn is_packed(&self) -> bool {
        self.range_flags & range_flags::IS_PACKED != 0
    }

    pub fn is_corrupted(&self) -> bool {
        self.range_flags & range_flags::IS_CORRUPTED != 0
    }

    /// Alignment padding bytes included in the packed form
    pub fn padding_size(&self) -> usize {
        self.padding_size
    }

    /// Mark the chunk corrupted and zero its unpacked data
    pub fn zero_out(&mut self, data_size: usize) {
        self.data.clear();
        self.data.resize(data_size, 0);
        self.range_flags |= range_flags::IS_CORRUPTED;
        self.range_flags &= !range_flags::IS_PACKED;
    }

    /// Pack the chunk for writing
    ///
    /// `compressed_zero_block` is the precompressed all-zero chunk; when the
    /// input is a zero block of full chunk size the cached bytes are reused
    /// instead of compressing again.
    pub fn pack(
        &mut self,
        chunk_size: u32,
        method: CompressionMethod,
        level: CompressionLevel,
        flags: u8,
        compressed_zero_block: Option<&[u8]>,
    ) -> Result<()> {
        if self.is_packed() {
            return Ok(());
        }
        if self.data.len() > chunk_size as usize {
            return Err(Error::invalid_argument(format!(
                "chunk data of {} bytes exceeds chunk size {chunk_size}",
                self.data.len()
            )));
        }
        let force = flags & pack_flags::FORCE_COMPRESSION != 0;
        let full_chunk = self.data.len() == chunk_size as usize;

        if flags & pack_flags::USE_PATTERN_FILL != 0 && full_chunk && !force {
            if let Some(pattern) = detect_pattern_fill(&self.data) {
                self.packed = pattern.to_le_bytes().to_vec();
                self.range_flags |= range_flags::USES_PATTERN_FILL | range_flags::IS_PACKED;
                return Ok(());
            }
        }

        let try_compression = force || level != CompressionLevel::None;
        let mut compressed: Option<Vec<u8>> = None;

        if try_compression {
            if full_chunk && is_zero_block(&self.data) {
                if let Some(cached) = compressed_zero_block {
                    compressed = Some(cached.to_vec());
                }
            }
            if compressed.is_none() {
                let candidate = compress(method, level, &self.data)?;
                // Plaintext carries a 4-byte checksum trailer; compression
                // only wins when strictly smaller than that
                if force || candidate.len() < self.data.len() + 4 {
                    compressed = Some(candidate);
                }
            }
        }

        match compressed {
            Some(packed) => {
                self.packed = packed;
                self.range_flags |= range_flags::IS_COMPRESSED;
            }
            None => {
                self.packed = Vec::with_capacity(self.data.len() + 4);
                self.packed.extend_from_slice(&self.data);
                if flags & pack_flags::CALCULATE_CHECKSUM != 0 {
                    let checksum = ewf_checksum(&self.data);
                    self.packed.extend_from_slice(&checksum.to_le_bytes());
                    self.range_flags |= range_flags::HAS_CHECKSUM;
                }
            }
        }

        // Only self-delimiting forms can be padded; a checksum trailer
        // must stay the last four bytes of the stored chunk
        let self_delimiting = self.range_flags & range_flags::IS_COMPRESSED != 0;
        if flags & pack_flags::ADD_ALIGNMENT_PADDING != 0 && self_delimiting {
            let misalignment = self.packed.len() % 16;
            if misalignment != 0 {
                self.padding_size = 16 - misalignment;
                self.packed.resize(self.packed.len() + self.padding_size, 0);
            }
        }
        self.range_flags |= range_flags::IS_PACKED;
        Ok(())
    }

    /// Unpack the chunk after reading
    ///
    /// `data_size` is the expected unpacked size: the media chunk size, or
    /// less for the final chunk. A checksum or decompression failure marks
    /// the chunk corrupted rather than failing the call.
    pub fn unpack(&mut self, data_size: usize, method: CompressionMethod) -> Result<()> {
        if !self.is_packed() {
            return Ok(());
        }
        // Unpacking hands ownership to the data buffer
        let packed = std::mem::take(&mut self.packed);
        let payload_size = packed.len().saturating_sub(self.padding_size);
        let payload = &packed[..payload_size];

        if self.range_flags & range_flags::USES_PATTERN_FILL != 0 {
            if payload.len() < 8 {
                self.zero_out(data_size);
                return Ok(());
            }
            let mut pattern = [0u8; 8];
            pattern.copy_from_slice(&payload[..8]);
            self.data.clear();
            self.data.resize(data_size, 0);
            expand_pattern_fill(u64::from_le_bytes(pattern), &mut self.data);
        } else if self.range_flags & range_flags::IS_COMPRESSED != 0 {
            let mut capacity = data_size;
            loop {
                self.data.clear();
                self.data.resize(capacity, 0);
                match decompress(method, payload, &mut self.data) {
                    Ok(DecompressOutcome::Complete(written)) => {
                        if written != data_size {
                            self.zero_out(data_size);
                            return Ok(());
                        }
                        self.data.truncate(written);
                        break;
                    }
                    Ok(DecompressOutcome::NeedsCapacity(required)) => {
                        // A stream larger than the chunk can only be corrupt
                        if required > data_size * 4 {
                            self.zero_out(data_size);
                            return Ok(());
                        }
                        capacity = required;
                    }
                    Err(_) => {
                        self.zero_out(data_size);
                        return Ok(());
                    }
                }
            }
        } else if self.range_flags & range_flags::HAS_CHECKSUM != 0 {
            let Some((covered, stored)) = split_trailing_checksum(payload) else {
                self.zero_out(data_size);
                return Ok(());
            };
            if ewf_checksum(covered) != stored || covered.len() != data_size {
                self.zero_out(data_size);
                return Ok(());
            }
            self.data = covered.to_vec();
        } else {
            if payload.len() != data_size {
                self.zero_out(data_size);
                return Ok(());
            }
            self.data = payload.to_vec();
        }
        self.range_flags &= !range_flags::IS_PACKED;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK_SIZE: u32 = 4096;

    fn packable(byte: u8) -> ChunkData {
        ChunkData::from_media(vec![byte; CHUNK_SIZE as usize])
    }

    #[test]
    fn test_compressible_chunk_roundtrip() {
        let mut chunk = packable(0x77);
        chunk
            .pack(
                CHUNK_SIZE,
                CompressionMethod::Deflate,
                CompressionLevel::Fast,
                pack_flags::CALCULATE_CHECKSUM,
                None,
            )
            .unwrap();
        assert!(chunk.is_packed());
        assert!(chunk.range_flags() & range_flags::IS_COMPRESSED != 0);
        assert!(chunk.packed().len() < CHUNK_SIZE as usize);

        let mut read_back = ChunkData::from_packed(chunk.packed().to_vec(), range_flags::IS_COMPRESSED);
        read_back
            .unpack(CHUNK_SIZE as usize, CompressionMethod::Deflate)
            .unwrap();
        assert!(!read_back.is_corrupted());
        assert_eq!(read_back.data(), &vec![0x77u8; CHUNK_SIZE as usize][..]);
    }

    #[test]
    fn test_incompressible_chunk_gets_checksum_trailer() {
        // A pseudo-random buffer deflate cannot shrink
        let mut state = 0x12345678u32;
        let data: Vec<u8> = (0..CHUNK_SIZE)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        let mut chunk = ChunkData::from_media(data.clone());
        chunk
            .pack(
                CHUNK_SIZE,
                CompressionMethod::Deflate,
                CompressionLevel::Fast,
                pack_flags::CALCULATE_CHECKSUM,
                None,
            )
            .unwrap();
        assert!(chunk.range_flags() & range_flags::HAS_CHECKSUM != 0);
        assert_eq!(chunk.packed().len(), CHUNK_SIZE as usize + 4);

        // The trailer is the checksum of the plaintext
        let (covered, stored) = split_trailing_checksum(chunk.packed()).unwrap();
        assert_eq!(stored, ewf_checksum(covered));

        let mut read_back =
            ChunkData::from_packed(chunk.packed().to_vec(), range_flags::HAS_CHECKSUM);
        read_back
            .unpack(CHUNK_SIZE as usize, CompressionMethod::Deflate)
            .unwrap();
        assert_eq!(read_back.data(), &data[..]);
    }

    #[test]
    fn test_zero_block_fast_path() {
        let zero_block = {
            let mut chunk = packable(0);
            chunk
                .pack(
                    CHUNK_SIZE,
                    CompressionMethod::Deflate,
                    CompressionLevel::Best,
                    pack_flags::CALCULATE_CHECKSUM,
                    None,
                )
                .unwrap();
            chunk.packed().to_vec()
        };

        let mut chunk = packable(0);
        chunk
            .pack(
                CHUNK_SIZE,
                CompressionMethod::Deflate,
                CompressionLevel::Best,
                pack_flags::CALCULATE_CHECKSUM,
                Some(&zero_block),
            )
            .unwrap();
        assert_eq!(chunk.packed(), &zero_block[..]);
    }

    #[test]
    fn test_forced_compression() {
        // Incompressible data still compresses under force
        let mut state = 7u32;
        let data: Vec<u8> = (0..CHUNK_SIZE)
            .map(|_| {
                state = state.wrapping_mul(48271);
                (state >> 16) as u8
            })
            .collect();
        let mut chunk = ChunkData::from_media(data);
        chunk
            .pack(
                CHUNK_SIZE,
                CompressionMethod::Deflate,
                CompressionLevel::None,
                pack_flags::FORCE_COMPRESSION,
                None,
            )
            .unwrap();
        assert!(chunk.range_flags() & range_flags::IS_COMPRESSED != 0);
    }

    #[test]
    fn test_pattern_fill_roundtrip() {
        let mut data = Vec::with_capacity(CHUNK_SIZE as usize);
        while data.len() < CHUNK_SIZE as usize {
            data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        }
        let mut chunk = ChunkData::from_media(data.clone());
        chunk
            .pack(
                CHUNK_SIZE,
                CompressionMethod::Deflate,
                CompressionLevel::Fast,
                pack_flags::CALCULATE_CHECKSUM | pack_flags::USE_PATTERN_FILL,
                None,
            )
            .unwrap();
        assert!(chunk.range_flags() & range_flags::USES_PATTERN_FILL != 0);
        assert_eq!(chunk.packed().len(), 8);

        let mut read_back = ChunkData::from_packed(
            chunk.packed().to_vec(),
            range_flags::USES_PATTERN_FILL,
        );
        read_back
            .unpack(CHUNK_SIZE as usize, CompressionMethod::Deflate)
            .unwrap();
        assert_eq!(read_back.data(), &data[..]);
    }

    #[test]
    fn test_alignment_padding() {
        let mut chunk = packable(0x55);
        chunk
            .pack(
                CHUNK_SIZE,
                CompressionMethod::Deflate,
                CompressionLevel::Fast,
                pack_flags::CALCULATE_CHECKSUM | pack_flags::ADD_ALIGNMENT_PADDING,
                None,
            )
            .unwrap();
        assert_eq!(chunk.packed().len() % 16, 0);

        let mut read_back =
            ChunkData::from_packed(chunk.packed().to_vec(), range_flags::IS_COMPRESSED);
        read_back.padding_size = chunk.padding_size();
        read_back
            .unpack(CHUNK_SIZE as usize, CompressionMethod::Deflate)
            .unwrap();
        assert_eq!(read_back.data(), &vec![0x55u8; CHUNK_SIZE as usize][..]);
    }

    #[test]
    fn test_corrupted_checksum_zeroes() {
        let mut chunk = ChunkData::from_media(vec![9u8; 64]);
        chunk
            .pack(
                64,
                CompressionMethod::Deflate,
                CompressionLevel::None,
                pack_flags::CALCULATE_CHECKSUM,
                None,
            )
            .unwrap();
        let mut packed = chunk.packed().to_vec();
        packed[10] ^= 0xff;

        let mut read_back = ChunkData::from_packed(packed, range_flags::HAS_CHECKSUM);
        read_back.unpack(64, CompressionMethod::Deflate).unwrap();
        assert!(read_back.is_corrupted());
        assert_eq!(read_back.data(), &[0u8; 64][..]);
    }

    #[test]
    fn test_corrupted_compressed_stream_zeroes() {
        let mut read_back =
            ChunkData::from_packed(vec![0xff; 32], range_flags::IS_COMPRESSED);
        read_back.unpack(64, CompressionMethod::Deflate).unwrap();
        assert!(read_back.is_corrupted());
        assert_eq!(read_back.data(), &[0u8; 64][..]);
    }

    #[test]
    fn test_oversized_input_rejected() {
        let mut chunk = ChunkData::from_media(vec![0u8; 100]);
        assert!(chunk
            .pack(
                64,
                CompressionMethod::Deflate,
                CompressionLevel::Fast,
                pack_flags::CALCULATE_CHECKSUM,
                None,
            )
            .is_err());
    }
}
