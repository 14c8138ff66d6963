//! Chunk compression codecs
//!
//! All v1 formats use zlib deflate. EWF2 negotiates deflate or bzip2 in the
//! file header. Decompression reports a capacity shortfall instead of
//! failing so the caller can grow the output buffer and retry.

use std::io::Write;

use ewfkit_core::{CompressionLevel, CompressionMethod, Error, Result};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

/// Outcome of a decompression attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressOutcome {
    /// The full stream was written; holds the number of output bytes
    Complete(usize),
    /// The output buffer was too small; holds a capacity to retry with
    NeedsCapacity(usize),
}

/// Compress a buffer with the given method and level
pub fn compress(method: CompressionMethod, level: CompressionLevel, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), deflate_level(level));
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2_level(level));
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::None => Err(Error::unsupported(
            "cannot compress without a compression method",
        )),
    }
}

/// Decompress a buffer into `output`
///
/// Returns [`DecompressOutcome::NeedsCapacity`] when `output` is too small
/// for the full stream. A malformed stream is a [`Error::ChecksumMismatch`]
/// class failure surfaced as `CorruptedSection`.
pub fn decompress(
    method: CompressionMethod,
    data: &[u8],
    output: &mut [u8],
) -> Result<DecompressOutcome> {
    match method {
        CompressionMethod::Deflate => decompress_deflate(data, output),
        CompressionMethod::Bzip2 => decompress_bzip2(data, output),
        CompressionMethod::None => Err(Error::unsupported(
            "cannot decompress without a compression method",
        )),
    }
}

fn decompress_deflate(data: &[u8], output: &mut [u8]) -> Result<DecompressOutcome> {
    let mut inflater = Decompress::new(true);

    let status = inflater
        .decompress(data, output, FlushDecompress::Finish)
        .map_err(|error| Error::corrupted_section(format!("deflate stream: {error}")))?;

    match status {
        Status::StreamEnd => Ok(DecompressOutcome::Complete(inflater.total_out() as usize)),
        Status::Ok | Status::BufError => {
            Ok(DecompressOutcome::NeedsCapacity(grow_capacity(output.len())))
        }
    }
}

fn decompress_bzip2(data: &[u8], output: &mut [u8]) -> Result<DecompressOutcome> {
    let mut decoder = bzip2::Decompress::new(false);

    let status = decoder
        .decompress(data, output)
        .map_err(|error| Error::corrupted_section(format!("bzip2 stream: {error}")))?;

    match status {
        bzip2::Status::StreamEnd => Ok(DecompressOutcome::Complete(decoder.total_out() as usize)),
        _ => Ok(DecompressOutcome::NeedsCapacity(grow_capacity(output.len()))),
    }
}

fn grow_capacity(current: usize) -> usize {
    current.max(1024) * 2
}

fn deflate_level(level: CompressionLevel) -> Compression {
    match level {
        // A level of none still compresses when the caller forces it
        CompressionLevel::None => Compression::default(),
        CompressionLevel::Fast => Compression::fast(),
        CompressionLevel::Best => Compression::best(),
    }
}

fn bzip2_level(level: CompressionLevel) -> bzip2::Compression {
    match level {
        CompressionLevel::None => bzip2::Compression::default(),
        CompressionLevel::Fast => bzip2::Compression::fast(),
        CompressionLevel::Best => bzip2::Compression::best(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_roundtrip() {
        let data = vec![0x5au8; 4096];
        let compressed =
            compress(CompressionMethod::Deflate, CompressionLevel::Fast, &data).unwrap();
        assert!(compressed.len() < data.len());

        let mut output = vec![0u8; 4096];
        let outcome = decompress(CompressionMethod::Deflate, &compressed, &mut output).unwrap();
        assert_eq!(outcome, DecompressOutcome::Complete(4096));
        assert_eq!(output, data);
    }

    #[test]
    fn test_bzip2_roundtrip() {
        let data = vec![0x33u8; 4096];
        let compressed = compress(CompressionMethod::Bzip2, CompressionLevel::Best, &data).unwrap();

        let mut output = vec![0u8; 4096];
        let outcome = decompress(CompressionMethod::Bzip2, &compressed, &mut output).unwrap();
        assert_eq!(outcome, DecompressOutcome::Complete(4096));
        assert_eq!(output, data);
    }

    #[test]
    fn test_deflate_capacity_shortfall() {
        let data = vec![0xa1u8; 8192];
        let compressed =
            compress(CompressionMethod::Deflate, CompressionLevel::Best, &data).unwrap();

        let mut small = vec![0u8; 16];
        match decompress(CompressionMethod::Deflate, &compressed, &mut small).unwrap() {
            DecompressOutcome::NeedsCapacity(required) => assert!(required > 16),
            other => panic!("expected capacity shortfall, got {other:?}"),
        }
    }

    #[test]
    fn test_deflate_garbage_is_rejected() {
        let mut output = vec![0u8; 64];
        let result = decompress(CompressionMethod::Deflate, &[0xff, 0xfe, 0xfd], &mut output);
        assert!(result.is_err());
    }

    #[test]
    fn test_none_method_is_rejected() {
        assert!(compress(CompressionMethod::None, CompressionLevel::Fast, &[0u8; 8]).is_err());
    }
}
