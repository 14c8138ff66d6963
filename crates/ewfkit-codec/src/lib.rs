//! # ewfkit Codec
//!
//! Stateless codec primitives for EWF chunk and section data:
//! - **checksum**: the Adler-32 checksum EWF stores on sections and chunks
//! - **compress**: deflate and bzip2 with capacity-retry decompression
//! - **fill**: zero-block and 64-bit pattern-fill detection

pub mod checksum;
pub mod compress;
pub mod fill;

pub use checksum::{ewf_checksum, split_trailing_checksum, verify_checksum};
pub use compress::{compress, decompress, DecompressOutcome};
pub use fill::{detect_pattern_fill, expand_pattern_fill, is_zero_block};
