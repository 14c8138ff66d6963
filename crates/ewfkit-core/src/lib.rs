//! # ewfkit Core
//!
//! Shared error handling, types and traits for the ewfkit workspace.
//!
//! This crate provides the foundational pieces the format and engine crates
//! build on:
//! - **Error**: the workspace-wide error taxonomy
//! - **Format / SegmentFileType**: EWF variant negotiation
//! - **MediaType / CompressionMethod / range_flags**: wire-level enums
//! - **ReadSeek / ReadWriteSeek**: stream traits for file-object I/O

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, Result};
pub use traits::{ReadSeek, ReadWriteSeek};
pub use types::{
    media_flags, range_flags, CompressionLevel, CompressionMethod, Format, MediaType,
    SegmentFileType, MEDIA_SIZE_2_TIB,
};
