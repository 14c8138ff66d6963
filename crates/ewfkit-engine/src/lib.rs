//! # ewfkit Engine
//!
//! The EWF on-disk engine: segment file reader/writer, chunk table, chunk
//! codec, resumable writer and the thread-safe [`Handle`] façade.
//!
//! ## Reading
//!
//! ```rust,no_run
//! use ewfkit_engine::{Handle, OpenMode};
//! use std::path::PathBuf;
//!
//! let paths = vec![PathBuf::from("evidence.E01")];
//! let handle = Handle::open(&paths, OpenMode::Read).unwrap();
//! let mut buffer = vec![0u8; 4096];
//! handle.read_at(0, &mut buffer).unwrap();
//! ```
//!
//! ## Writing
//!
//! ```rust,no_run
//! use ewfkit_engine::{Handle, WriteOptions};
//!
//! let options = WriteOptions {
//!     media_size: 1024 * 1024,
//!     ..WriteOptions::default()
//! };
//! let handle = Handle::create("acquired", options).unwrap();
//! handle.write_at(0, &vec![0u8; 32768]).unwrap();
//! // ... remaining chunks ...
//! handle.finalize().unwrap();
//! ```

pub mod cache;
pub mod chunk;
pub mod chunk_table;
pub mod filename;
pub mod handle;
pub mod read;
pub mod segment_file;
pub mod segment_table;
pub mod write;

pub use cache::ChunkCache;
pub use chunk::{pack_flags, ChunkData};
pub use chunk_table::{ChunkLocation, ChunkTable};
pub use handle::{Handle, OpenMode, WriteOptions};
pub use read::ReadEngine;
pub use segment_file::SegmentFile;
pub use segment_table::{SegmentTable, DEFAULT_MAXIMUM_SEGMENT_SIZE};
pub use write::WriteEngine;

// The error and core types travel with the engine API
pub use ewfkit_core::{CompressionLevel, CompressionMethod, Error, Format, MediaType, Result};
pub use ewfkit_format::{HeaderValues, MediaValues, SectorRange};
