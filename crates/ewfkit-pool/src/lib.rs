//! # ewfkit Pool
//!
//! Block I/O multiplexing for segment files.
//!
//! An EWF image can span thousands of numbered segment files; [`FilePool`]
//! keeps at most a configured number of descriptors open, evicting the
//! least recently used and reopening on demand. Callers address entries by
//! number and perform positioned reads and writes; operations on distinct
//! entries proceed in parallel, operations on one entry are serialized.

pub mod pool;

pub use pool::{AccessMode, FilePool, DEFAULT_MAXIMUM_OPEN};
