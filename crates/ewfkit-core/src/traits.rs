//! Stream traits consumed by the engine

use std::io::{Read, Seek, Write};

/// Combined trait for Read + Seek
pub trait ReadSeek: Read + Seek + Send {}

/// Blanket implementation for any type that implements Read + Seek
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Combined trait for Read + Write + Seek
pub trait ReadWriteSeek: Read + Write + Seek + Send {}

/// Blanket implementation for any type that implements Read + Write + Seek
impl<T: Read + Write + Seek + Send> ReadWriteSeek for T {}
