//! Segment filename generation
//!
//! Segment files append a numbered extension to the image basename. The v1
//! series runs `.X01` through `.X99`, then base-26 `.XAA` through `.ZZZ`
//! with the leading letter advancing; v2 uses `.Xx01` onward with plain
//! decimal numbering up to 99 999.

use std::path::{Path, PathBuf};

use ewfkit_core::{Error, Result, SegmentFileType};

/// Build the extension string for a segment number
pub fn segment_extension(
    segment_file_type: SegmentFileType,
    segment_number: u32,
) -> Result<String> {
    if segment_number == 0 {
        return Err(Error::invalid_argument("segment numbers start at 1"));
    }
    if segment_number > segment_file_type.maximum_number_of_segments() {
        return Err(Error::limit_exceeded(format!(
            "segment number {segment_number} exceeds {:?} cap",
            segment_file_type
        )));
    }
    let letter = segment_file_type.extension_letter();

    if segment_file_type.is_v2() {
        return Ok(format!("{letter}x{segment_number:02}"));
    }
    if segment_number < 100 {
        return Ok(format!("{letter}{segment_number:02}"));
    }
    // E99 is followed by EAA; the leading letter advances every 26*26 names
    let index = segment_number - 100;
    let first = letter as u8 + (index / 676) as u8;
    let second = b'A' + ((index / 26) % 26) as u8;
    let third = b'A' + (index % 26) as u8;
    if first > b'Z' {
        return Err(Error::limit_exceeded(format!(
            "segment number {segment_number} not representable"
        )));
    }
    Ok(format!(
        "{}{}{}",
        first as char, second as char, third as char
    ))
}

/// Build the path of a segment file from the image basename
pub fn segment_filename(
    basename: &Path,
    segment_file_type: SegmentFileType,
    segment_number: u32,
) -> Result<PathBuf> {
    let extension = segment_extension(segment_file_type, segment_number)?;
    let mut filename = basename
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    filename.push('.');
    filename.push_str(&extension);
    Ok(basename.with_file_name(filename))
}

/// Strip the segment extension from a path, recovering the basename
pub fn basename_of(path: &Path) -> PathBuf {
    path.with_extension("")
}
