//! Text helpers for metadata sections
//!
//! Metadata sections carry line-and-tab delimited text in either UTF-8 or
//! byte-order-marked UTF-16LE. Values are split on `\n` tolerating a
//! trailing `\r`.

use ewfkit_core::{Error, Result};

/// UTF-16 little-endian byte order mark
const UTF16LE_BOM: [u8; 2] = [0xff, 0xfe];

/// Decode a metadata text payload
///
/// A leading BOM selects UTF-16LE; anything else is treated as UTF-8.
pub fn decode_text(data: &[u8]) -> Result<String> {
    if data.len() >= 2 && data[0..2] == UTF16LE_BOM {
        let units: Vec<u16> = data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|_| Error::corrupted_section("invalid UTF-16 metadata text"))
    } else {
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::corrupted_section("invalid UTF-8 metadata text"))
    }
}

/// Encode a metadata text payload as BOM-prefixed UTF-16LE
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + text.len() * 2);
    bytes.extend_from_slice(&UTF16LE_BOM);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Split into lines on `\n`, trimming one trailing `\r` per line
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Split a line into tab-separated fields
pub fn split_fields(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(decode_text(b"1\nmain\n").unwrap(), "1\nmain\n");
    }

    #[test]
    fn test_utf16_roundtrip() {
        let text = "1\nmain\nnm\tcn\nusb\tcase\t";
        let encoded = encode_utf16le(text);
        assert_eq!(&encoded[0..2], &UTF16LE_BOM);
        assert_eq!(decode_text(&encoded).unwrap(), text);
    }

    #[test]
    fn test_split_lines_tolerates_carriage_returns() {
        let lines = split_lines("1\r\nmain\r\nlast");
        assert_eq!(lines, vec!["1", "main", "last"]);
    }

    #[test]
    fn test_split_fields() {
        assert_eq!(split_fields("a\tb\t\tc"), vec!["a", "b", "", "c"]);
    }
}
