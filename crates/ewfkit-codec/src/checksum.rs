//! EWF section and chunk checksums
//!
//! EWF calls its 32-bit checksum a CRC but the algorithm is Adler-32 with
//! the usual initial accumulator of 1. Every section descriptor, table
//! header, table footer and uncompressed chunk carries one, stored
//! little-endian.

use adler2::adler32_slice;

/// Compute the EWF checksum of a buffer
pub fn ewf_checksum(data: &[u8]) -> u32 {
    adler32_slice(data)
}

/// Verify a stored checksum against the covered bytes
pub fn verify_checksum(data: &[u8], stored: u32) -> bool {
    ewf_checksum(data) == stored
}

/// Split a trailing little-endian checksum off a buffer
///
/// Returns the covered bytes and the stored checksum, or `None` when the
/// buffer is too short to carry one.
pub fn split_trailing_checksum(data: &[u8]) -> Option<(&[u8], u32)> {
    if data.len() < 4 {
        return None;
    }
    let (covered, trailer) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    Some((covered, stored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        // Adler-32 of nothing is the initial accumulator
        assert_eq!(ewf_checksum(&[]), 1);
    }

    #[test]
    fn test_known_value() {
        // Adler-32("Wikipedia") = 0x11E60398
        assert_eq!(ewf_checksum(b"Wikipedia"), 0x11e6_0398);
    }

    #[test]
    fn test_verify() {
        let data = b"forensic evidence";
        let checksum = ewf_checksum(data);
        assert!(verify_checksum(data, checksum));
        assert!(!verify_checksum(data, checksum ^ 1));
    }

    #[test]
    fn test_split_trailing() {
        let mut data = b"payload".to_vec();
        let checksum = ewf_checksum(&data);
        data.extend_from_slice(&checksum.to_le_bytes());

        let (covered, stored) = split_trailing_checksum(&data).unwrap();
        assert_eq!(covered, b"payload");
        assert_eq!(stored, checksum);

        assert!(split_trailing_checksum(&[0u8; 3]).is_none());
    }
}
