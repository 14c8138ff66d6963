//! Trailer section bodies
//!
//! The last segment file of a completed image carries the media hashes
//! (`hash`, `digest`), the optical session map (`session`) and the
//! acquisition read-error ranges (`error2`).

use ewfkit_codec::ewf_checksum;
use ewfkit_core::{Error, Result};

/// `hash` section body: MD5 of the media data (36 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSection {
    pub md5: [u8; 16],
}

impl HashSection {
    /// Serialized size
    pub const SIZE: usize = 36;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("hash section too short"));
        }
        let stored = u32::from_le_bytes([data[32], data[33], data[34], data[35]]);
        if ewf_checksum(&data[0..32]) != stored {
            return Err(Error::checksum_mismatch("hash section"));
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&data[0..16]);
        Ok(Self { md5 })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..16].copy_from_slice(&self.md5);
        let checksum = ewf_checksum(&bytes[0..32]);
        bytes[32..36].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// MD5 as a lowercase hex string
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }
}

/// `digest` section body: MD5 and SHA-1 of the media data (80 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSection {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
}

impl DigestSection {
    /// Serialized size
    pub const SIZE: usize = 80;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corrupted_section("digest section too short"));
        }
        let stored = u32::from_le_bytes([data[76], data[77], data[78], data[79]]);
        if ewf_checksum(&data[0..76]) != stored {
            return Err(Error::checksum_mismatch("digest section"));
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&data[0..16]);
        let mut sha1 = [0u8; 20];
        sha1.copy_from_slice(&data[16..36]);
        Ok(Self { md5, sha1 })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..16].copy_from_slice(&self.md5);
        bytes[16..36].copy_from_slice(&self.sha1);
        let checksum = ewf_checksum(&bytes[0..76]);
        bytes[76..80].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// SHA-1 as a lowercase hex string
    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }
}

/// A contiguous sector range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub first_sector: u64,
    pub number_of_sectors: u64,
}

/// `session` section body: session start map for optical media
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSection {
    pub sessions: Vec<SectorRange>,
}

impl SessionSection {
    /// Serialized header size
    pub const HEADER_SIZE: usize = 32;
    /// Serialized entry size
    pub const ENTRY_SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::corrupted_section("session section too short"));
        }
        let stored = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);
        if ewf_checksum(&data[0..28]) != stored {
            return Err(Error::checksum_mismatch("session section header"));
        }
        let number_of_sessions = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let entries_size = number_of_sessions as usize * Self::ENTRY_SIZE;
        let body = &data[Self::HEADER_SIZE..];
        if body.len() < entries_size + 4 {
            return Err(Error::corrupted_section("session entries truncated"));
        }
        let stored = u32::from_le_bytes([
            body[entries_size],
            body[entries_size + 1],
            body[entries_size + 2],
            body[entries_size + 3],
        ]);
        if ewf_checksum(&body[0..entries_size]) != stored {
            return Err(Error::checksum_mismatch("session entries"));
        }
        let mut sessions = Vec::with_capacity(number_of_sessions as usize);
        for index in 0..number_of_sessions as usize {
            let entry = &body[index * Self::ENTRY_SIZE..];
            sessions.push(SectorRange {
                first_sector: u64::from_le_bytes([
                    entry[0], entry[1], entry[2], entry[3], entry[4], entry[5], entry[6], entry[7],
                ]),
                number_of_sectors: u64::from_le_bytes([
                    entry[8], entry[9], entry[10], entry[11], entry[12], entry[13], entry[14],
                    entry[15],
                ]),
            });
        }
        Ok(Self { sessions })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::HEADER_SIZE];
        bytes[0..4].copy_from_slice(&(self.sessions.len() as u32).to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..28]);
        bytes[28..32].copy_from_slice(&checksum.to_le_bytes());

        let mut entries = Vec::with_capacity(self.sessions.len() * Self::ENTRY_SIZE);
        for session in &self.sessions {
            entries.extend_from_slice(&session.first_sector.to_le_bytes());
            entries.extend_from_slice(&session.number_of_sectors.to_le_bytes());
        }
        let checksum = ewf_checksum(&entries);
        bytes.extend_from_slice(&entries);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

/// `error2` section body: sector ranges the acquiring tool failed to read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Error2Section {
    pub errors: Vec<SectorRange>,
}

impl Error2Section {
    /// Serialized header size
    pub const HEADER_SIZE: usize = 16;
    /// Serialized entry size
    pub const ENTRY_SIZE: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::corrupted_section("error2 section too short"));
        }
        let stored = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        if ewf_checksum(&data[0..12]) != stored {
            return Err(Error::checksum_mismatch("error2 section header"));
        }
        let number_of_errors = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let entries_size = number_of_errors as usize * Self::ENTRY_SIZE;
        let body = &data[Self::HEADER_SIZE..];
        if body.len() < entries_size + 4 {
            return Err(Error::corrupted_section("error2 entries truncated"));
        }
        let stored = u32::from_le_bytes([
            body[entries_size],
            body[entries_size + 1],
            body[entries_size + 2],
            body[entries_size + 3],
        ]);
        if ewf_checksum(&body[0..entries_size]) != stored {
            return Err(Error::checksum_mismatch("error2 entries"));
        }
        let mut errors = Vec::with_capacity(number_of_errors as usize);
        for index in 0..number_of_errors as usize {
            let entry = &body[index * Self::ENTRY_SIZE..];
            errors.push(SectorRange {
                first_sector: u64::from_le_bytes([
                    entry[0], entry[1], entry[2], entry[3], entry[4], entry[5], entry[6], entry[7],
                ]),
                number_of_sectors: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]])
                    as u64,
            });
        }
        Ok(Self { errors })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::HEADER_SIZE];
        bytes[0..4].copy_from_slice(&(self.errors.len() as u32).to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..12]);
        bytes[12..16].copy_from_slice(&checksum.to_le_bytes());

        let mut entries = Vec::with_capacity(self.errors.len() * Self::ENTRY_SIZE);
        for error in &self.errors {
            entries.extend_from_slice(&error.first_sector.to_le_bytes());
            entries
                .extend_from_slice(&(error.number_of_sectors.min(u32::MAX as u64) as u32).to_le_bytes());
        }
        let checksum = ewf_checksum(&entries);
        bytes.extend_from_slice(&entries);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let section = HashSection { md5: [0x11u8; 16] };
        let bytes = section.to_bytes();
        assert_eq!(HashSection::parse(&bytes).unwrap(), section);
    }

    #[test]
    fn test_hash_hex() {
        let section = HashSection {
            md5: [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec,
                0xf8, 0x42, 0x7e,
            ],
        };
        assert_eq!(section.md5_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_digest_roundtrip() {
        let section = DigestSection {
            md5: [0x22u8; 16],
            sha1: [0x33u8; 20],
        };
        let bytes = section.to_bytes();
        assert_eq!(DigestSection::parse(&bytes).unwrap(), section);
    }

    #[test]
    fn test_digest_checksum_enforced() {
        let mut bytes = DigestSection {
            md5: [0u8; 16],
            sha1: [0u8; 20],
        }
        .to_bytes();
        bytes[0] ^= 1;
        assert!(DigestSection::parse(&bytes).is_err());
    }

    #[test]
    fn test_session_roundtrip() {
        let section = SessionSection {
            sessions: vec![
                SectorRange {
                    first_sector: 0,
                    number_of_sectors: 1000,
                },
                SectorRange {
                    first_sector: 1000,
                    number_of_sectors: 5000,
                },
            ],
        };
        let bytes = section.to_bytes();
        assert_eq!(SessionSection::parse(&bytes).unwrap(), section);
    }

    #[test]
    fn test_empty_session_roundtrip() {
        let section = SessionSection::default();
        let bytes = section.to_bytes();
        assert_eq!(SessionSection::parse(&bytes).unwrap(), section);
    }

    #[test]
    fn test_error2_roundtrip() {
        let section = Error2Section {
            errors: vec![SectorRange {
                first_sector: 64,
                number_of_sectors: 64,
            }],
        };
        let bytes = section.to_bytes();
        assert_eq!(Error2Section::parse(&bytes).unwrap(), section);
    }
}
