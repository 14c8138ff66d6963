//! # ewfkit Format
//!
//! Byte-level codecs for the EWF segment file format:
//! - **file_header**: v1 and v2 segment file headers
//! - **section**: typed section descriptors, v1 forward / v2 backward linked
//! - **volume**: the 1052-byte volume/disk body
//! - **table**: chunk offset tables, v1 4-byte and v2 16-byte entries
//! - **media**: media geometry derived from the volume section
//! - **header_values / case_data / device_information**: metadata text codecs
//! - **date**: header and header2 date encodings
//! - **trailers**: hash, digest, session and error2 bodies
//! - **delta**: delta chunk section header

pub mod case_data;
pub mod date;
pub mod delta;
pub mod device_information;
pub mod file_header;
pub mod header_values;
pub mod media;
pub mod section;
pub mod table;
pub mod text;
pub mod trailers;
pub mod volume;

pub use case_data::CaseData;
pub use delta::DeltaChunkHeader;
pub use device_information::DeviceInformation;
pub use file_header::{detect_version, FileHeaderV1, FileHeaderV2, HeaderVersion};
pub use header_values::{identifiers, HeaderValues};
pub use media::MediaValues;
pub use section::{SectionDescriptorV1, SectionDescriptorV2, SectionType};
pub use table::{TableEntryV1, TableEntryV2, TableHeader};
pub use trailers::{DigestSection, Error2Section, HashSection, SectorRange, SessionSection};
pub use volume::VolumeSection;
