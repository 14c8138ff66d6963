//! EnCase 7 case data codec
//!
//! EWF2 images replace the v1 `header` sections with a `case_data` section:
//! UTF-16LE text with a count line, a `main` line, a tab-separated line of
//! two-letter type abbreviations and a matching value line. Besides case
//! metadata it carries media geometry, which the reader folds back into the
//! media values.

use crate::header_values::{identifiers, HeaderValues};
use crate::{date, text};
use ewfkit_core::{media_flags, CompressionMethod, Error, Result};

/// Parsed case data section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseData {
    pub header_values: HeaderValues,
    pub number_of_chunks: Option<u64>,
    pub sectors_per_chunk: Option<u32>,
    pub error_granularity: Option<u32>,
    pub compression_method: Option<CompressionMethod>,
    /// Write-blocker bits folded into the media flags
    pub media_flags: u8,
}

impl CaseData {
    /// Parse a case data payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        let decoded = text::decode_text(data)?;
        let lines = text::split_lines(&decoded);
        let main_index = lines
            .iter()
            .position(|line| *line == "main")
            .ok_or_else(|| Error::corrupted_section("case data missing main line"))?;
        if lines.len() < main_index + 3 {
            return Err(Error::corrupted_section("case data missing value lines"));
        }
        let types = text::split_fields(lines[main_index + 1]);
        let values = text::split_fields(lines[main_index + 2]);

        let mut case_data = CaseData::default();
        for (index, &abbreviation) in types.iter().enumerate() {
            let value = values.get(index).copied().unwrap_or("");
            if value.is_empty() {
                continue;
            }
            case_data.apply(abbreviation, value)?;
        }
        Ok(case_data)
    }

    fn apply(&mut self, abbreviation: &str, value: &str) -> Result<()> {
        let header_values = &mut self.header_values;
        match abbreviation {
            "nm" => header_values.set(identifiers::DESCRIPTION, value),
            "cn" => header_values.set(identifiers::CASE_NUMBER, value),
            "en" => header_values.set(identifiers::EVIDENCE_NUMBER, value),
            "ex" => header_values.set(identifiers::EXAMINER_NAME, value),
            "nt" => header_values.set(identifiers::NOTES, value),
            "av" => header_values.set(identifiers::ACQUIRY_SOFTWARE_VERSION, value),
            "os" => header_values.set(identifiers::ACQUIRY_OPERATING_SYSTEM, value),
            "at" => {
                let canonical = date::decode_epoch_string(value)
                    .map(date::encode_epoch_string)
                    .unwrap_or_else(|| value.to_string());
                header_values.set(identifiers::ACQUIRY_DATE, canonical);
            }
            "tt" => {
                let canonical = date::decode_epoch_string(value)
                    .map(date::encode_epoch_string)
                    .unwrap_or_else(|| value.to_string());
                header_values.set(identifiers::SYSTEM_DATE, canonical);
            }
            "tb" => {
                let count: u64 = value.parse().map_err(|_| {
                    Error::corrupted_section(format!("case data chunk count `{value}`"))
                })?;
                self.number_of_chunks = Some(count);
            }
            "sb" => {
                let sectors: u32 = value.parse().map_err(|_| {
                    Error::corrupted_section(format!("case data sectors per chunk `{value}`"))
                })?;
                self.sectors_per_chunk = Some(sectors);
            }
            "gr" => {
                let granularity: u32 = value.parse().map_err(|_| {
                    Error::corrupted_section(format!("case data error granularity `{value}`"))
                })?;
                self.error_granularity = Some(granularity);
            }
            "cp" => {
                let method = match value {
                    "0" => CompressionMethod::None,
                    "1" => CompressionMethod::Deflate,
                    "2" => CompressionMethod::Bzip2,
                    other => {
                        return Err(Error::unsupported(format!(
                            "case data compression method {other}"
                        )))
                    }
                };
                self.compression_method = Some(method);
                let name = match method {
                    CompressionMethod::None => "none",
                    CompressionMethod::Deflate => "deflate",
                    CompressionMethod::Bzip2 => "bzip2",
                };
                header_values.set(identifiers::COMPRESSION_METHOD, name);
            }
            "wb" => {
                // The EnCase specification makes these flags, not an enum
                let bits: u32 = value.parse().unwrap_or(0);
                if bits & 0x0000_0001 != 0 {
                    self.media_flags |= media_flags::FASTBLOC;
                }
                if bits & 0x0000_0002 != 0 {
                    self.media_flags |= media_flags::TABLEAU;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Generate the UTF-16LE case data payload
    pub fn generate(&self) -> Vec<u8> {
        let header_values = &self.header_values;
        let field = |identifier: &str| header_values.get(identifier).unwrap_or("").to_string();

        let compression = self
            .compression_method
            .map(|method| method.wire_value().to_string())
            .unwrap_or_default();
        let mut write_blocker_bits = 0u32;
        if self.media_flags & media_flags::FASTBLOC != 0 {
            write_blocker_bits |= 0x0000_0001;
        }
        if self.media_flags & media_flags::TABLEAU != 0 {
            write_blocker_bits |= 0x0000_0002;
        }

        let types = [
            "nm", "cn", "en", "ex", "nt", "av", "os", "tt", "at", "tb", "cp", "sb", "gr", "wb",
        ];
        let values = [
            field(identifiers::DESCRIPTION),
            field(identifiers::CASE_NUMBER),
            field(identifiers::EVIDENCE_NUMBER),
            field(identifiers::EXAMINER_NAME),
            field(identifiers::NOTES),
            field(identifiers::ACQUIRY_SOFTWARE_VERSION),
            field(identifiers::ACQUIRY_OPERATING_SYSTEM),
            field(identifiers::SYSTEM_DATE),
            field(identifiers::ACQUIRY_DATE),
            self.number_of_chunks.map(|v| v.to_string()).unwrap_or_default(),
            compression,
            self.sectors_per_chunk.map(|v| v.to_string()).unwrap_or_default(),
            self.error_granularity.map(|v| v.to_string()).unwrap_or_default(),
            write_blocker_bits.to_string(),
        ];
        let body = format!("1\nmain\n{}\n{}\n\n", types.join("\t"), values.join("\t"));
        text::encode_utf16le(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\nmain\nnm\tcn\ten\tex\tnt\tav\tos\ttt\tat\ttb\tcp\tsb\tgr\twb\n\
        usb-name\tcase\tevid\texam\tnotes\t7.4.1.10\tWindows 7\t1341342491\t1341342445\t8000\t1\t64\t64\t\n\n";

    #[test]
    fn test_parse_encase7_sample() {
        let case_data = CaseData::parse(&text::encode_utf16le(SAMPLE)).unwrap();
        let values = &case_data.header_values;
        assert_eq!(values.get(identifiers::DESCRIPTION), Some("usb-name"));
        assert_eq!(values.get(identifiers::CASE_NUMBER), Some("case"));
        assert_eq!(values.get(identifiers::EVIDENCE_NUMBER), Some("evid"));
        assert_eq!(values.get(identifiers::EXAMINER_NAME), Some("exam"));
        assert_eq!(values.get(identifiers::NOTES), Some("notes"));
        assert_eq!(values.get(identifiers::ACQUIRY_SOFTWARE_VERSION), Some("7.4.1.10"));
        assert_eq!(values.get(identifiers::ACQUIRY_OPERATING_SYSTEM), Some("Windows 7"));
        assert_eq!(values.get(identifiers::SYSTEM_DATE), Some("1341342491"));
        assert_eq!(values.get(identifiers::ACQUIRY_DATE), Some("1341342445"));
        assert_eq!(case_data.number_of_chunks, Some(8000));
        assert_eq!(case_data.sectors_per_chunk, Some(64));
        assert_eq!(case_data.error_granularity, Some(64));
        assert_eq!(case_data.compression_method, Some(CompressionMethod::Deflate));
        assert_eq!(values.get(identifiers::COMPRESSION_METHOD), Some("deflate"));
        // Empty trailing write blocker value is skipped
        assert_eq!(case_data.media_flags, 0);
    }

    #[test]
    fn test_parse_plain_utf8() {
        let case_data = CaseData::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(case_data.number_of_chunks, Some(8000));
    }

    #[test]
    fn test_write_blocker_flags() {
        let sample = "1\nmain\nnm\twb\ndrive\t3\n\n";
        let case_data = CaseData::parse(sample.as_bytes()).unwrap();
        assert_eq!(
            case_data.media_flags,
            media_flags::FASTBLOC | media_flags::TABLEAU
        );
    }

    #[test]
    fn test_generate_parse_roundtrip() {
        let mut case_data = CaseData {
            number_of_chunks: Some(8000),
            sectors_per_chunk: Some(64),
            error_granularity: Some(64),
            compression_method: Some(CompressionMethod::Deflate),
            ..CaseData::default()
        };
        case_data.header_values.set(identifiers::DESCRIPTION, "usb-name");
        case_data.header_values.set(identifiers::CASE_NUMBER, "case");
        case_data.header_values.set(identifiers::ACQUIRY_DATE, "1341342445");
        case_data.header_values.set(identifiers::SYSTEM_DATE, "1341342491");
        case_data.header_values.set(identifiers::COMPRESSION_METHOD, "deflate");

        let generated = case_data.generate();
        let parsed = CaseData::parse(&generated).unwrap();
        assert_eq!(parsed, case_data);
    }

    #[test]
    fn test_bad_chunk_count_rejected() {
        let sample = "1\nmain\ntb\nnot-a-number\n\n";
        assert!(CaseData::parse(sample.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_main_rejected() {
        assert!(CaseData::parse(b"1\nother\n\n").is_err());
    }
}
