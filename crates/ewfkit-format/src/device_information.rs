//! EnCase 7 device information codec
//!
//! The EWF2 `device_information` section mirrors the case data layout and
//! describes the acquired device: model, serial number, label, sector
//! geometry, device type and whether the source was a physical device.

use crate::header_values::{identifiers, HeaderValues};
use crate::text;
use ewfkit_core::{media_flags, Error, MediaType, Result};

/// Parsed device information section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInformation {
    pub header_values: HeaderValues,
    pub number_of_sectors: Option<u64>,
    pub bytes_per_sector: Option<u32>,
    pub media_type: Option<MediaType>,
    /// Physical-device bit folded into the media flags
    pub media_flags: u8,
}

impl DeviceInformation {
    /// Parse a device information payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        let decoded = text::decode_text(data)?;
        let lines = text::split_lines(&decoded);
        let main_index = lines
            .iter()
            .position(|line| *line == "main")
            .ok_or_else(|| Error::corrupted_section("device information missing main line"))?;
        if lines.len() < main_index + 3 {
            return Err(Error::corrupted_section(
                "device information missing value lines",
            ));
        }
        let types = text::split_fields(lines[main_index + 1]);
        let values = text::split_fields(lines[main_index + 2]);

        let mut information = DeviceInformation::default();
        for (index, &abbreviation) in types.iter().enumerate() {
            let value = values.get(index).copied().unwrap_or("");
            if value.is_empty() {
                continue;
            }
            information.apply(abbreviation, value)?;
        }
        Ok(information)
    }

    fn apply(&mut self, abbreviation: &str, value: &str) -> Result<()> {
        match abbreviation {
            "sn" => self.header_values.set(identifiers::SERIAL_NUMBER, value),
            "md" => self.header_values.set(identifiers::MODEL, value),
            "lb" => self.header_values.set(identifiers::DEVICE_LABEL, value),
            "pid" => self
                .header_values
                .set(identifiers::PROCESS_IDENTIFIER, value),
            "ts" => {
                let sectors: u64 = value.parse().map_err(|_| {
                    Error::corrupted_section(format!("device information sector count `{value}`"))
                })?;
                self.number_of_sectors = Some(sectors);
            }
            "bp" => {
                let bytes: u32 = value.parse().map_err(|_| {
                    Error::corrupted_section(format!(
                        "device information bytes per sector `{value}`"
                    ))
                })?;
                self.bytes_per_sector = Some(bytes);
            }
            "dt" => {
                self.media_type = match value {
                    "c" => Some(MediaType::Optical),
                    "f" => Some(MediaType::Fixed),
                    "l" => Some(MediaType::SingleFiles),
                    "m" => Some(MediaType::Memory),
                    "r" => Some(MediaType::Removable),
                    _ => None,
                };
            }
            "ph" => {
                if value == "1" {
                    self.media_flags |= media_flags::PHYSICAL;
                }
            }
            // hs, dc, rs, ls: HPA/DCO and PALM sector counts, not carried
            _ => {}
        }
        Ok(())
    }

    /// Generate the UTF-16LE device information payload
    pub fn generate(&self) -> Vec<u8> {
        let field = |identifier: &str| self.header_values.get(identifier).unwrap_or("").to_string();
        let device_type = match self.media_type {
            Some(MediaType::Optical) => "c",
            Some(MediaType::SingleFiles) => "l",
            Some(MediaType::Memory) => "m",
            Some(MediaType::Removable) => "r",
            _ => "f",
        };
        let physical = if self.media_flags & media_flags::PHYSICAL != 0 {
            "1"
        } else {
            "0"
        };

        let types = ["sn", "md", "lb", "ts", "bp", "dt", "ph", "pid"];
        let values = [
            field(identifiers::SERIAL_NUMBER),
            field(identifiers::MODEL),
            field(identifiers::DEVICE_LABEL),
            self.number_of_sectors
                .map(|v| v.to_string())
                .unwrap_or_default(),
            self.bytes_per_sector
                .map(|v| v.to_string())
                .unwrap_or_default(),
            device_type.to_string(),
            physical.to_string(),
            field(identifiers::PROCESS_IDENTIFIER),
        ];
        let body = format!("1\nmain\n{}\n{}\n\n", types.join("\t"), values.join("\t"));
        text::encode_utf16le(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        let sample = "1\nmain\nsn\tmd\tlb\tts\tbp\tdt\tph\n\
                      SN12345\tDataTraveler\t\t250000\t512\tr\t1\n\n";
        let information = DeviceInformation::parse(sample.as_bytes()).unwrap();
        assert_eq!(
            information.header_values.get(identifiers::SERIAL_NUMBER),
            Some("SN12345")
        );
        assert_eq!(
            information.header_values.get(identifiers::MODEL),
            Some("DataTraveler")
        );
        assert_eq!(information.header_values.get(identifiers::DEVICE_LABEL), None);
        assert_eq!(information.number_of_sectors, Some(250000));
        assert_eq!(information.bytes_per_sector, Some(512));
        assert_eq!(information.media_type, Some(MediaType::Removable));
        assert_eq!(information.media_flags, media_flags::PHYSICAL);
    }

    #[test]
    fn test_generate_parse_roundtrip() {
        let mut information = DeviceInformation {
            number_of_sectors: Some(192),
            bytes_per_sector: Some(512),
            media_type: Some(MediaType::Fixed),
            media_flags: media_flags::PHYSICAL,
            ..DeviceInformation::default()
        };
        information
            .header_values
            .set(identifiers::MODEL, "Test Disk");

        let generated = information.generate();
        let parsed = DeviceInformation::parse(&generated).unwrap();
        assert_eq!(parsed, information);
    }

    #[test]
    fn test_bad_sector_count_rejected() {
        let sample = "1\nmain\nts\nmany\n\n";
        assert!(DeviceInformation::parse(sample.as_bytes()).is_err());
    }
}
