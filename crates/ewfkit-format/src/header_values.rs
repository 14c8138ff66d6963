//! Header value store and v1 header text codec
//!
//! Case metadata lives in `header`, `header2` and (for EWF2) `case_data`
//! sections as tab-delimited text. The store keys values by the canonical
//! identifiers; the codecs translate the per-section abbreviations. Dates
//! are canonicalized to decimal Unix epoch strings on ingest; values that
//! do not parse are preserved verbatim.

use std::collections::BTreeMap;

use crate::date;
use crate::text;
use ewfkit_core::{Error, Result};

/// Canonical header value identifiers
pub mod identifiers {
    pub const CASE_NUMBER: &str = "case_number";
    pub const DESCRIPTION: &str = "description";
    pub const EXAMINER_NAME: &str = "examiner_name";
    pub const EVIDENCE_NUMBER: &str = "evidence_number";
    pub const NOTES: &str = "notes";
    pub const ACQUIRY_DATE: &str = "acquiry_date";
    pub const SYSTEM_DATE: &str = "system_date";
    pub const ACQUIRY_OPERATING_SYSTEM: &str = "acquiry_operating_system";
    pub const ACQUIRY_SOFTWARE_VERSION: &str = "acquiry_software_version";
    pub const PASSWORD: &str = "password";
    pub const COMPRESSION_METHOD: &str = "compression_method";
    pub const MODEL: &str = "model";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const DEVICE_LABEL: &str = "device_label";
    pub const PROCESS_IDENTIFIER: &str = "process_identifier";
}

/// Identifier-keyed case metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderValues {
    values: BTreeMap<String, String>,
}

impl HeaderValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by canonical identifier
    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.values.get(identifier).map(String::as_str)
    }

    /// Set a value; empty values are removed
    pub fn set(&mut self, identifier: impl Into<String>, value: impl Into<String>) {
        let identifier = identifier.into();
        let value = value.into();
        if value.is_empty() {
            self.values.remove(&identifier);
        } else {
            self.values.insert(identifier, value);
        }
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (identifier, value) pairs in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(identifier, value)| (identifier.as_str(), value.as_str()))
    }

    /// Acquisition date as canonical epoch seconds, if set and parseable
    pub fn acquiry_epoch(&self) -> Option<i64> {
        self.get(identifiers::ACQUIRY_DATE)
            .and_then(date::decode_epoch_string)
    }

    /// System date as canonical epoch seconds, if set and parseable
    pub fn system_epoch(&self) -> Option<i64> {
        self.get(identifiers::SYSTEM_DATE)
            .and_then(date::decode_epoch_string)
    }
}

/// Map a v1 header type abbreviation to its canonical identifier
fn v1_identifier(abbreviation: &str) -> Option<&'static str> {
    Some(match abbreviation {
        "c" => identifiers::CASE_NUMBER,
        "n" => identifiers::EVIDENCE_NUMBER,
        "a" => identifiers::DESCRIPTION,
        "e" => identifiers::EXAMINER_NAME,
        "t" => identifiers::NOTES,
        "av" => identifiers::ACQUIRY_SOFTWARE_VERSION,
        "os" | "ov" => identifiers::ACQUIRY_OPERATING_SYSTEM,
        "m" => identifiers::ACQUIRY_DATE,
        "u" => identifiers::SYSTEM_DATE,
        "p" => identifiers::PASSWORD,
        "md" => identifiers::MODEL,
        "sn" => identifiers::SERIAL_NUMBER,
        "l" => identifiers::DEVICE_LABEL,
        "pid" => identifiers::PROCESS_IDENTIFIER,
        _ => return None,
    })
}

/// Whether a v1 abbreviation carries a date value
fn v1_is_date(abbreviation: &str) -> bool {
    matches!(abbreviation, "m" | "u")
}

/// Parse the text payload of a v1 `header` or `header2` section
///
/// The layout is: a count line, a `main` line, a tab-separated type line
/// and a tab-separated value line. `header` encodes dates as calendar
/// fields, `header2` as epoch seconds; both canonicalize to epoch strings.
pub fn parse_header_text(data: &[u8]) -> Result<HeaderValues> {
    let decoded = text::decode_text(data)?;
    let lines = text::split_lines(&decoded);
    if lines.len() < 4 {
        return Err(Error::corrupted_section("header text too short"));
    }
    let main_index = lines
        .iter()
        .position(|line| *line == "main")
        .ok_or_else(|| Error::corrupted_section("header text missing main line"))?;
    if lines.len() < main_index + 3 {
        return Err(Error::corrupted_section("header text missing value lines"));
    }
    let types = text::split_fields(lines[main_index + 1]);
    let values = text::split_fields(lines[main_index + 2]);

    let mut header_values = HeaderValues::new();
    for (index, &abbreviation) in types.iter().enumerate() {
        let value = values.get(index).copied().unwrap_or("");
        if value.is_empty() {
            continue;
        }
        let Some(identifier) = v1_identifier(abbreviation) else {
            continue;
        };
        let canonical = if v1_is_date(abbreviation) {
            // Calendar fields (header) or epoch seconds (header2); keep
            // unparseable values verbatim
            date::decode_header_date(value)
                .or_else(|| date::decode_epoch_string(value))
                .map(date::encode_epoch_string)
                .unwrap_or_else(|| value.to_string())
        } else {
            value.to_string()
        };
        header_values.set(identifier, canonical);
    }
    Ok(header_values)
}

/// Generate the text payload of a v1 `header` section
///
/// Dates are emitted in the calendar form the v1 header uses.
pub fn generate_header_text(values: &HeaderValues) -> String {
    let abbreviations = ["c", "n", "a", "e", "t", "av", "os", "m", "u", "p"];
    let mut fields = Vec::with_capacity(abbreviations.len());
    for abbreviation in abbreviations {
        let identifier = v1_identifier(abbreviation).unwrap_or_default();
        let value = values.get(identifier).unwrap_or("");
        if v1_is_date(abbreviation) {
            let encoded = date::decode_epoch_string(value)
                .and_then(date::encode_header_date)
                .unwrap_or_else(|| value.to_string());
            fields.push(encoded);
        } else {
            fields.push(value.to_string());
        }
    }
    format!(
        "1\r\nmain\r\n{}\r\n{}\r\n\r\n",
        abbreviations.join("\t"),
        fields.join("\t")
    )
}
