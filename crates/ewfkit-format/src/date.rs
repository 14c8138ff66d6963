//! Date value codecs
//!
//! EWF stores acquisition timestamps in two incompatible textual encodings:
//! the v1 `header` section uses space-separated calendar fields, while
//! `header2` and `case_data` use decimal Unix epoch seconds. The engine
//! keeps one canonical i64 epoch internally and converts at the edges.
//! Unparseable values are passed through verbatim by the callers.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

/// Encode an epoch as the v1 header calendar form, e.g. `2012 7 3 5 8 11`
pub fn encode_header_date(epoch: i64) -> Option<String> {
    let timestamp = DateTime::<Utc>::from_timestamp(epoch, 0)?;
    Some(format!(
        "{} {} {} {} {} {}",
        timestamp.year(),
        timestamp.month(),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second()
    ))
}

/// Decode the v1 header calendar form back to an epoch
pub fn decode_header_date(value: &str) -> Option<i64> {
    let mut fields = value.split_whitespace();
    let year: i32 = fields.next()?.parse().ok()?;
    let month: u32 = fields.next()?.parse().ok()?;
    let day: u32 = fields.next()?.parse().ok()?;
    let hour: u32 = fields.next()?.parse().ok()?;
    let minute: u32 = fields.next()?.parse().ok()?;
    let second: u32 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let datetime = date.and_hms_opt(hour, minute, second)?;
    Some(datetime.and_utc().timestamp())
}

/// Encode an epoch as the decimal form used by header2 and case data
pub fn encode_epoch_string(epoch: i64) -> String {
    epoch.to_string()
}

/// Decode a decimal epoch string
pub fn decode_epoch_string(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_date_roundtrip() {
        // 2012-07-03 17:48:11 UTC
        let epoch = 1341337691;
        let encoded = encode_header_date(epoch).unwrap();
        assert_eq!(encoded, "2012 7 3 17 48 11");
        assert_eq!(decode_header_date(&encoded), Some(epoch));
    }

    #[test]
    fn test_header_date_rejects_garbage() {
        assert!(decode_header_date("not a date").is_none());
        assert!(decode_header_date("2012 7 3").is_none());
        assert!(decode_header_date("2012 13 3 0 0 0").is_none());
        assert!(decode_header_date("2012 7 3 17 48 11 extra").is_none());
    }

    #[test]
    fn test_epoch_string_roundtrip() {
        assert_eq!(decode_epoch_string("1341342445"), Some(1341342445));
        assert_eq!(encode_epoch_string(1341342445), "1341342445");
        assert_eq!(decode_epoch_string(" 12 "), Some(12));
        assert!(decode_epoch_string("").is_none());
        assert!(decode_epoch_string("12h").is_none());
    }
}
