//! CGM export parsing.
//!
//! Turns raw CSV or JSON sensor exports into [`NormalizedRecord`]s sorted
//! by timestamp. Individual bad rows are skipped; input whose overall
//! shape cannot be understood fails with [`Error::Parse`].
//!
//! CSV handling is deliberately naive: fields are split on commas with no
//! quote or escape support.

use crate::{Error, NormalizedRecord, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const JSON_VALUE_KEYS: &[&str] = &["value", "Value", "glucose", "Glucose"];
const JSON_TIME_KEYS: &[&str] = &["timestamp", "Timestamp", "date", "Date"];

const CSV_VALUE_HINTS: &[&str] = &["glucose", "value"];
const CSV_TIME_HINTS: &[&str] = &["timestamp", "date", "time"];

/// Zone-less layouts, read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Input file format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Json,
}

impl ImportFormat {
    /// `.csv` files are CSV; everything else is treated as JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ImportFormat::Csv,
            _ => ImportFormat::Json,
        }
    }
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportFormat::Csv => write!(f, "csv"),
            ImportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ImportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ImportFormat::Csv),
            "json" => Ok(ImportFormat::Json),
            other => Err(Error::Parse(format!("Unknown import format: {}", other))),
        }
    }
}

/// Parse a sensor export into records sorted ascending by timestamp
pub fn parse(raw: &str, format: ImportFormat) -> Result<Vec<NormalizedRecord>> {
    let mut records = match format {
        ImportFormat::Json => parse_json(raw)?,
        ImportFormat::Csv => parse_csv(raw)?,
    };

    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    tracing::debug!("Parsed {} {} records", records.len(), format);
    Ok(records)
}

fn parse_json(raw: &str) -> Result<Vec<NormalizedRecord>> {
    // Elements are decoded one at a time so a single undecodable element
    // (e.g. an out-of-range number) is skipped instead of failing the file
    let items: Vec<&RawValue> = serde_json::from_str(raw)
        .map_err(|e| Error::Parse(format!("Invalid JSON format: {}", e)))?;

    let mut records = Vec::with_capacity(items.len());
    for (idx, raw_item) in items.into_iter().enumerate() {
        let item: Value = match serde_json::from_str(raw_item.get()) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("Skipping JSON element {}: {}", idx, e);
                continue;
            }
        };
        let value = first_present(&item, JSON_VALUE_KEYS).and_then(json_number);
        let timestamp = first_present(&item, JSON_TIME_KEYS).and_then(json_instant);

        match (value, timestamp) {
            (Some(value), Some(timestamp)) => records.push(NormalizedRecord { timestamp, value }),
            _ => tracing::debug!("Skipping JSON element {}: missing or invalid fields", idx),
        }
    }
    Ok(records)
}

/// First alias whose value is present and non-null
fn first_present<'v>(item: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find(|v| !v.is_null())
}

fn json_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn json_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_instant(s),
        // Bare numbers are epoch milliseconds
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Result<Vec<NormalizedRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| Error::Parse(format!("Unreadable CSV header: {}", e)))?
        .iter()
        .map(|h| h.replace('"', "").trim().to_lowercase())
        .collect();

    let value_idx = find_column(&header, CSV_VALUE_HINTS);
    let time_idx = find_column(&header, CSV_TIME_HINTS);
    let (value_idx, time_idx) = match (value_idx, time_idx) {
        (Some(v), Some(t)) => (v, t),
        _ => {
            return Err(Error::Parse(
                "Could not identify \"Glucose\" and \"Timestamp/Date\" columns in CSV".into(),
            ))
        }
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("Skipping unreadable CSV row: {}", e);
                skipped += 1;
                continue;
            }
        };
        if row.iter().all(str::is_empty) {
            continue;
        }

        let value = row.get(value_idx).and_then(parse_number);
        let timestamp = row.get(time_idx).and_then(parse_instant);
        match (value, timestamp) {
            (Some(value), Some(timestamp)) => records.push(NormalizedRecord { timestamp, value }),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} CSV rows with missing or invalid cells", skipped);
    }
    Ok(records)
}

fn find_column(header: &[String], hints: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| hints.iter().any(|hint| h.contains(hint)))
}

fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the timestamp layouts seen in common CGM exports
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_json() {
        let json = r#"[
            {"timestamp": "2023-01-01T10:00:00Z", "value": 100},
            {"timestamp": "2023-01-01T10:05:00Z", "value": 105}
        ]"#;
        let records = parse(json, ImportFormat::Json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 100.0);
        assert_eq!(records[1].value, 105.0);
        assert_eq!(
            records[0].timestamp,
            Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_json_aliases_and_skips() {
        let json = r#"[
            {"Date": "2023-01-01T12:00:00Z", "Glucose": "130"},
            {"Timestamp": 1672574400000, "Value": 90},
            {"timestamp": "2023-01-01T11:00:00Z"},
            {"value": 100},
            {"timestamp": "not a date", "value": 100},
            {"timestamp": "2023-01-01T11:30:00Z", "value": "NaN"},
            {"timestamp": null, "date": "2023-01-01T11:45:00Z", "value": null, "glucose": 115},
            42
        ]"#;
        let records = parse(json, ImportFormat::Json).unwrap();
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        // 1672574400000 ms is 2023-01-01T12:00:00Z, tying with the Glucose row
        assert_eq!(values, vec![115.0, 130.0, 90.0]);
    }

    #[test]
    fn test_json_must_be_array() {
        let result = parse(r#"{"value": 100}"#, ImportFormat::Json);
        assert!(matches!(result, Err(Error::Parse(_))));

        let result = parse("[{broken", ImportFormat::Json);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_json_out_of_range_number_skips_element() {
        let json = r#"[
            {"timestamp": "2023-01-01T10:00:00Z", "value": 1e400},
            {"timestamp": "2023-01-01T10:05:00Z", "value": 105}
        ]"#;
        let records = parse(json, ImportFormat::Json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 105.0);
    }

    #[test]
    fn test_parse_csv() {
        let csv = "Date,Glucose\n2023-01-01T10:00:00Z,100\n2023-01-01T10:05:00Z,105";
        let records = parse(csv, ImportFormat::Csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 100.0);
        assert_eq!(records[1].value, 105.0);
    }

    #[test]
    fn test_alternative_csv_headers() {
        let csv = "Timestamp,Value (mg/dL)\n2023-01-01T10:00:00Z,100";
        let records = parse(csv, ImportFormat::Csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 100.0);
    }

    #[test]
    fn test_unrecognized_csv_header_fails() {
        let result = parse("Foo,Bar\n1,2", ImportFormat::Csv);
        assert!(matches!(result, Err(Error::Parse(_))));

        let result = parse("", ImportFormat::Csv);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_csv_skips_bad_rows_and_sorts() {
        let csv = "\"Device\",\"Glucose Value\",\"Time\"\r\n\
                   sensor,120,2023-01-01 10:10:00\r\n\
                   \r\n\
                   sensor,,2023-01-01 10:15:00\r\n\
                   sensor,abc,2023-01-01 10:20:00\r\n\
                   sensor,99\r\n\
                   sensor,110,01/01/2023 10:05\r\n\
                   sensor,101,yesterday\r\n";
        let records = parse(csv, ImportFormat::Csv).unwrap();
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![110.0, 120.0]);
    }

    #[test]
    fn test_csv_does_not_unquote_cells() {
        // Quoted cells are not unwrapped, so the value does not parse
        let csv = "Timestamp,Glucose\n2023-01-01T10:00:00Z,\"100\"";
        let records = parse(csv, ImportFormat::Csv).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_instant_layouts() {
        let expected = Utc.with_ymd_and_hms(2023, 3, 4, 5, 6, 0).unwrap();
        assert_eq!(parse_instant("2023-03-04T05:06:00Z"), Some(expected));
        assert_eq!(parse_instant("2023-03-04T06:06:00+01:00"), Some(expected));
        assert_eq!(parse_instant("2023-03-04 05:06:00"), Some(expected));
        assert_eq!(parse_instant("2023-03-04T05:06"), Some(expected));
        assert_eq!(parse_instant("03/04/2023 05:06"), Some(expected));
        assert_eq!(
            parse_instant("2023-03-04"),
            Some(Utc.with_ymd_and_hms(2023, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_instant("soon"), None);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ImportFormat::from_path(Path::new("export.CSV")), ImportFormat::Csv);
        assert_eq!(ImportFormat::from_path(Path::new("export.json")), ImportFormat::Json);
        assert_eq!(ImportFormat::from_path(Path::new("export")), ImportFormat::Json);
        assert_eq!("csv".parse::<ImportFormat>().unwrap(), ImportFormat::Csv);
        assert!("xml".parse::<ImportFormat>().is_err());
    }
}
