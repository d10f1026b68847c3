//! Flattening of one payload sub-object into prefixed fields.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::domain::Scalar;
use crate::error::{IngestError, SchemaError};

/// Flattens `payload[name]` into `{name}_{key}` fields.
///
/// Keys ending in `_at` hold timestamps; non-null values are replaced by
/// their Unix epoch seconds. A value that cannot be read as a timestamp is
/// an error, never a silent zero.
pub fn decode_field(
    name: &'static str,
    payload: &Map<String, Value>,
) -> Result<BTreeMap<String, Scalar>, IngestError> {
    let section = payload
        .get(name)
        .ok_or(SchemaError::MissingSection(name))?;
    let object = section.as_object().ok_or(SchemaError::NotAnObject(name))?;

    object
        .iter()
        .map(|(key, value)| {
            let field = format!("{name}_{key}");
            let scalar = if key.ends_with("_at") {
                decode_timestamp(&field, value)?
            } else {
                Scalar::from(value.clone())
            };
            Ok((field, scalar))
        })
        .collect()
}

fn decode_timestamp(field: &str, value: &Value) -> Result<Scalar, IngestError> {
    match value {
        Value::Null => Ok(Scalar::Null),
        Value::String(raw) => parse_timestamp(raw)
            .map(Scalar::Int)
            .ok_or_else(|| IngestError::Timestamp {
                field: field.to_string(),
                value: raw.clone(),
            }),
        other => Err(IngestError::Timestamp {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

type Format = &'static [BorrowedFormatItem<'static>];

/// Numeric offsets without a colon, as `Time#to_s` writes them.
const OFFSET_FORMATS: [Format; 2] = [
    format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    ),
];

const NAIVE_FORMATS: [Format; 4] = [
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
];

/// Parses the timestamp forms Travis emits into epoch seconds.
///
/// Offset-less forms, and those marked only `Z` or ` UTC`, are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();

    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts.unix_timestamp());
    }
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc2822) {
        return Some(ts.unix_timestamp());
    }
    if let Some(ts) = OFFSET_FORMATS
        .iter()
        .find_map(|format| OffsetDateTime::parse(raw, *format).ok())
    {
        return Some(ts.unix_timestamp());
    }

    let naive = [" UTC", "Z", "z"]
        .iter()
        .find_map(|suffix| raw.strip_suffix(suffix))
        .unwrap_or(raw);
    NAIVE_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(naive, *format).ok())
        .map(|dt| dt.assume_utc().unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn payload(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn prefixes_every_key_with_section_name() {
        let p = payload(json!({"commit": {"sha": "abc", "branch": "main", "id": 9}}));
        let fields = decode_field("commit", &p).unwrap();

        assert_eq!(fields.len(), 3);
        assert_eq!(fields["commit_sha"], Scalar::Str("abc".into()));
        assert_eq!(fields["commit_branch"], Scalar::Str("main".into()));
        assert_eq!(fields["commit_id"], Scalar::Int(9));
    }

    #[test]
    fn converts_at_fields_to_epoch_seconds() {
        let p = payload(json!({"build": {
            "started_at": "2024-01-01T00:00:00Z",
            "finished_at": "2024-01-01T01:30:00+01:00",
            "state": "started"
        }}));
        let fields = decode_field("build", &p).unwrap();

        assert_eq!(fields["build_started_at"], Scalar::Int(1704067200));
        assert_eq!(fields["build_finished_at"], Scalar::Int(1704069000));
        assert_eq!(fields["build_state"], Scalar::Str("started".into()));
    }

    #[test]
    fn epoch_seconds_match_formatted_timestamp() {
        let when = datetime!(2013-05-14 18:22:07 UTC);
        let text = when.format(&Rfc3339).unwrap();
        let p = payload(json!({"build": {"finished_at": text}}));

        let fields = decode_field("build", &p).unwrap();
        assert_eq!(
            fields["build_finished_at"],
            Scalar::Int(when.unix_timestamp())
        );
    }

    #[test]
    fn null_timestamps_pass_through() {
        let p = payload(json!({"build": {"finished_at": null}}));
        let fields = decode_field("build", &p).unwrap();
        assert_eq!(fields["build_finished_at"], Scalar::Null);
    }

    #[test]
    fn malformed_timestamp_is_an_error() {
        let p = payload(json!({"build": {"started_at": "yesterday-ish"}}));
        let err = decode_field("build", &p).unwrap_err();
        match err {
            IngestError::Timestamp { field, value } => {
                assert_eq!(field, "build_started_at");
                assert_eq!(value, "yesterday-ish");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn numeric_timestamp_is_an_error() {
        let p = payload(json!({"build": {"started_at": 1704067200}}));
        let err = decode_field("build", &p).unwrap_err();
        assert_eq!(err.kind(), "timestamp");
    }

    #[test]
    fn missing_section_is_a_schema_error() {
        let p = payload(json!({"build": {}}));
        let err = decode_field("repository", &p).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Schema(SchemaError::MissingSection("repository"))
        ));
    }

    #[test]
    fn non_object_section_is_a_schema_error() {
        let p = payload(json!({"commit": "abc"}));
        let err = decode_field("commit", &p).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Schema(SchemaError::NotAnObject("commit"))
        ));
    }

    #[test]
    fn empty_section_decodes_to_nothing() {
        let p = payload(json!({"commit": {}}));
        assert!(decode_field("commit", &p).unwrap().is_empty());
    }

    #[test]
    fn accepts_the_other_timestamp_forms() {
        assert_eq!(parse_timestamp("2024-01-01T00:00:00.750Z"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01T00:00:00"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00 UTC"), Some(1704067200));
        assert_eq!(
            parse_timestamp("Mon, 01 Jan 2024 00:00:00 +0000"),
            Some(1704067200)
        );
        assert_eq!(parse_timestamp("2024-01-01T00:00:00+0000"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01T01:00:00+0100"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00 +0000"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00 -0000"), Some(1704067200));
        assert_eq!(parse_timestamp("2023-12-31 19:00:00 -0500"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01T00:00Z"), Some(1704067200));
        assert_eq!(parse_timestamp("2024-01-01 00:00"), Some(1704067200));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
