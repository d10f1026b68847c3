use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::domain::{BuildEvent, Record, Scalar, SeriesName};
use crate::error::{IngestError, SchemaError};
use crate::ingest::decode::decode_field;

/// Sub-objects in merge order; later ones win on key collisions.
pub const SECTIONS: [&str; 3] = ["build", "commit", "repository"];

/// Builds the record for one event.
///
/// `now` is the epoch second used when the build has no start or finish
/// time yet.
pub fn build_point(
    event: BuildEvent,
    payload: &Map<String, Value>,
    now: i64,
) -> Result<(SeriesName, Record), IngestError> {
    let mut fields: BTreeMap<String, Scalar> = BTreeMap::new();
    for section in SECTIONS {
        fields.extend(decode_field(section, payload)?);
    }

    let name = match fields.get("repository_slug") {
        None | Some(Scalar::Null) => return Err(SchemaError::MissingSlug.into()),
        Some(Scalar::Str(slug)) => SeriesName::from_slug(slug).ok_or(SchemaError::EmptySlug)?,
        Some(_) => return Err(SchemaError::SlugNotString.into()),
    };

    let started_at = present(&fields, "build_started_at");
    let finished_at = present(&fields, "build_finished_at");

    let time = started_at.clone().unwrap_or(Scalar::Int(now));
    let sequence_number = finished_at.or(started_at).unwrap_or(Scalar::Int(now));

    fields.insert("name".into(), name.as_str().into());
    fields.insert("time".into(), time);
    fields.insert("sequence_number".into(), sequence_number);
    fields.insert("event".into(), event.as_str().into());

    Ok((name, Record::from_fields(fields)))
}

fn present(fields: &BTreeMap<String, Scalar>, key: &str) -> Option<Scalar> {
    fields.get(key).filter(|v| !v.is_null()).cloned()
}
