use serde_json::{Map, Value};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::domain::{ALL_SERIES, RawEvent, Record, SeriesName};
use crate::error::IngestError;
use crate::fanout::Fanout;
use crate::ingest::point::build_point;
use crate::metrics;
use crate::sink::{PointSink, StoreError};

/// Result of handling one event. Never escapes as an error.
#[derive(Debug)]
pub enum Outcome {
    /// Record built; `failures` lists the series whose write was not accepted.
    Written {
        series: SeriesName,
        record: Arc<Record>,
        failures: Vec<(String, StoreError)>,
    },
    /// Event dropped before any write was attempted.
    Dropped(IngestError),
}

impl Outcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Outcome::Written { .. })
    }
}

/// Per-event handler: parse, build, log, write to the repository series and `all`.
pub struct IngestionPipeline {
    fanout: Fanout,
}

impl IngestionPipeline {
    pub fn new(sink: Arc<dyn PointSink>) -> Self {
        Self {
            fanout: Fanout::new(sink),
        }
    }

    pub fn handle(&self, raw: &RawEvent) -> Outcome {
        metrics::EVENTS_RECEIVED.inc();

        let (series, record) = match prepare(raw) {
            Ok(point) => point,
            Err(e) => {
                tracing::error!(
                    event = %raw.event,
                    reason = e.kind(),
                    error = %e,
                    "dropping event"
                );
                metrics::ingest_dropped(e.kind());
                return Outcome::Dropped(e);
            }
        };

        tracing::info!(event = %raw.event, series = %series, "{record}");

        let record = Arc::new(record);
        let report = self
            .fanout
            .write(&[series.as_str(), ALL_SERIES], &record);

        for (target, e) in &report.failures {
            let e = IngestError::from(e.clone());
            tracing::error!(
                event = %raw.event,
                series = %target,
                reason = e.kind(),
                error = %e,
                "point not written"
            );
            metrics::ingest_dropped(e.kind());
        }

        Outcome::Written {
            series,
            record,
            failures: report.failures,
        }
    }
}

fn prepare(raw: &RawEvent) -> Result<(SeriesName, Record), IngestError> {
    let payload: Map<String, Value> = match serde_json::from_str(&raw.payload)? {
        Value::Object(map) => map,
        other => {
            return Err(IngestError::Parse(format!(
                "expected an object, found {}",
                kind_of(&other)
            )));
        }
    };
    let now = OffsetDateTime::now_utc().unix_timestamp();
    build_point(raw.event, &payload, now)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
