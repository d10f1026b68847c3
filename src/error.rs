use thiserror::Error;

use crate::sink::StoreError;

/// Why a single event was dropped or only partially stored.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("payload is not a JSON object: {0}")]
    Parse(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("unparseable timestamp in {field}: {value}")]
    Timestamp { field: String, value: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl IngestError {
    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Parse(_) => "parse",
            IngestError::Schema(_) => "schema",
            IngestError::Timestamp { .. } => "timestamp",
            IngestError::Storage(_) => "storage",
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Parse(e.to_string())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing `{0}` object")]
    MissingSection(&'static str),
    #[error("`{0}` is not an object")]
    NotAnObject(&'static str),
    #[error("missing repository_slug")]
    MissingSlug,
    #[error("repository_slug is not a string")]
    SlugNotString,
    #[error("repository_slug is empty")]
    EmptySlug,
}
