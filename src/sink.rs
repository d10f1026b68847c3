use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::Record;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Time-series backend that points are eventually written to.
#[async_trait]
pub trait PointStore: Send + Sync {
    async fn write_point(&self, series: &str, record: &Record) -> Result<(), StoreError>;

    /// Whether the backend currently answers.
    async fn ping(&self) -> bool;
}

/// Non-blocking write contract used by the ingestion pipeline.
pub trait PointSink: Send + Sync {
    fn write_point(&self, series: &str, record: Arc<Record>) -> Result<(), StoreError>;
}
