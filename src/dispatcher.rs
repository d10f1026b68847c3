use std::sync::Arc;

use crate::domain::RawEvent;
use crate::ingest::{IngestionPipeline, Outcome};

pub struct Dispatcher {
    rx: tokio::sync::mpsc::Receiver<RawEvent>,
    pipeline: Arc<IngestionPipeline>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: u64,
    pub written: u64,
    pub dropped: u64,
}

impl Dispatcher {
    pub fn new(rx: tokio::sync::mpsc::Receiver<RawEvent>, pipeline: Arc<IngestionPipeline>) -> Self {
        Self { rx, pipeline }
    }

    /// Handles events one at a time, in delivery order, until every sender is gone.
    pub async fn run(mut self) -> DispatchStats {
        let mut stats = DispatchStats::default();
        while let Some(ev) = self.rx.recv().await {
            stats.handled += 1;
            match self.pipeline.handle(&ev) {
                Outcome::Written { .. } => stats.written += 1,
                Outcome::Dropped(_) => stats.dropped += 1,
            }
        }
        stats
    }
}
