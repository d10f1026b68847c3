use std::sync::Arc;

use crate::domain::Record;
use crate::sink::{PointSink, StoreError};

/// Writes one record to several series, each attempt independent of the others.
pub struct Fanout {
    sink: Arc<dyn PointSink>,
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub accepted: usize,
    pub failures: Vec<(String, StoreError)>,
}

impl FanoutReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Fanout {
    pub fn new(sink: Arc<dyn PointSink>) -> Self {
        Self { sink }
    }

    pub fn write(&self, targets: &[&str], record: &Arc<Record>) -> FanoutReport {
        let mut report = FanoutReport::default();
        for series in targets {
            match self.sink.write_point(series, Arc::clone(record)) {
                Ok(()) => report.accepted += 1,
                Err(e) => report.failures.push((series.to_string(), e)),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Rejects writes to one series, accepts the rest.
    struct PickySink {
        reject: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl PointSink for PickySink {
        fn write_point(&self, series: &str, _record: Arc<Record>) -> Result<(), StoreError> {
            self.seen.lock().unwrap().push(series.to_string());
            if series == self.reject {
                Err(StoreError::Transient("queue full".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn failed_target_does_not_stop_the_next() {
        let sink = Arc::new(PickySink {
            reject: "foo.bar",
            seen: Mutex::new(Vec::new()),
        });
        let fanout = Fanout::new(sink.clone());

        let report = fanout.write(&["foo.bar", "all"], &Arc::new(Record::default()));

        assert_eq!(report.accepted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "foo.bar");
        assert!(!report.is_complete());
        assert_eq!(*sink.seen.lock().unwrap(), vec!["foo.bar", "all"]);
    }
}
