use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name and help are valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
}

pub static EVENTS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archive_events_received_total",
        "Build events received from the subscription",
    )
});

pub static EVENTS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    let dropped = IntCounterVec::new(
        Opts::new(
            "archive_events_dropped_total",
            "Build events dropped, or series writes not accepted, by reason",
        ),
        &["reason"],
    )
    .expect("metric name and help are valid");
    REGISTRY
        .register(Box::new(dropped.clone()))
        .expect("metric registered once");
    dropped
});

pub static POINTS_ENQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archive_points_enqueued_total",
        "Points accepted by the write queue",
    )
});

pub static POINTS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archive_points_written_total",
        "Points written to the time-series store",
    )
});

pub static POINTS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archive_points_failed_total",
        "Points lost after the store rejected them or retries ran out",
    )
});

pub static STORE_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archive_store_retries_total",
        "Retried point writes",
    )
});

pub static SUBSCRIPTION_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "archive_subscription_reconnects_total",
        "Reconnects of the Pusher subscription",
    )
});

pub fn ingest_dropped(reason: &str) {
    EVENTS_DROPPED.with_label_values(&[reason]).inc();
}

/// Renders the archive registry in the Prometheus text format.
pub fn render() -> String {
    // touch every metric so the exposition is complete from the first scrape
    Lazy::force(&EVENTS_RECEIVED);
    Lazy::force(&EVENTS_DROPPED);
    Lazy::force(&POINTS_ENQUEUED);
    Lazy::force(&POINTS_WRITTEN);
    Lazy::force(&POINTS_FAILED);
    Lazy::force(&STORE_RETRIES);
    Lazy::force(&SUBSCRIPTION_RECONNECTS);

    TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_archive_counters() {
        EVENTS_RECEIVED.inc();
        ingest_dropped("parse");
        let text = render();
        assert!(text.contains("archive_events_received_total"));
        assert!(text.contains("archive_events_dropped_total{reason=\"parse\"}"));
    }
}
