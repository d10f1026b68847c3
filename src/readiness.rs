use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::HealthCfg;
use crate::sink::PointStore;

pub struct Readiness {
    pub subscription_ok: AtomicBool,
    pub store_ok: AtomicBool,
    pub draining: AtomicBool,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        Self {
            subscription_ok: AtomicBool::new(false),
            store_ok: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    pub fn all_ok(&self) -> bool {
        self.subscription_ok.load(Ordering::Relaxed) && self.store_ok.load(Ordering::Relaxed)
    }

    /// Ready unless draining or a required dependency is down.
    pub fn is_ready(&self, health: &HealthCfg) -> bool {
        if self.draining.load(Ordering::Relaxed) {
            return false;
        }
        let sub = !health.require_subscription || self.subscription_ok.load(Ordering::Relaxed);
        let store = !health.require_store || self.store_ok.load(Ordering::Relaxed);
        sub && store
    }

    pub fn set_subscription(&self, ok: bool) {
        self.subscription_ok.store(ok, Ordering::Relaxed);
    }

    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }
}

pub fn start_readiness_probes(
    health: &HealthCfg,
    ready: Arc<Readiness>,
    store: Arc<dyn PointStore>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = Duration::from_millis(health.probe_interval_ms?);

    // store probe
    Some(tokio::spawn(async move {
        loop {
            let ok = matches!(tokio::time::timeout(interval, store.ping()).await, Ok(true));
            let was = ready.store_ok.swap(ok, Ordering::Relaxed);
            if was != ok {
                tracing::info!(store_ok = ok, "store readiness changed");
            }
            tokio::time::sleep(interval).await;
        }
    }))
}
