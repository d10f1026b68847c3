//! travis-archive daemon.
//!
//! ```bash
//! # Legacy environment configuration
//! PUSHER_TOKEN=5df8ac576dcccf4fd076 DB_HOST=influx DB_PORT=8086 \
//!     DB_USERNAME=root DB_PASSWORD=root travis-archive
//!
//! # Config file plus overrides
//! travis-archive --config /etc/travis-archive.toml --http-bind 127.0.0.1:9000
//! ```
//!
//! On SIGINT/SIGTERM `/readyz` flips to 503, intake stops after
//! `health.drain_grace_ms`, and queued events and points are flushed.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use travis_archive::app::AppState;
use travis_archive::config::{ArchiveCfg, CliOverrides};
use travis_archive::dispatcher::Dispatcher;
use travis_archive::http;
use travis_archive::influx::InfluxClient;
use travis_archive::ingest::IngestionPipeline;
use travis_archive::pusher::SubscriptionClient;
use travis_archive::queue::QueuedWriter;
use travis_archive::readiness::{Readiness, start_readiness_probes};
use travis_archive::retry::RetryPolicy;
use travis_archive::sink::PointStore;

/// Upper bound on flushing queued points at shutdown.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "travis-archive")]
#[command(about = "Archive Travis CI build notifications into InfluxDB")]
#[command(version)]
struct Args {
    /// Extra config file (TOML), applied over ./archive.toml
    #[arg(long)]
    config: Option<String>,

    /// HTTP bind address for health and metrics
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    /// Pusher application key
    #[arg(long)]
    pusher_key: Option<String>,

    /// Print the resolved HTTP bind address and exit
    #[arg(long)]
    print_bind: bool,

    /// Print the resolved configuration (without secrets) and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,travis_archive=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let overrides = CliOverrides {
        http_bind: args.http_bind,
        pusher_key: args.pusher_key.clone(),
    };
    let cfg = ArchiveCfg::load_with(args.config.clone(), &overrides)
        .context("failed to load configuration")?;

    if args.print_bind {
        println!("{}", cfg.http.bind);
        return Ok(());
    }
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    cfg.validate().context("invalid configuration")?;
    run(cfg).await
}

async fn run(cfg: ArchiveCfg) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let ready = Arc::new(Readiness::new());

    tracing::info!(
        pusher = %cfg.pusher.host,
        store = %format!("{}:{}", cfg.store.host, cfg.store.port),
        database = %cfg.store.database,
        "travis-archive starting"
    );

    let store: Arc<dyn PointStore> =
        Arc::new(InfluxClient::new(&cfg.store).context("failed to build InfluxDB client")?);
    let (writer, writer_handle) = QueuedWriter::spawn(
        store.clone(),
        RetryPolicy::from(&cfg.store.retry),
        cfg.store.queue_capacity,
    );
    let pipeline = Arc::new(IngestionPipeline::new(Arc::new(writer)));

    let (tx, rx) = mpsc::channel(cfg.ingest.queue_capacity);
    let dispatcher = tokio::spawn(Dispatcher::new(rx, pipeline).run());
    let probe = start_readiness_probes(&cfg.health, ready.clone(), store);

    let listener = TcpListener::bind(cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    let state = AppState {
        cfg: cfg.clone(),
        ready: ready.clone(),
    };
    let (http_stop, http_stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(http::serve(listener, state, async move {
        let _ = http_stopped.await;
    }));

    let mut subscription =
        tokio::spawn(SubscriptionClient::new(cfg.pusher.clone(), tx, ready.clone()).run());

    let mut failure = None;
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining");
            ready.start_draining();
            tokio::time::sleep(Duration::from_millis(cfg.health.drain_grace_ms)).await;
            subscription.abort();
            let _ = subscription.await;
        }
        res = &mut subscription => {
            ready.start_draining();
            match res {
                Ok(Ok(())) => tracing::info!("subscription finished"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "subscription stopped");
                    failure = Some(anyhow::Error::new(e).context("pusher subscription failed"));
                }
                Err(e) => failure = Some(anyhow::Error::new(e).context("subscription task panicked")),
            }
        }
    }

    // the subscription owned the only event sender, so the dispatcher now drains
    let dispatched = dispatcher.await.unwrap_or_default();
    let written = match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_handle).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "writer task failed");
            Default::default()
        }
        Err(_) => {
            tracing::warn!("gave up waiting for queued points");
            Default::default()
        }
    };

    if let Some(probe) = probe {
        probe.abort();
    }
    let _ = http_stop.send(());
    if let Ok(Err(e)) = server.await {
        tracing::warn!(error = %e, "http server error");
    }

    tracing::info!(
        events = dispatched.handled,
        events_written = dispatched.written,
        events_dropped = dispatched.dropped,
        points_written = written.written,
        points_failed = written.failed,
        store_retries = written.retries,
        "shutdown complete"
    );

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
