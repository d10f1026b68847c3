//! Travis CI build archive.
//!
//! Subscribes to the public Travis Pusher channel and stores every build
//! lifecycle notification as a flat point in InfluxDB, once in a series named
//! after the repository and once in the `all` series.
//!
//! ```text
//! SubscriptionClient ──mpsc──▶ Dispatcher ──▶ IngestionPipeline ──▶ Fanout
//!                                                                     │
//!                                      InfluxClient ◀── worker ◀── QueuedWriter
//! ```

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod http;
pub mod influx;
pub mod ingest;
pub mod metrics;
pub mod pusher;
pub mod queue;
pub mod readiness;
pub mod retry;
pub mod sink;

pub use error::{IngestError, SchemaError};
