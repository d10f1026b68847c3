use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ArchiveCfg {
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub pusher: PusherCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub health: HealthCfg,
    #[serde(default)]
    pub ingest: IngestCfg,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HttpCfg {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}
impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct PusherCfg {
    /// Application key of the Pusher app Travis publishes on.
    pub key: String,
    pub host: String,
    pub secure: bool,
    /// Idle time before we ping the server; replaced by the server's value
    /// once the connection is established.
    pub activity_timeout_secs: u64,
    pub pong_timeout_secs: u64,
}
impl Default for PusherCfg {
    fn default() -> Self {
        Self {
            key: String::new(),
            host: "ws.pusherapp.com".into(),
            secure: true,
            activity_timeout_secs: 120,
            pong_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct StoreCfg {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub time_precision: String,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
    pub retry: RetryCfg,
}
impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            host: "localhost".into(),
            port: 8086,
            username: "root".into(),
            password: "root".into(),
            database: "travis".into(),
            time_precision: "s".into(),
            timeout_ms: 5000,
            queue_capacity: 10000,
            retry: RetryCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct RetryCfg {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}
impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HealthCfg {
    pub require_subscription: bool,
    pub require_store: bool,
    pub probe_interval_ms: Option<u64>,
    /// How long /readyz reports 503 before intake stops on shutdown.
    pub drain_grace_ms: u64,
}
impl Default for HealthCfg {
    fn default() -> Self {
        Self {
            require_subscription: false,
            require_store: false,
            probe_interval_ms: Some(5000),
            drain_grace_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IngestCfg {
    /// Events buffered between the subscription and the pipeline.
    pub queue_capacity: usize,
}
impl Default for IngestCfg {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// Values given on the command line; they win over every other layer.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub http_bind: Option<SocketAddr>,
    pub pusher_key: Option<String>,
}

/// Environment variables the first deployments were configured with.
const LEGACY_ENV: [(&str, &str); 5] = [
    ("PUSHER_TOKEN", "pusher.key"),
    ("DB_HOST", "store.host"),
    ("DB_PORT", "store.port"),
    ("DB_USERNAME", "store.username"),
    ("DB_PASSWORD", "store.password"),
];

fn default_bind() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080)
}

impl ArchiveCfg {
    pub fn load(path: Option<String>) -> anyhow::Result<Self> {
        Self::load_with(path, &CliOverrides::default())
    }

    pub fn load_with(path: Option<String>, overrides: &CliOverrides) -> anyhow::Result<Self> {
        Self::from_builder(build_config(path, overrides)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.pusher.key.is_empty(), "pusher.key cannot be empty");
        anyhow::ensure!(!self.pusher.host.is_empty(), "pusher.host cannot be empty");
        anyhow::ensure!(!self.store.host.is_empty(), "store.host cannot be empty");
        anyhow::ensure!(!self.store.database.is_empty(), "store.database cannot be empty");
        anyhow::ensure!(
            self.store.queue_capacity > 0,
            "store.queue_capacity must be positive"
        );
        anyhow::ensure!(
            self.ingest.queue_capacity > 0,
            "ingest.queue_capacity must be positive"
        );
        anyhow::ensure!(
            self.pusher.activity_timeout_secs > 0 && self.pusher.pong_timeout_secs > 0,
            "pusher timeouts must be positive"
        );
        Ok(())
    }

    fn from_builder(cfg: config::Config) -> anyhow::Result<Self> {
        Ok(cfg.try_deserialize()?)
    }
}

fn build_config(path: Option<String>, overrides: &CliOverrides) -> anyhow::Result<config::Config> {
    use config::{Config, Environment, File};
    let mut builder = Config::builder();
    for (var, key) in LEGACY_ENV {
        if let Ok(value) = std::env::var(var) {
            builder = builder.set_default(key, value)?;
        }
    }
    builder = builder.add_source(File::with_name("archive").required(false));
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(&path));
    }
    builder = builder
        .add_source(Environment::with_prefix("ARCHIVE").separator("__"))
        .set_override_option("http.bind", overrides.http_bind.map(|b| b.to_string()))?
        .set_override_option("pusher.key", overrides.pusher_key.clone())?;
    Ok(builder.build()?)
}
