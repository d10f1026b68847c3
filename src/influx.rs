//! InfluxDB 0.8 series writer.
//!
//! Points are posted to `/db/{database}/series` as
//! `[{"name": ..., "columns": [...], "points": [[...]]}]`, columns in key order.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

use crate::config::StoreCfg;
use crate::domain::{Record, Scalar};
use crate::sink::{PointStore, StoreError};

pub struct InfluxClient {
    http: Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
    time_precision: String,
}

#[derive(Serialize)]
struct SeriesBody<'a> {
    name: &'a str,
    columns: Vec<&'a str>,
    points: [Vec<&'a Scalar>; 1],
}

impl InfluxClient {
    pub fn new(cfg: &StoreCfg) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        let base_url = format!("{}://{}:{}", cfg.scheme, cfg.host, cfg.port);

        tracing::info!(
            url = %base_url,
            database = %cfg.database,
            "InfluxDB client initialized"
        );

        Ok(Self {
            http,
            base_url,
            database: cfg.database.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            time_precision: cfg.time_precision.clone(),
        })
    }

    fn series_url(&self) -> String {
        format!("{}/db/{}/series", self.base_url, self.database)
    }
}

#[async_trait]
impl PointStore for InfluxClient {
    async fn write_point(&self, series: &str, record: &Record) -> Result<(), StoreError> {
        let (columns, values): (Vec<&str>, Vec<&Scalar>) = record.iter().unzip();
        let body = [SeriesBody {
            name: series,
            columns,
            points: [values],
        }];

        let resp = self
            .http
            .post(self.series_url())
            .query(&[
                ("u", self.username.as_str()),
                ("p", self.password.as_str()),
                ("time_precision", self.time_precision.as_str()),
            ])
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.without_url().to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(classify_status(status, detail.trim()))
    }

    async fn ping(&self) -> bool {
        match self.http.get(format!("{}/ping", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

fn classify_status(status: StatusCode, detail: &str) -> StoreError {
    let msg = if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StoreError::Transient(msg)
    } else {
        StoreError::Fatal(msg)
    }
}
