use std::net::SocketAddr;

use serde::Deserialize;
use url::Url;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub listen_address: Option<SocketAddr>,
    /// SQLite connection URL for the report database.
    #[serde(default = "default_db")]
    pub db: String,
    /// Maximum accepted request body size, in bytes. Bounds CSV uploads.
    #[serde(default = "default_upload_limit")]
    pub upload_limit: usize,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub metrics: Option<MetricConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub commit: CommitMode,
}

/// When the rows of a single import become durable.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// One transaction per import, committed after the last row. A store failure
    /// partway through discards every row of that import.
    #[default]
    Batch,
    /// Each row commits as soon as it is inserted. A store failure keeps the rows
    /// written before it.
    PerRow,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    /// Upper bound on a single external report fetch.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricConfig {
    PrometheusPush(PrometheusConfig),
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusConfig {
    /// The push gateway endpoint.
    pub url: Url,
}

fn default_db() -> String {
    "sqlite://data/reports.db".to_owned()
}

const fn default_upload_limit() -> usize {
    10 * 1024 * 1024
}

const fn default_timeout_secs() -> u64 {
    30
}
