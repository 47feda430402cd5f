//! Pulls report lists from a caller-supplied external API.

use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{ingest::RawRow, serve::APP_USER_AGENT};

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection failure, timeout, bad URL or a non-2xx response.
    #[error("Failed to connect to external API: {0}")]
    Unreachable(reqwest::Error),
    /// The response body is not shaped like `{"reports": [...]}`.
    #[error("Invalid data format from external API: {0}")]
    InvalidFormat(String),
}

/// Outbound client for external report feeds.
#[derive(Clone, Debug)]
pub struct ExternalFetcher {
    client: reqwest::Client,
}

impl ExternalFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build requester client")?;
        Ok(Self { client })
    }

    /// GET `endpoint` with a bearer token and return the rows of its `reports`
    /// array. Not retried.
    #[tracing::instrument(skip(self, token))]
    pub async fn fetch(&self, endpoint: &str, token: &str) -> Result<Vec<RawRow>, FetchError> {
        let body = self
            .client
            .get(endpoint)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(FetchError::Unreachable)?
            .bytes()
            .await
            .map_err(FetchError::Unreachable)?;

        debug!(bytes = body.len(), "received external reports");
        parse_payload(&body)
    }
}

/// Extract the `reports` array. A missing array means no reports.
fn parse_payload(body: &[u8]) -> Result<Vec<RawRow>, FetchError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| FetchError::InvalidFormat(e.to_string()))?;

    let Value::Object(mut payload) = payload else {
        return Err(FetchError::InvalidFormat(
            "expected a JSON object".to_owned(),
        ));
    };

    match payload.remove("reports") {
        None => Ok(Vec::new()),
        Some(Value::Array(rows)) => Ok(rows.into_iter().map(RawRow::from).collect()),
        Some(_) => Err(FetchError::InvalidFormat(
            "`reports` is not an array".to_owned(),
        )),
    }
}
