//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const REPORTS_CREATED: &str = "abusewatch.reports.created"; // Counter.
pub const REPORTS_UPDATED: &str = "abusewatch.reports.updated"; // Counter.

pub const INGEST_ROWS_REJECTED: &str = "abusewatch.ingest.rows_rejected"; // Counter.
pub const UPSTREAM_FAILURES: &str = "abusewatch.upstream.failures"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(REPORTS_CREATED, "The count of stored reports.");
    describe_counter!(
        REPORTS_UPDATED,
        "The count of status updates applied to reports."
    );

    describe_counter!(
        INGEST_ROWS_REJECTED,
        "Rows refused during batch or external imports."
    );
    describe_counter!(
        UPSTREAM_FAILURES,
        "External report fetches that failed or returned malformed data."
    );

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
