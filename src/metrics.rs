//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const JOBS_STARTED: &str = "livecensor.jobs.started"; // Counter.
pub const JOBS_START_FAILED: &str = "livecensor.jobs.start_failed"; // Counter.
pub const JOBS_STOPPED: &str = "livecensor.jobs.stopped"; // Counter.
pub const JOBS_COMPENSATED: &str = "livecensor.jobs.compensated"; // Counter.

pub const ITEMS_INGESTED: &str = "livecensor.items.ingested"; // Counter.
pub const ITEMS_REVIEWED: &str = "livecensor.items.reviewed"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(JOBS_STARTED, "Moderation jobs created on the provider.");
    describe_counter!(
        JOBS_START_FAILED,
        "Moderation jobs the provider refused or failed to create."
    );
    describe_counter!(JOBS_STOPPED, "Moderation jobs closed after their stream ended.");
    describe_counter!(
        JOBS_COMPENSATED,
        "Provider jobs closed again because their mapping could not be stored."
    );

    describe_counter!(ITEMS_INGESTED, "Flagged samples stored for manual review.");
    describe_counter!(ITEMS_REVIEWED, "Review items updated by a reviewer.");

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
