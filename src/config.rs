use std::net::SocketAddr;

use serde::Deserialize;
use url::Url;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MetricConfig {
    PrometheusPush(PrometheusConfig),
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusConfig {
    /// The URL of the Prometheus push gateway.
    pub url: String,
}

/// Connection details for the moderation provider.
#[derive(Deserialize, Debug, Clone)]
pub struct ProviderConfig {
    /// Base address of the provider API. Request paths are joined onto it.
    pub endpoint: Url,
    /// Bearer token presented on every provider request.
    #[serde(default)]
    pub token: String,
    /// URL the provider posts flagged items back to.
    pub callback: String,
    /// Bucket the provider saves captured frames into.
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Public base address that replaces the bucket name in stored locators.
    pub public_addr: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    10
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub listen_address: Option<SocketAddr>,
    /// Primary database. All writes land here.
    pub db: String,
    /// Read replica used by the review queries. Falls back to `db`.
    pub db_replica: Option<String>,
    pub provider: ProviderConfig,
    pub metrics: Option<MetricConfig>,
}
