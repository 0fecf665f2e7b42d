//! Configuration for the cost exporter

use core_config::{ConfigError, env_list_or, env_or_default, env_parse_or};

/// Default per-collector scrape timeout.
const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    /// Enabled cloud providers (aws, azure, gcp)
    pub providers: Vec<String>,
    pub server: ServerConfig,
    /// Per-collector timeout within one scrape, seconds
    pub scrape_timeout_secs: u64,
    pub aws: AwsConfig,
    pub azure: AzureConfig,
    pub gcp: GcpConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:8080"
    pub listen_address: String,
    /// Path serving the metric snapshot
    pub metrics_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    /// Named credentials profile; the ambient chain when unset
    pub profile: Option<String>,
    /// Region for Cost Explorer API calls
    pub region: String,
    /// Enabled AWS services (s3)
    pub services: Vec<String>,
    /// Cost Explorer refresh cadence, seconds
    pub s3_refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AzureConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: Option<String>,
    /// Enabled Azure services (aks)
    pub services: Vec<String>,
    /// Machine inventory refresh cadence, seconds
    pub machine_refresh_interval_secs: u64,
    /// Retail price index refresh cadence, seconds
    pub price_refresh_interval_secs: u64,
    /// Disk inventory refresh cadence, seconds
    pub disk_refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GcpConfig {
    /// Projects to inventory
    pub projects: Vec<String>,
    /// Billing catalog API key
    pub api_key: Option<String>,
    /// Static bearer token; the metadata server when unset
    pub access_token: Option<String>,
    /// Enabled GCP services (gke, gcs)
    pub services: Vec<String>,
    /// Discount applied to catalog list prices, 0..1
    pub default_discount: f64,
    /// Catalog refresh cadence, seconds
    pub pricing_refresh_interval_secs: u64,
    /// Inventory refresh cadence, seconds
    pub inventory_refresh_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            providers: env_list_or("COST_EXPORTER_PROVIDERS", &[]),
            server: ServerConfig {
                listen_address: env_or_default("COST_EXPORTER_LISTEN_ADDRESS", "0.0.0.0:8080"),
                metrics_path: env_or_default("COST_EXPORTER_METRICS_PATH", "/metrics"),
            },
            scrape_timeout_secs: env_parse_or(
                "COST_EXPORTER_SCRAPE_TIMEOUT_SECS",
                DEFAULT_SCRAPE_TIMEOUT_SECS,
            )?,
            aws: AwsConfig {
                profile: std::env::var("AWS_PROFILE").ok(),
                region: env_or_default("AWS_REGION", "us-east-1"),
                services: env_list_or("AWS_SERVICES", &["s3"]),
                s3_refresh_interval_secs: env_parse_or("AWS_S3_REFRESH_INTERVAL_SECS", 3600)?,
            },
            azure: AzureConfig {
                tenant_id: std::env::var("AZURE_TENANT_ID").ok(),
                client_id: std::env::var("AZURE_CLIENT_ID").ok(),
                client_secret: std::env::var("AZURE_CLIENT_SECRET").ok(),
                subscription_id: std::env::var("AZURE_SUBSCRIPTION_ID").ok(),
                services: env_list_or("AZURE_SERVICES", &["aks"]),
                machine_refresh_interval_secs: env_parse_or(
                    "AZURE_MACHINE_REFRESH_INTERVAL_SECS",
                    300,
                )?,
                price_refresh_interval_secs: env_parse_or(
                    "AZURE_PRICE_REFRESH_INTERVAL_SECS",
                    86_400,
                )?,
                disk_refresh_interval_secs: env_parse_or(
                    "AZURE_DISK_REFRESH_INTERVAL_SECS",
                    3_600,
                )?,
            },
            gcp: GcpConfig {
                projects: env_list_or("GCP_PROJECTS", &[]),
                api_key: std::env::var("GCP_API_KEY").ok(),
                access_token: std::env::var("GCP_ACCESS_TOKEN").ok(),
                services: env_list_or("GCP_SERVICES", &["gke", "gcs"]),
                default_discount: env_parse_or("GCP_DEFAULT_DISCOUNT", 0.0)?,
                pricing_refresh_interval_secs: env_parse_or(
                    "GCP_PRICING_REFRESH_INTERVAL_SECS",
                    86_400,
                )?,
                inventory_refresh_interval_secs: env_parse_or(
                    "GCP_INVENTORY_REFRESH_INTERVAL_SECS",
                    300,
                )?,
            },
        })
    }
}
