//! Provider dispatch
//!
//! Instantiates the enabled providers and their collectors from the
//! configuration, wires every descriptor into one registry, and drives a
//! full scrape on demand. Construction failures (bad credentials, missing
//! subscription or projects) surface here and abort startup.

use std::sync::Arc;
use std::time::Duration;

use domain_aws::client::CostExplorerClient;
use domain_aws::s3::S3Collector;
use domain_azure::aks::{AksCollector, AksIntervals};
use domain_azure::arm::{ArmClient, AzureComputeApi};
use domain_azure::auth::TokenProvider;
use domain_azure::retail::{RetailPricesApi, RetailPricesClient};
use domain_gcp::client::{BillingCatalogApi, CatalogClient, ComputeApi, GcpRestClient, StorageApi, TokenSource};
use domain_gcp::gcs::{GcsCollector, GcsIntervals};
use domain_gcp::gke::{GkeCollector, GkeIntervals};
use eyre::{WrapErr, eyre};
use futures::future::join_all;
use observability::{Collector, CollectorError, Provider, ScrapeMetrics, encode_metrics};
use prometheus::Registry;
use tracing::{info, warn};

use crate::config::Config;

/// The assembled exporter: one registry, one provider runtime per
/// enabled cloud.
pub struct Exporter {
    registry: Registry,
    providers: Vec<Provider>,
}

impl Exporter {
    /// Build providers from the configuration and register every
    /// descriptor.
    pub async fn build(config: &Config) -> eyre::Result<Self> {
        let registry = Registry::new();
        let meta = ScrapeMetrics::new(&registry)?;
        let scrape_timeout = Duration::from_secs(config.scrape_timeout_secs);

        let mut providers = Vec::new();
        for name in &config.providers {
            match name.as_str() {
                "aws" => {
                    let collectors = build_aws(config).await?;
                    providers.push(Provider::new("aws", collectors, scrape_timeout, meta.clone()));
                }
                "azure" => {
                    let collectors = build_azure(config)?;
                    providers.push(Provider::new(
                        "azure",
                        collectors,
                        scrape_timeout,
                        meta.clone(),
                    ));
                }
                "gcp" => {
                    let collectors = build_gcp(config)?;
                    providers.push(Provider::new("gcp", collectors, scrape_timeout, meta.clone()));
                }
                other => {
                    warn!(provider = other, "unknown provider, skipping");
                }
            }
        }

        for provider in &providers {
            provider.register(&registry)?;
            info!(
                provider = provider.name(),
                collectors = provider.collector_count(),
                "provider registered"
            );
        }

        Ok(Self {
            registry,
            providers,
        })
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Run one scrape across all providers and render the snapshot.
    pub async fn scrape(&self) -> Result<String, CollectorError> {
        join_all(self.providers.iter().map(|provider| provider.collect())).await;
        encode_metrics(&self.registry)
    }
}

async fn build_aws(config: &Config) -> eyre::Result<Vec<Arc<dyn Collector>>> {
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    for service in &config.aws.services {
        match service.as_str() {
            "s3" => {
                let client =
                    CostExplorerClient::new(config.aws.profile.as_deref(), &config.aws.region)
                        .await
                        .wrap_err("failed to construct Cost Explorer client")?;
                let s3 = S3Collector::new(
                    Arc::new(client),
                    Duration::from_secs(config.aws.s3_refresh_interval_secs),
                )?;
                collectors.push(Arc::new(s3));
            }
            other => warn!(provider = "aws", service = other, "unknown service, skipping"),
        }
    }
    Ok(collectors)
}

fn build_azure(config: &Config) -> eyre::Result<Vec<Arc<dyn Collector>>> {
    let azure = &config.azure;
    let (Some(tenant), Some(client_id), Some(secret), Some(subscription)) = (
        azure.tenant_id.as_deref(),
        azure.client_id.as_deref(),
        azure.client_secret.as_deref(),
        azure.subscription_id.as_deref(),
    ) else {
        return Err(eyre!(
            "azure provider requires AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET and AZURE_SUBSCRIPTION_ID"
        ));
    };

    let token = Arc::new(TokenProvider::new(tenant, client_id, secret)?);
    let arm: Arc<dyn AzureComputeApi> = Arc::new(ArmClient::new(subscription, token)?);
    let retail: Arc<dyn RetailPricesApi> = Arc::new(RetailPricesClient::new());

    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    for service in &azure.services {
        match service.as_str() {
            "aks" => {
                let aks = AksCollector::new(
                    Arc::clone(&arm),
                    Arc::clone(&retail),
                    AksIntervals {
                        machine_refresh: Duration::from_secs(azure.machine_refresh_interval_secs),
                        price_refresh: Duration::from_secs(azure.price_refresh_interval_secs),
                        disk_refresh: Duration::from_secs(azure.disk_refresh_interval_secs),
                    },
                )?;
                collectors.push(Arc::new(aks));
            }
            other => warn!(provider = "azure", service = other, "unknown service, skipping"),
        }
    }
    Ok(collectors)
}

fn build_gcp(config: &Config) -> eyre::Result<Vec<Arc<dyn Collector>>> {
    let gcp = &config.gcp;
    let Some(api_key) = gcp.api_key.as_deref() else {
        return Err(eyre!("gcp provider requires GCP_API_KEY"));
    };
    if gcp.projects.is_empty() {
        return Err(eyre!("gcp provider requires GCP_PROJECTS"));
    }

    let catalog: Arc<dyn BillingCatalogApi> = Arc::new(CatalogClient::new(api_key)?);
    let rest = Arc::new(GcpRestClient::new(TokenSource::new(gcp.access_token.clone())));

    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    for service in &gcp.services {
        match service.as_str() {
            "gke" => {
                let gke = GkeCollector::new(
                    Arc::clone(&catalog),
                    Arc::clone(&rest) as Arc<dyn ComputeApi>,
                    gcp.projects.clone(),
                    gcp.default_discount,
                    GkeIntervals {
                        pricing_refresh: Duration::from_secs(gcp.pricing_refresh_interval_secs),
                        inventory_refresh: Duration::from_secs(gcp.inventory_refresh_interval_secs),
                    },
                )?;
                collectors.push(Arc::new(gke));
            }
            "gcs" => {
                let gcs = GcsCollector::new(
                    Arc::clone(&catalog),
                    Arc::clone(&rest) as Arc<dyn StorageApi>,
                    gcp.projects.clone(),
                    gcp.default_discount,
                    GcsIntervals {
                        pricing_refresh: Duration::from_secs(gcp.pricing_refresh_interval_secs),
                        inventory_refresh: Duration::from_secs(gcp.inventory_refresh_interval_secs),
                    },
                )?;
                collectors.push(Arc::new(gcs));
            }
            other => warn!(provider = "gcp", service = other, "unknown service, skipping"),
        }
    }
    Ok(collectors)
}
