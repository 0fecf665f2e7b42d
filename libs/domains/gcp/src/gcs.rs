//! GCS cost-rate collector
//!
//! Bucket inventory plus the Cloud Storage slice of the billing catalog.
//! Rates are emitted per distinct (location, storage class) pair present
//! in the inventory: one storage rate and the class-A/class-B operation
//! rates for that location.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use observability::{CachedStore, Collector, CollectorError, CollectorResult};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::debug;

use crate::client::{BillingCatalogApi, BucketInfo, CLOUD_STORAGE_SERVICE, StorageApi};
use crate::error::{GcpError, GcpResult};
use crate::pricing::{StoragePricing, storage_resource_group};

/// Refresh cadences for the GCS stores.
#[derive(Debug, Clone, Copy)]
pub struct GcsIntervals {
    pub pricing_refresh: Duration,
    pub inventory_refresh: Duration,
}

impl Default for GcsIntervals {
    fn default() -> Self {
        Self {
            pricing_refresh: Duration::from_secs(24 * 60 * 60),
            inventory_refresh: Duration::from_secs(60 * 60),
        }
    }
}

struct GcsMetrics {
    storage_rate: GaugeVec,
    operation_rate: GaugeVec,
}

impl GcsMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            storage_rate: GaugeVec::new(
                Opts::new(
                    "cloudcost_gcp_gcs_storage_by_location_usd_per_gibyte_hour",
                    "Storage cost of GCS buckets by location and storage class, in USD per GiB-hour.",
                ),
                &["location", "storage_class"],
            )?,
            operation_rate: GaugeVec::new(
                Opts::new(
                    "cloudcost_gcp_gcs_operation_by_location_usd_per_krequest",
                    "Operation cost of GCS requests by location, storage class and operation class, in USD per 1k requests.",
                ),
                &["location", "storage_class", "opclass"],
            )?,
        })
    }
}

/// GCS collector: catalog pricing map + bucket inventory.
pub struct GcsCollector {
    catalog: Arc<dyn BillingCatalogApi>,
    storage: Arc<dyn StorageApi>,
    projects: Vec<String>,
    discount: f64,
    pricing: CachedStore<StoragePricing>,
    inventory: CachedStore<Vec<BucketInfo>>,
    metrics: GcsMetrics,
}

impl GcsCollector {
    pub fn new(
        catalog: Arc<dyn BillingCatalogApi>,
        storage: Arc<dyn StorageApi>,
        projects: Vec<String>,
        discount: f64,
        intervals: GcsIntervals,
    ) -> Result<Self, CollectorError> {
        if projects.is_empty() {
            return Err(GcpError::InvalidConfig("at least one project is required".to_string()).into());
        }
        if !(0.0..1.0).contains(&discount) {
            return Err(GcpError::InvalidConfig(format!(
                "discount {discount} must be within [0, 1)"
            ))
            .into());
        }
        let pricing_interval = TimeDelta::from_std(intervals.pricing_refresh)
            .map_err(|_| GcpError::InvalidConfig("pricing refresh interval out of range".to_string()))?;
        let inventory_interval = TimeDelta::from_std(intervals.inventory_refresh)
            .map_err(|_| GcpError::InvalidConfig("inventory refresh interval out of range".to_string()))?;

        Ok(Self {
            catalog,
            storage,
            projects,
            discount,
            pricing: CachedStore::new(StoragePricing::default(), pricing_interval),
            inventory: CachedStore::new(Vec::new(), inventory_interval),
            metrics: GcsMetrics::new()?,
        })
    }

    async fn refresh_pricing(&self) -> GcpResult<bool> {
        self.pricing
            .refresh_if_stale(|| async {
                let skus = self.catalog.list_skus(CLOUD_STORAGE_SERVICE).await?;
                Ok(StoragePricing::from_skus(&skus, self.discount))
            })
            .await
    }

    async fn refresh_inventory(&self) -> GcpResult<bool> {
        self.inventory
            .refresh_if_stale(|| async {
                let mut buckets = Vec::new();
                for project in &self.projects {
                    buckets.extend(self.storage.list_buckets(project).await?);
                }
                Ok(buckets)
            })
            .await
    }

    fn emit(&self) {
        self.metrics.storage_rate.reset();
        self.metrics.operation_rate.reset();

        let pairs: BTreeSet<(String, String)> = self
            .inventory
            .read()
            .iter()
            .map(|bucket| (bucket.location.clone(), bucket.storage_class.clone()))
            .collect();

        let pricing = self.pricing.read();
        for (location, storage_class) in &pairs {
            let group = storage_resource_group(storage_class, location);
            match pricing.storage_rate(location, group) {
                Some(rate) => {
                    self.metrics
                        .storage_rate
                        .with_label_values(&[location, storage_class])
                        .set(rate);
                }
                None => {
                    debug!(location = %location, class = %storage_class, "no storage rate, omitting");
                }
            }

            for op_class in ["A", "B"] {
                if let Some(rate) = pricing.operation_rate(location, op_class) {
                    self.metrics
                        .operation_rate
                        .with_label_values(&[location, storage_class, op_class])
                        .set(rate);
                }
            }
        }
        debug!(pairs = pairs.len(), "emitted GCS rates");
    }
}

#[async_trait]
impl Collector for GcsCollector {
    fn name(&self) -> &'static str {
        "gcs"
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.metrics.storage_rate.clone()))?;
        registry.register(Box::new(self.metrics.operation_rate.clone()))?;
        Ok(())
    }

    async fn collect(&self) -> CollectorResult<()> {
        let (pricing, inventory) = tokio::join!(self.refresh_pricing(), self.refresh_inventory());
        pricing.map_err(CollectorError::from)?;
        inventory.map_err(CollectorError::from)?;

        self.emit();
        Ok(())
    }
}
