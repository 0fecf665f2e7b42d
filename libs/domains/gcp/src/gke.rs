//! GKE cost-rate collector
//!
//! Same shape as the AKS collector: an instance inventory and a catalog
//! pricing map, joined per scrape into per-core and per-GiB rates.
//! Instances without the GKE cluster label are not Kubernetes workers and
//! are skipped; instances whose (region, family) has no catalog cell are
//! omitted from that scrape.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use observability::{CachedStore, Collector, CollectorError, CollectorResult};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::debug;

use crate::client::{BillingCatalogApi, COMPUTE_ENGINE_SERVICE, ComputeApi, InstanceInfo};
use crate::error::{GcpError, GcpResult};
use crate::pricing::MachinePricing;

const INSTANCE_LABELS: &[&str] = &["instance", "region", "machine_type", "cluster", "price_tier"];

/// Refresh cadences for the GKE stores.
#[derive(Debug, Clone, Copy)]
pub struct GkeIntervals {
    pub pricing_refresh: Duration,
    pub inventory_refresh: Duration,
}

impl Default for GkeIntervals {
    fn default() -> Self {
        Self {
            pricing_refresh: Duration::from_secs(24 * 60 * 60),
            inventory_refresh: Duration::from_secs(5 * 60),
        }
    }
}

struct GkeMetrics {
    instance_cpu: GaugeVec,
    instance_memory: GaugeVec,
}

impl GkeMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            instance_cpu: GaugeVec::new(
                Opts::new(
                    "cloudcost_gcp_gke_instance_cpu_usd_per_core_hour",
                    "CPU cost of a GKE worker instance in USD per core-hour, from the billing catalog core meter.",
                ),
                INSTANCE_LABELS,
            )?,
            instance_memory: GaugeVec::new(
                Opts::new(
                    "cloudcost_gcp_gke_instance_memory_usd_per_gib_hour",
                    "Memory cost of a GKE worker instance in USD per GiB-hour, from the billing catalog RAM meter.",
                ),
                INSTANCE_LABELS,
            )?,
        })
    }
}

/// GKE collector: catalog pricing map + instance inventory.
pub struct GkeCollector {
    catalog: Arc<dyn BillingCatalogApi>,
    compute: Arc<dyn ComputeApi>,
    projects: Vec<String>,
    discount: f64,
    pricing: CachedStore<MachinePricing>,
    inventory: CachedStore<Vec<InstanceInfo>>,
    metrics: GkeMetrics,
}

impl GkeCollector {
    pub fn new(
        catalog: Arc<dyn BillingCatalogApi>,
        compute: Arc<dyn ComputeApi>,
        projects: Vec<String>,
        discount: f64,
        intervals: GkeIntervals,
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
            compute,
            projects,
            discount,
            pricing: CachedStore::new(MachinePricing::default(), pricing_interval),
            inventory: CachedStore::new(Vec::new(), inventory_interval),
            metrics: GkeMetrics::new()?,
        })
    }

    async fn refresh_pricing(&self) -> GcpResult<bool> {
        self.pricing
            .refresh_if_stale(|| async {
                let skus = self.catalog.list_skus(COMPUTE_ENGINE_SERVICE).await?;
                Ok(MachinePricing::from_skus(&skus, self.discount))
            })
            .await
    }

    async fn refresh_inventory(&self) -> GcpResult<bool> {
        self.inventory
            .refresh_if_stale(|| async {
                let mut instances = Vec::new();
                for project in &self.projects {
                    instances.extend(self.compute.list_instances(project).await?);
                }
                Ok(instances)
            })
            .await
    }

    fn emit(&self) {
        self.metrics.instance_cpu.reset();
        self.metrics.instance_memory.reset();

        let instances = self.inventory.read().clone();
        let pricing = self.pricing.read();
        let mut omitted = 0usize;
        for instance in &instances {
            let Some(cluster) = instance.cluster.as_deref() else {
                debug!(instance = %instance.name, "instance has no cluster label, skipping");
                continue;
            };
            let Some(rates) = pricing.rates(&instance.region, &instance.family, instance.spot)
            else {
                debug!(
                    instance = %instance.name,
                    region = %instance.region,
                    family = %instance.family,
                    "no catalog rates, omitting instance"
                );
                omitted += 1;
                continue;
            };

            let tier = if instance.spot { "spot" } else { "on_demand" };
            let labels = [
                instance.name.as_str(),
                instance.region.as_str(),
                instance.machine_type.as_str(),
                cluster,
                tier,
            ];
            self.metrics
                .instance_cpu
                .with_label_values(&labels)
                .set(rates.cpu_usd_per_core_hour);
            self.metrics
                .instance_memory
                .with_label_values(&labels)
                .set(rates.ram_usd_per_gib_hour);
        }
        debug!(total = instances.len(), omitted, "emitted GKE instance rates");
    }
}

#[async_trait]
impl Collector for GkeCollector {
    fn name(&self) -> &'static str {
        "gke"
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.metrics.instance_cpu.clone()))?;
        registry.register(Box::new(self.metrics.instance_memory.clone()))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CatalogSku, MockBillingCatalogApi, MockComputeApi};

    fn catalog_sku(description: &str, group: &str, usage_type: &str, price: f64) -> CatalogSku {
        CatalogSku {
            sku_id: "sku".to_string(),
            description: description.to_string(),
            resource_family: "Compute".to_string(),
            resource_group: group.to_string(),
            usage_type: usage_type.to_string(),
            service_regions: vec!["us-central1".to_string()],
            usage_unit: "h".to_string(),
            unit_price: price,
        }
    }

    fn instance(name: &str, family: &str, cluster: Option<&str>, spot: bool) -> InstanceInfo {
        InstanceInfo {
            name: name.to_string(),
            zone: "us-central1-a".to_string(),
            region: "us-central1".to_string(),
            machine_type: format!("{family}-standard-4"),
            family: family.to_string(),
            cluster: cluster.map(str::to_string),
            spot,
        }
    }

    fn catalog_mock(skus: Vec<CatalogSku>) -> MockBillingCatalogApi {
        let mut mock = MockBillingCatalogApi::new();
        mock.expect_list_skus().returning(move |_| Ok(skus.clone()));
        mock
    }

    fn compute_mock(instances: Vec<InstanceInfo>) -> MockComputeApi {
        let mut mock = MockComputeApi::new();
        mock.expect_list_instances()
            .returning(move |_| Ok(instances.clone()));
        mock
    }

    fn collector(catalog: MockBillingCatalogApi, compute: MockComputeApi) -> GkeCollector {
        GkeCollector::new(
            Arc::new(catalog),
            Arc::new(compute),
            vec!["my-project".to_string()],
            0.0,
            GkeIntervals::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_collect_emits_rates_for_labeled_instances() {
        let catalog = catalog_mock(vec![
            catalog_sku("E2 Instance Core running in Americas", "CPU", "OnDemand", 0.0218),
            catalog_sku("E2 Instance Ram running in Americas", "RAM", "OnDemand", 0.0029),
        ]);
        let compute = compute_mock(vec![
            instance("gke-prod-node-1", "e2", Some("prod"), false),
            // Not a GKE node: no cluster label.
            instance("plain-vm", "e2", None, false),
        ]);
        let collector = collector(catalog, compute);

        collector.collect().await.unwrap();

        let labels = ["gke-prod-node-1", "us-central1", "e2-standard-4", "prod", "on_demand"];
        assert_eq!(
            collector.metrics.instance_cpu.with_label_values(&labels).get(),
            0.0218
        );
        assert_eq!(
            collector
                .metrics
                .instance_memory
                .with_label_values(&labels)
                .get(),
            0.0029
        );

        // Only the labeled instance produced series.
        let registry = Registry::new();
        collector.register(&registry).unwrap();
        let families = registry.gather();
        let cpu = families
            .iter()
            .find(|f| f.get_name() == "cloudcost_gcp_gke_instance_cpu_usd_per_core_hour")
            .unwrap();
        assert_eq!(cpu.get_metric().len(), 1);
    }

    #[tokio::test]
    async fn test_instance_without_rates_is_omitted() {
        let catalog = catalog_mock(vec![
            catalog_sku("E2 Instance Core running in Americas", "CPU", "OnDemand", 0.0218),
            catalog_sku("E2 Instance Ram running in Americas", "RAM", "OnDemand", 0.0029),
        ]);
        // n2 has no catalog cell.
        let compute = compute_mock(vec![instance("gke-n2-node", "n2", Some("prod"), false)]);
        let collector = collector(catalog, compute);

        collector.collect().await.unwrap();

        let registry = Registry::new();
        collector.register(&registry).unwrap();
        let families = registry.gather();
        let cpu = families
            .iter()
            .find(|f| f.get_name() == "cloudcost_gcp_gke_instance_cpu_usd_per_core_hour");
        assert!(cpu.is_none_or(|f| f.get_metric().is_empty()));
    }

    #[tokio::test]
    async fn test_inventory_failure_fails_the_scrape() {
        let catalog = catalog_mock(vec![]);
        let mut compute = MockComputeApi::new();
        compute
            .expect_list_instances()
            .returning(|_| Err(GcpError::Api("quota".to_string())));
        let collector = collector(catalog, compute);

        assert!(collector.collect().await.is_err());
    }

    #[test]
    fn test_constructor_validates_config() {
        let catalog = MockBillingCatalogApi::new();
        let compute = MockComputeApi::new();
        assert!(
            GkeCollector::new(
                Arc::new(catalog),
                Arc::new(compute),
                Vec::new(),
                0.0,
                GkeIntervals::default(),
            )
            .is_err()
        );

        let catalog = MockBillingCatalogApi::new();
        let compute = MockComputeApi::new();
        assert!(
            GkeCollector::new(
                Arc::new(catalog),
                Arc::new(compute),
                vec!["p".to_string()],
                1.5,
                GkeIntervals::default(),
            )
            .is_err()
        );
    }
}
