//! AKS cost-rate collector
//!
//! Joins the machine, price and disk stores: one CPU and one memory rate
//! per live worker VM, one rate per managed disk. Stores refresh on their
//! own cadences; a scrape that misses a price for a resource omits that
//! resource and succeeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use observability::{Collector, CollectorError, CollectorResult};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::debug;

use crate::arm::AzureComputeApi;
use crate::disk::DiskStore;
use crate::machine::MachineStore;
use crate::price::PriceStore;
use crate::retail::RetailPricesApi;

/// Average hours in a month, for monthly disk meters.
const HOURS_IN_MONTH: f64 = 730.5;

const INSTANCE_LABELS: &[&str] = &["instance", "region", "machine_type", "cluster", "price_tier"];
const DISK_LABELS: &[&str] = &[
    "disk",
    "namespace",
    "persistentvolume",
    "region",
    "cluster",
    "size_gib",
];

/// Refresh cadences for the three AKS stores.
#[derive(Debug, Clone, Copy)]
pub struct AksIntervals {
    pub machine_refresh: Duration,
    pub price_refresh: Duration,
    pub disk_refresh: Duration,
}

impl Default for AksIntervals {
    fn default() -> Self {
        Self {
            machine_refresh: Duration::from_secs(5 * 60),
            price_refresh: Duration::from_secs(24 * 60 * 60),
            disk_refresh: Duration::from_secs(60 * 60),
        }
    }
}

struct AksMetrics {
    instance_cpu: GaugeVec,
    instance_memory: GaugeVec,
    persistent_volume: GaugeVec,
}

impl AksMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            instance_cpu: GaugeVec::new(
                Opts::new(
                    "cloudcost_azure_aks_instance_cpu_usd_per_core_hour",
                    "CPU cost of an AKS worker VM in USD per core-hour, attributing 65% of the retail price to CPU.",
                ),
                INSTANCE_LABELS,
            )?,
            instance_memory: GaugeVec::new(
                Opts::new(
                    "cloudcost_azure_aks_instance_memory_usd_per_gib_hour",
                    "Memory cost of an AKS worker VM in USD per GiB-hour, attributing 35% of the retail price to memory.",
                ),
                INSTANCE_LABELS,
            )?,
            persistent_volume: GaugeVec::new(
                Opts::new(
                    "cloudcost_azure_aks_persistent_volume_usd_per_hour",
                    "Cost of a managed disk in USD per hour, from its monthly provisioned-tier meter.",
                ),
                DISK_LABELS,
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.instance_cpu.clone()))?;
        registry.register(Box::new(self.instance_memory.clone()))?;
        registry.register(Box::new(self.persistent_volume.clone()))?;
        Ok(())
    }
}

/// The AKS collector and its three exclusively-owned stores.
pub struct AksCollector {
    machines: MachineStore,
    prices: PriceStore,
    disks: DiskStore,
    metrics: AksMetrics,
}

impl AksCollector {
    pub fn new(
        compute: Arc<dyn AzureComputeApi>,
        retail: Arc<dyn RetailPricesApi>,
        intervals: AksIntervals,
    ) -> Result<Self, CollectorError> {
        Ok(Self {
            machines: MachineStore::new(Arc::clone(&compute), intervals.machine_refresh)?,
            prices: PriceStore::new(Arc::clone(&retail), intervals.price_refresh)?,
            disks: DiskStore::new(compute, retail, intervals.disk_refresh)?,
            metrics: AksMetrics::new()?,
        })
    }

    fn emit_machines(&self) {
        self.metrics.instance_cpu.reset();
        self.metrics.instance_memory.reset();

        let mut priced = 0usize;
        let mut omitted = 0usize;
        for vm in self.machines.list() {
            match self.prices.price_info(&vm) {
                Ok(price) => {
                    let tier = vm.priority.to_string();
                    let labels = [
                        vm.name.as_str(),
                        vm.region.as_str(),
                        vm.sku.as_str(),
                        vm.owning_cluster.as_str(),
                        tier.as_str(),
                    ];
                    self.metrics
                        .instance_cpu
                        .with_label_values(&labels)
                        .set(price.price_per_core);
                    self.metrics
                        .instance_memory
                        .with_label_values(&labels)
                        .set(price.price_per_gib);
                    priced += 1;
                }
                Err(e) => {
                    debug!(vm = %vm.id, error = %e, "no price information, omitting machine");
                    omitted += 1;
                }
            }
        }
        debug!(priced, omitted, "emitted AKS instance rates");
    }

    fn emit_disks(&self) {
        self.metrics.persistent_volume.reset();

        for disk in self.disks.list() {
            match self.disks.price_for(&disk) {
                Ok(price) => {
                    let size_gib = disk.size_gb.to_string();
                    let labels = [
                        disk.name.as_str(),
                        disk.namespace.as_str(),
                        disk.pv_name.as_str(),
                        disk.location.as_str(),
                        disk.cluster.as_str(),
                        size_gib.as_str(),
                    ];
                    self.metrics
                        .persistent_volume
                        .with_label_values(&labels)
                        .set(price.monthly_price / HOURS_IN_MONTH);
                }
                Err(e) => {
                    debug!(disk = %disk.name, error = %e, "no disk price, omitting disk");
                }
            }
        }
    }
}

#[async_trait]
impl Collector for AksCollector {
    fn name(&self) -> &'static str {
        "aks"
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        self.metrics.register(registry)
    }

    async fn collect(&self) -> CollectorResult<()> {
        let (machines, prices, disks) = tokio::join!(
            self.machines.refresh_if_stale(),
            self.prices.refresh_if_stale(),
            self.disks.refresh_if_stale()
        );
        machines.map_err(CollectorError::from)?;
        prices.map_err(CollectorError::from)?;
        disks.map_err(CollectorError::from)?;

        self.emit_machines();
        self.emit_disks();
        Ok(())
    }
}
