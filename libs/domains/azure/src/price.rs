//! AKS Price Store
//!
//! Searchable retail-prices index for Virtual Machines consumption,
//! shaped `region -> priority -> os -> sku -> record`. One filtered
//! global fetch builds the whole index; lookups copy the record out and
//! attach the per-core / per-GiB attribution for the machine at hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use observability::CachedStore;
use tracing::debug;

use crate::error::{AzureError, AzureResult};
use crate::models::{MachineOs, MachinePriority, VirtualMachineInfo};
use crate::retail::{RetailPricesApi, VIRTUAL_MACHINES_FILTER};

/// Share of a machine's retail price attributed to CPU; the remainder is
/// attributed to memory, normalized per core and per GiB. A rate
/// attribution choice, not a billing claim.
pub const CPU_PRICE_SHARE: f64 = 0.65;

const MIB_PER_GIB: f64 = 1024.0;

/// One VM retail price record. `price_per_core` / `price_per_gib` are
/// filled in at lookup time for the machine being priced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceInfo {
    pub retail_price: f64,
    pub price_per_core: f64,
    pub price_per_gib: f64,
    pub sku: String,
    pub region: String,
    pub os: MachineOs,
    pub priority: MachinePriority,
}

type SkuMap = HashMap<String, PriceInfo>;
type OsMap = HashMap<MachineOs, SkuMap>;
type PriorityMap = HashMap<MachinePriority, OsMap>;
pub type RegionMap = HashMap<String, PriorityMap>;

/// Split a retail price into per-core and per-GiB rates.
pub fn attribute_price(retail_price: f64, cores: i32, mem_mib: i32) -> (f64, f64) {
    let per_core = if cores > 0 {
        retail_price * CPU_PRICE_SHARE / f64::from(cores)
    } else {
        0.0
    };
    let mem_gib = f64::from(mem_mib) / MIB_PER_GIB;
    let per_gib = if mem_gib > 0.0 {
        retail_price * (1.0 - CPU_PRICE_SHARE) / mem_gib
    } else {
        0.0
    };
    (per_core, per_gib)
}

/// Retail-prices index with a slow refresh cadence (default 24h).
pub struct PriceStore {
    client: Arc<dyn RetailPricesApi>,
    store: CachedStore<RegionMap>,
}

impl PriceStore {
    pub fn new(client: Arc<dyn RetailPricesApi>, interval: Duration) -> AzureResult<Self> {
        let interval = TimeDelta::from_std(interval).map_err(|_| {
            AzureError::InvalidConfig("price refresh interval out of range".to_string())
        })?;
        Ok(Self {
            client,
            store: CachedStore::new(RegionMap::new(), interval),
        })
    }

    pub async fn refresh_if_stale(&self) -> AzureResult<bool> {
        self.store.refresh_if_stale(|| self.populate()).await
    }

    pub fn ready(&self) -> bool {
        self.store.ready()
    }

    async fn populate(&self) -> AzureResult<RegionMap> {
        let items = self.client.list_prices(VIRTUAL_MACHINES_FILTER).await?;

        let mut map = RegionMap::new();
        let mut kept = 0usize;
        for item in items {
            // The server filter is coarse; narrow client-side.
            if !item.product_name.contains("Virtual Machines") {
                continue;
            }
            if item.sku_name.contains("Low Priority") {
                continue;
            }
            if item.arm_region_name.is_empty() {
                continue;
            }
            let Some(sku) = item.arm_sku_name.filter(|s| !s.is_empty()) else {
                continue;
            };

            let priority = if item.sku_name.contains("Spot") {
                MachinePriority::Spot
            } else {
                MachinePriority::OnDemand
            };
            let os = if item.product_name.contains("Windows") {
                MachineOs::Windows
            } else {
                MachineOs::Linux
            };

            map.entry(item.arm_region_name.clone())
                .or_default()
                .entry(priority)
                .or_default()
                .entry(os)
                .or_default()
                .insert(
                    sku.clone(),
                    PriceInfo {
                        retail_price: item.retail_price,
                        price_per_core: 0.0,
                        price_per_gib: 0.0,
                        sku,
                        region: item.arm_region_name,
                        os,
                        priority,
                    },
                );
            kept += 1;
        }

        debug!(kept, regions = map.len(), "indexed virtual machine retail prices");
        Ok(map)
    }

    /// Price record for one machine, with the CPU/memory attribution
    /// filled in. Any missing index level yields `PriceNotFound` and the
    /// machine is omitted from the scrape.
    pub fn price_info(&self, vm: &VirtualMachineInfo) -> AzureResult<PriceInfo> {
        if vm.region.is_empty() || vm.sku.is_empty() {
            return Err(AzureError::PriceNotFound(format!(
                "machine {} has no region or sku",
                vm.id
            )));
        }

        let mut info = {
            let map = self.store.read();
            map.get(&vm.region)
                .and_then(|priorities| priorities.get(&vm.priority))
                .and_then(|oses| oses.get(&vm.os))
                .and_then(|skus| skus.get(&vm.sku))
                .cloned()
                .ok_or_else(|| {
                    AzureError::PriceNotFound(format!(
                        "{}/{}/{}/{}",
                        vm.region, vm.priority, vm.os, vm.sku
                    ))
                })?
        };

        let (per_core, per_gib) = attribute_price(info.retail_price, vm.num_cores, vm.mem_mib);
        info.price_per_core = per_core;
        info.price_per_gib = per_gib;
        Ok(info)
    }
}
