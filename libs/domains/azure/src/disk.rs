//! AKS Disk Store
//!
//! Subscription-wide managed-disk inventory plus the managed-disk slice
//! of the retail price sheet. Disk SKU + provisioned size map onto a
//! pricing tier meter (`P30 LRS Disk`, ...), and ARM region codes map
//! onto the retail sheet's location names; the two lower-cased halves
//! joined with `-` form the pricing key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use observability::CachedStore;
use tracing::debug;

use crate::arm::{AzureComputeApi, ManagedDisk};
use crate::error::{AzureError, AzureResult};
use crate::retail::{MANAGED_DISK_FILTER, RetailPricesApi};

const TAG_PV_NAME: &str = "kubernetes.io-created-for-pv-name";
const TAG_PVC_NAMESPACE: &str = "kubernetes.io-created-for-pvc-namespace";

/// Size breakpoints (GiB, inclusive) per tier family. Larger than the
/// last breakpoint falls through to the family's top tier.
const PREMIUM_TIERS: &[(i64, &str)] = &[
    (32, "P4"),
    (64, "P6"),
    (128, "P10"),
    (256, "P15"),
    (512, "P20"),
    (1024, "P30"),
    (2048, "P40"),
    (4096, "P50"),
    (8192, "P60"),
    (16384, "P70"),
];

const STANDARD_SSD_TIERS: &[(i64, &str)] = &[
    (4, "E1"),
    (8, "E2"),
    (16, "E3"),
    (32, "E4"),
    (64, "E6"),
    (128, "E10"),
    (256, "E15"),
    (512, "E20"),
    (1024, "E30"),
    (2048, "E40"),
    (4096, "E50"),
    (8192, "E60"),
    (16384, "E70"),
];

const STANDARD_HDD_TIERS: &[(i64, &str)] = &[
    (32, "S4"),
    (64, "S6"),
    (128, "S10"),
    (256, "S15"),
    (512, "S20"),
    (1024, "S30"),
    (2048, "S40"),
    (4096, "S50"),
    (8192, "S60"),
    (16384, "S70"),
];

fn tier_for(size_gb: i64, tiers: &[(i64, &'static str)], top: &'static str) -> &'static str {
    for (limit, tier) in tiers {
        if size_gb <= *limit {
            return tier;
        }
    }
    top
}

/// Map a disk SKU and provisioned size onto the retail meter name that
/// prices it. Unknown SKUs pass through unchanged and miss downstream.
pub fn disk_pricing_sku(sku: &str, size_gb: i64) -> String {
    match sku {
        "Premium_LRS" => format!("{} LRS Disk", tier_for(size_gb, PREMIUM_TIERS, "P80")),
        "StandardSSD_LRS" => format!("{} LRS Disk", tier_for(size_gb, STANDARD_SSD_TIERS, "E80")),
        "Standard_LRS" => format!("{} LRS Disk", tier_for(size_gb, STANDARD_HDD_TIERS, "S80")),
        "PremiumV2_LRS" => "Premium SSD v2".to_string(),
        "UltraSSD_LRS" => "Ultra Disk".to_string(),
        other => other.to_string(),
    }
}

/// Translate an ARM region code into the Retail Prices sheet's location
/// name. Unknown codes pass through unchanged.
pub fn retail_region_name(arm_region: &str) -> String {
    let name = match arm_region {
        "australiacentral" => "AU Central",
        "australiacentral2" => "AU Central 2",
        "australiaeast" => "AU East",
        "australiasoutheast" => "AU Southeast",
        "brazilsouth" => "BR South",
        "canadacentral" => "CA Central",
        "canadaeast" => "CA East",
        "centralindia" => "IN Central",
        "centralus" => "US Central",
        "eastasia" => "AP East",
        "eastus" => "US East",
        "eastus2" => "US East 2",
        "francecentral" => "FR Central",
        "francesouth" => "FR South",
        "germanynorth" => "DE North",
        "germanywestcentral" => "DE West Central",
        "israelcentral" => "IL Central",
        "italynorth" => "IT North",
        "japaneast" => "JA East",
        "japanwest" => "JA West",
        "koreacentral" => "KR Central",
        "koreasouth" => "KR South",
        "northcentralus" => "US North Central",
        "northeurope" => "EU North",
        "norwayeast" => "NO East",
        "norwaywest" => "NO West",
        "polandcentral" => "PL Central",
        "qatarcentral" => "QA Central",
        "southafricanorth" => "ZA North",
        "southafricawest" => "ZA West",
        "southcentralus" => "US South Central",
        "southeastasia" => "AP Southeast",
        "southindia" => "IN South",
        "spaincentral" => "ES Central",
        "swedencentral" => "SE Central",
        "swedensouth" => "SE South",
        "switzerlandnorth" => "CH North",
        "switzerlandwest" => "CH West",
        "uaecentral" => "AE Central",
        "uaenorth" => "AE North",
        "uksouth" => "UK South",
        "ukwest" => "UK West",
        "westcentralus" => "US West Central",
        "westeurope" => "EU West",
        "westindia" => "IN West",
        "westus" => "US West",
        "westus2" => "US West 2",
        "westus3" => "US West 3",
        other => return other.to_string(),
    };
    name.to_string()
}

/// Pricing key for a disk: tier meter + retail location, lower-cased.
pub fn disk_pricing_key(sku: &str, size_gb: i64, arm_region: &str) -> String {
    format!(
        "{}-{}",
        disk_pricing_sku(sku, size_gb).to_lowercase(),
        retail_region_name(arm_region).to_lowercase()
    )
}

/// Derive the cluster name from an AKS node resource group
/// (`MC_<group>_<cluster>_<region>`). Anything else yields empty.
fn cluster_from_resource_group(resource_group: &str) -> String {
    let parts: Vec<&str> = resource_group.split('_').collect();
    if parts.len() == 4 && parts[0].eq_ignore_ascii_case("mc") {
        parts[2].to_string()
    } else {
        String::new()
    }
}

/// One managed disk with its Kubernetes attribution derived from tags and
/// the node resource group.
#[derive(Debug, Clone, Default)]
pub struct DiskInfo {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub size_gb: i64,
    pub sku: String,
    pub state: Option<String>,
    pub zone: Option<String>,
    pub pv_name: String,
    pub namespace: String,
    pub cluster: String,
}

impl From<ManagedDisk> for DiskInfo {
    fn from(disk: ManagedDisk) -> Self {
        let pv_name = disk.tags.get(TAG_PV_NAME).cloned().unwrap_or_default();
        let namespace = disk.tags.get(TAG_PVC_NAMESPACE).cloned().unwrap_or_default();
        let cluster = cluster_from_resource_group(&disk.resource_group);
        Self {
            name: disk.name,
            resource_group: disk.resource_group,
            location: disk.location,
            size_gb: disk.size_gb,
            sku: disk.sku,
            state: disk.state,
            zone: disk.zone,
            pv_name,
            namespace,
            cluster,
        }
    }
}

/// Monthly retail rate for one disk tier meter in one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskPrice {
    pub monthly_price: f64,
    pub meter_name: String,
    pub location: String,
}

/// Published snapshot: disk inventory plus the tier-price index.
#[derive(Debug, Default)]
pub struct DiskInventory {
    pub disks: Vec<DiskInfo>,
    pub prices: HashMap<String, DiskPrice>,
}

/// Disk inventory and managed-disk pricing, refreshed together.
pub struct DiskStore {
    compute: Arc<dyn AzureComputeApi>,
    retail: Arc<dyn RetailPricesApi>,
    store: CachedStore<DiskInventory>,
}

impl DiskStore {
    pub fn new(
        compute: Arc<dyn AzureComputeApi>,
        retail: Arc<dyn RetailPricesApi>,
        interval: Duration,
    ) -> AzureResult<Self> {
        let interval = TimeDelta::from_std(interval).map_err(|_| {
            AzureError::InvalidConfig("disk refresh interval out of range".to_string())
        })?;
        Ok(Self {
            compute,
            retail,
            store: CachedStore::new(DiskInventory::default(), interval),
        })
    }

    pub async fn refresh_if_stale(&self) -> AzureResult<bool> {
        self.store.refresh_if_stale(|| self.populate()).await
    }

    pub fn ready(&self) -> bool {
        self.store.ready()
    }

    async fn populate(&self) -> AzureResult<DiskInventory> {
        let (disks, prices) = tokio::try_join!(
            self.compute.list_disks_in_subscription(),
            self.retail.list_prices(MANAGED_DISK_FILTER)
        )?;

        let mut price_index = HashMap::new();
        for item in prices {
            // Only monthly provisioned-tier meters price whole disks.
            if !item.unit_of_measure.contains("Month") {
                continue;
            }
            if item.meter_name.is_empty() || item.location.is_empty() {
                continue;
            }
            let key = format!(
                "{}-{}",
                item.meter_name.to_lowercase(),
                item.location.to_lowercase()
            );
            price_index.insert(
                key,
                DiskPrice {
                    monthly_price: item.retail_price,
                    meter_name: item.meter_name,
                    location: item.location,
                },
            );
        }

        let disks: Vec<DiskInfo> = disks.into_iter().map(DiskInfo::from).collect();
        debug!(
            disks = disks.len(),
            prices = price_index.len(),
            "populated disk inventory"
        );
        Ok(DiskInventory {
            disks,
            prices: price_index,
        })
    }

    /// Snapshot copy of the disk inventory.
    pub fn list(&self) -> Vec<DiskInfo> {
        self.store.read().disks.clone()
    }

    /// Monthly price for one disk; a pricing-key miss omits the disk from
    /// the scrape.
    pub fn price_for(&self, disk: &DiskInfo) -> AzureResult<DiskPrice> {
        let key = disk_pricing_key(&disk.sku, disk.size_gb, &disk.location);
        self.store
            .read()
            .prices
            .get(&key)
            .cloned()
            .ok_or(AzureError::DiskPriceNotFound(key))
    }
}
