//! Catalog-derived pricing maps
//!
//! The Cloud Billing catalog prices Compute Engine by (family, region)
//! core-hours and GiB-hours, and Cloud Storage by (storage class, region)
//! GiB-months plus class-A/class-B operation counts. These maps index the
//! catalog once per refresh; lookups are plain map reads during a scrape.
//! A configured default discount is applied to every list price.

use std::collections::HashMap;

use tracing::debug;

use crate::client::CatalogSku;

/// Average hours in a month, for monthly storage meters.
pub const HOURS_IN_MONTH: f64 = 730.5;

/// Per-machine rates for one (region, family, tier) cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineRates {
    pub cpu_usd_per_core_hour: f64,
    pub ram_usd_per_gib_hour: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct RateCell {
    cpu: Option<f64>,
    ram: Option<f64>,
}

/// Compute Engine pricing: `(region, family, spot) -> rates`.
#[derive(Debug, Default)]
pub struct MachinePricing {
    cells: HashMap<(String, String, bool), RateCell>,
}

impl MachinePricing {
    pub fn from_skus(skus: &[CatalogSku], discount: f64) -> Self {
        let mut cells: HashMap<(String, String, bool), RateCell> = HashMap::new();

        for sku in skus {
            let spot = match sku.usage_type.as_str() {
                "OnDemand" => false,
                "Preemptible" => true,
                _ => continue,
            };
            let is_cpu = sku.resource_group == "CPU";
            let is_ram = sku.resource_group == "RAM";
            if !is_cpu && !is_ram {
                continue;
            }
            // Descriptions read "E2 Instance Core running in Americas";
            // the leading token is the machine family.
            if !sku.description.contains("Instance Core")
                && !sku.description.contains("Instance Ram")
            {
                continue;
            }
            let Some(family) = sku.description.split_whitespace().next() else {
                continue;
            };
            let family = family.to_lowercase();
            let price = sku.unit_price * (1.0 - discount);

            for region in &sku.service_regions {
                let cell = cells
                    .entry((region.clone(), family.clone(), spot))
                    .or_default();
                if is_cpu {
                    cell.cpu = Some(price);
                } else {
                    cell.ram = Some(price);
                }
            }
        }

        debug!(cells = cells.len(), "indexed compute engine rates");
        Self { cells }
    }

    /// Rates for one cell; `None` until both the core and RAM meters have
    /// been seen for it.
    pub fn rates(&self, region: &str, family: &str, spot: bool) -> Option<MachineRates> {
        let cell = self
            .cells
            .get(&(region.to_string(), family.to_string(), spot))?;
        Some(MachineRates {
            cpu_usd_per_core_hour: cell.cpu?,
            ram_usd_per_gib_hour: cell.ram?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Map a bucket's storage class and location onto the catalog resource
/// group that prices it. Multi-region locations (`us`, `eu`, `asia`) use
/// the multi-regional group for standard storage.
pub fn storage_resource_group(storage_class: &str, location: &str) -> &'static str {
    let multi_region = matches!(location, "us" | "eu" | "asia");
    match storage_class.to_ascii_uppercase().as_str() {
        "NEARLINE" => "NearlineStorage",
        "COLDLINE" => "ColdlineStorage",
        "ARCHIVE" => "ArchiveStorage",
        _ if multi_region => "MultiRegionalStorage",
        _ => "RegionalStorage",
    }
}

/// Cloud Storage pricing: storage by `(region, resource group)` in USD
/// per GiB-hour, operations by `(region, op class)` in USD per 1k
/// requests.
#[derive(Debug, Default)]
pub struct StoragePricing {
    storage: HashMap<(String, String), f64>,
    operations: HashMap<(String, String), f64>,
}

impl StoragePricing {
    pub fn from_skus(skus: &[CatalogSku], discount: f64) -> Self {
        let mut storage = HashMap::new();
        let mut operations = HashMap::new();

        for sku in skus {
            if sku.usage_type != "OnDemand" {
                continue;
            }
            match sku.resource_family.as_str() {
                "Storage" => {
                    // GiB-month meter, converted to an hourly rate.
                    let rate = sku.unit_price * (1.0 - discount) / HOURS_IN_MONTH;
                    for region in &sku.service_regions {
                        storage.insert((region.clone(), sku.resource_group.clone()), rate);
                    }
                }
                "ApiRequest" => {
                    let class = match sku.resource_group.as_str() {
                        "ClassARequest" => "A",
                        "ClassBRequest" => "B",
                        _ => continue,
                    };
                    // Per-request meter, reported per 1k requests.
                    let rate = sku.unit_price * (1.0 - discount) * 1_000.0;
                    for region in &sku.service_regions {
                        operations.insert((region.clone(), class.to_string()), rate);
                    }
                }
                _ => {}
            }
        }

        debug!(
            storage = storage.len(),
            operations = operations.len(),
            "indexed cloud storage rates"
        );
        Self { storage, operations }
    }

    pub fn storage_rate(&self, region: &str, resource_group: &str) -> Option<f64> {
        self.storage
            .get(&(region.to_string(), resource_group.to_string()))
            .copied()
    }

    pub fn operation_rate(&self, region: &str, op_class: &str) -> Option<f64> {
        self.operations
            .get(&(region.to_string(), op_class.to_string()))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty() && self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(
        description: &str,
        family: &str,
        group: &str,
        usage_type: &str,
        regions: &[&str],
        price: f64,
    ) -> CatalogSku {
        CatalogSku {
            sku_id: "sku".to_string(),
            description: description.to_string(),
            resource_family: family.to_string(),
            resource_group: group.to_string(),
            usage_type: usage_type.to_string(),
            service_regions: regions.iter().map(|r| r.to_string()).collect(),
            usage_unit: "h".to_string(),
            unit_price: price,
        }
    }

    #[test]
    fn test_machine_pricing_indexes_core_and_ram() {
        let pricing = MachinePricing::from_skus(
            &[
                sku(
                    "E2 Instance Core running in Americas",
                    "Compute",
                    "CPU",
                    "OnDemand",
                    &["us-central1"],
                    0.0218,
                ),
                sku(
                    "E2 Instance Ram running in Americas",
                    "Compute",
                    "RAM",
                    "OnDemand",
                    &["us-central1"],
                    0.0029,
                ),
            ],
            0.0,
        );

        let rates = pricing.rates("us-central1", "e2", false).unwrap();
        assert_eq!(rates.cpu_usd_per_core_hour, 0.0218);
        assert_eq!(rates.ram_usd_per_gib_hour, 0.0029);
        assert!(pricing.rates("us-central1", "e2", true).is_none());
        assert!(pricing.rates("europe-west4", "e2", false).is_none());
    }

    #[test]
    fn test_machine_pricing_applies_discount() {
        let pricing = MachinePricing::from_skus(
            &[
                sku(
                    "N2 Instance Core running in EMEA",
                    "Compute",
                    "CPU",
                    "OnDemand",
                    &["europe-west4"],
                    0.04,
                ),
                sku(
                    "N2 Instance Ram running in EMEA",
                    "Compute",
                    "RAM",
                    "OnDemand",
                    &["europe-west4"],
                    0.01,
                ),
            ],
            0.25,
        );

        let rates = pricing.rates("europe-west4", "n2", false).unwrap();
        assert!((rates.cpu_usd_per_core_hour - 0.03).abs() < 1e-12);
        assert!((rates.ram_usd_per_gib_hour - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn test_machine_pricing_separates_spot() {
        let pricing = MachinePricing::from_skus(
            &[
                sku(
                    "Spot Preemptible E2 Instance Core running in Americas",
                    "Compute",
                    "CPU",
                    "Preemptible",
                    &["us-central1"],
                    0.006,
                ),
                sku(
                    "Spot Preemptible E2 Instance Ram running in Americas",
                    "Compute",
                    "RAM",
                    "Preemptible",
                    &["us-central1"],
                    0.0008,
                ),
            ],
            0.0,
        );

        // The family token is the first word of the description.
        assert!(pricing.rates("us-central1", "spot", true).is_some());
        assert!(pricing.rates("us-central1", "spot", false).is_none());
    }

    #[test]
    fn test_machine_pricing_skips_commitments_and_other_groups() {
        let pricing = MachinePricing::from_skus(
            &[
                sku(
                    "E2 Instance Core running in Americas",
                    "Compute",
                    "CPU",
                    "Commit1Yr",
                    &["us-central1"],
                    0.01,
                ),
                sku(
                    "Network Egress",
                    "Network",
                    "Egress",
                    "OnDemand",
                    &["us-central1"],
                    0.08,
                ),
            ],
            0.0,
        );
        assert!(pricing.is_empty());
    }

    #[test]
    fn test_storage_resource_group_mapping() {
        assert_eq!(storage_resource_group("STANDARD", "us-central1"), "RegionalStorage");
        assert_eq!(storage_resource_group("STANDARD", "us"), "MultiRegionalStorage");
        assert_eq!(storage_resource_group("NEARLINE", "us"), "NearlineStorage");
        assert_eq!(storage_resource_group("coldline", "europe-west4"), "ColdlineStorage");
        assert_eq!(storage_resource_group("ARCHIVE", "asia"), "ArchiveStorage");
    }

    #[test]
    fn test_storage_pricing_rates() {
        let pricing = StoragePricing::from_skus(
            &[
                sku(
                    "Standard Storage US Regional",
                    "Storage",
                    "RegionalStorage",
                    "OnDemand",
                    &["us-central1"],
                    0.02,
                ),
                sku(
                    "Class A Request Regional",
                    "ApiRequest",
                    "ClassARequest",
                    "OnDemand",
                    &["us-central1"],
                    0.000005,
                ),
                sku(
                    "Class B Request Regional",
                    "ApiRequest",
                    "ClassBRequest",
                    "OnDemand",
                    &["us-central1"],
                    0.0000004,
                ),
            ],
            0.0,
        );

        let storage = pricing.storage_rate("us-central1", "RegionalStorage").unwrap();
        assert!((storage - 0.02 / HOURS_IN_MONTH).abs() < 1e-15);

        let class_a = pricing.operation_rate("us-central1", "A").unwrap();
        assert!((class_a - 0.005).abs() < 1e-12);
        let class_b = pricing.operation_rate("us-central1", "B").unwrap();
        assert!((class_b - 0.0004).abs() < 1e-12);

        assert!(pricing.storage_rate("europe-west4", "RegionalStorage").is_none());
        assert!(pricing.operation_rate("us-central1", "C").is_none());
    }
}
