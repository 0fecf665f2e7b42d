//! Shared Azure domain types

use strum::{Display, EnumString};

/// Operating system of a worker VM. Anything without a Linux
/// configuration block on its scale set is treated as Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Default)]
#[strum(serialize_all = "lowercase")]
pub enum MachineOs {
    #[default]
    Linux,
    Windows,
}

/// Billing priority of a worker VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Default)]
#[strum(serialize_all = "snake_case")]
pub enum MachinePriority {
    #[default]
    OnDemand,
    Spot,
}

/// One AKS worker VM, keyed by its cloud-assigned id. `name` is the
/// lower-cased computer name reported by the instance view.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineInfo {
    pub id: String,
    pub name: String,
    pub region: String,
    pub owning_vmss: String,
    pub owning_cluster: String,
    pub sku: String,
    pub family: &'static str,
    pub os: MachineOs,
    pub priority: MachinePriority,
    pub num_cores: i32,
    pub mem_mib: i32,
    pub os_disk_mb: i64,
}

/// Per-SKU size metadata from the machine-size listing of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineSize {
    pub cores: i32,
    pub mem_mib: i32,
    pub os_disk_mb: i64,
}

/// Derive the marketing family from the first letter of the SKU, after
/// stripping the `Standard_` prefix. Unknown letters drop the machine.
pub fn machine_family_from_sku(sku: &str) -> Option<&'static str> {
    let trimmed = sku.strip_prefix("Standard_").unwrap_or(sku);
    match trimmed.chars().next()? {
        'A' | 'B' | 'D' => Some("General purpose"),
        'E' | 'M' => Some("Memory optimized"),
        'F' => Some("Compute optimized"),
        'N' => Some("GPU accelerated"),
        'L' => Some("Storage optimized"),
        'H' => Some("High performance compute"),
        _ => None,
    }
}
