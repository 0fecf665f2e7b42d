//! AKS Machine Store
//!
//! Inventory of AKS worker VMs across all clusters and scale sets in the
//! subscription, with per-SKU size metadata. Population runs in two
//! phases under a bounded worker budget: sizes per cluster region first,
//! then the scale-set walk that consults them. Both accumulate off to the
//! side and swap in atomically only when the whole walk succeeds.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use futures::stream::{FuturesUnordered, StreamExt};
use observability::CachedStore;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::arm::{AzureComputeApi, ScaleSet, ScaleSetVm};
use crate::error::{AzureError, AzureResult};
use crate::models::{MachineOs, MachinePriority, MachineSize, VirtualMachineInfo, machine_family_from_sku};

/// Concurrent task limit for the population walk, bounding pressure on
/// the ARM API.
pub const POPULATION_BUDGET: usize = 10;

/// Published inventory snapshot: machines by VM id, sizes by region then
/// SKU.
#[derive(Debug, Default)]
pub struct MachineInventory {
    pub machines: HashMap<String, VirtualMachineInfo>,
    pub sizes: HashMap<String, HashMap<String, MachineSize>>,
}

/// Inventory of AKS worker VMs, refreshed at most once per interval.
pub struct MachineStore {
    client: Arc<dyn AzureComputeApi>,
    store: CachedStore<MachineInventory>,
}

impl MachineStore {
    pub fn new(client: Arc<dyn AzureComputeApi>, interval: Duration) -> AzureResult<Self> {
        let interval = TimeDelta::from_std(interval).map_err(|_| {
            AzureError::InvalidConfig("machine refresh interval out of range".to_string())
        })?;
        Ok(Self {
            client,
            store: CachedStore::new(MachineInventory::default(), interval),
        })
    }

    /// Rebuild the inventory if it is unpopulated or past its deadline.
    pub async fn refresh_if_stale(&self) -> AzureResult<bool> {
        self.store.refresh_if_stale(|| self.populate()).await
    }

    pub fn ready(&self) -> bool {
        self.store.ready()
    }

    /// Look up one machine by its cloud-assigned VM id.
    pub fn vm_info_by_id(&self, id: &str) -> AzureResult<VirtualMachineInfo> {
        self.store
            .read()
            .machines
            .get(id)
            .cloned()
            .ok_or_else(|| AzureError::MachineNotFound(id.to_string()))
    }

    /// Snapshot copy of the current machine inventory.
    pub fn list(&self) -> Vec<VirtualMachineInfo> {
        self.store.read().machines.values().cloned().collect()
    }

    async fn populate(&self) -> AzureResult<MachineInventory> {
        let clusters = self.client.list_clusters_in_subscription().await?;
        let regions: BTreeSet<String> = clusters.iter().map(|c| c.location.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(POPULATION_BUDGET));

        // Phase A: machine sizes per distinct cluster region. Any failure
        // aborts the population; the published inventory is untouched.
        let mut size_tasks = FuturesUnordered::new();
        for region in regions {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            size_tasks.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| AzureError::Api("population semaphore closed".to_string()))?;
                let types = client.list_machine_types_by_location(&region).await?;
                Ok::<_, AzureError>((region, types))
            });
        }

        let mut sizes: HashMap<String, HashMap<String, MachineSize>> = HashMap::new();
        while let Some(result) = size_tasks.next().await {
            let (region, types) = result?;
            let by_sku = types
                .into_iter()
                .map(|t| {
                    (
                        t.name,
                        MachineSize {
                            cores: t.cores,
                            mem_mib: t.mem_mib,
                            os_disk_mb: t.os_disk_mb,
                        },
                    )
                })
                .collect();
            sizes.insert(region, by_sku);
        }
        drop(size_tasks);

        // Phase B: walk every cluster's scale sets and their instances.
        // Sizes are complete for every cluster region at this point.
        let mut vm_tasks = FuturesUnordered::new();
        for cluster in &clusters {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let sizes = &sizes;
            vm_tasks.push(async move {
                let Some(resource_group) = cluster.node_resource_group.as_deref() else {
                    debug!(cluster = %cluster.name, "cluster has no node resource group, skipping");
                    return Ok(Vec::new());
                };
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| AzureError::Api("population semaphore closed".to_string()))?;

                let mut found = Vec::new();
                let scale_sets = client
                    .list_scale_sets_from_resource_group(resource_group)
                    .await?;
                for scale_set in scale_sets {
                    let vms = client
                        .list_scale_set_owned_vms(resource_group, &scale_set.name)
                        .await?;
                    for vm in vms {
                        if let Some(info) = vm_info_from(&cluster.name, &scale_set, vm, sizes) {
                            found.push(info);
                        }
                    }
                }
                Ok::<_, AzureError>(found)
            });
        }

        let mut machines = HashMap::new();
        while let Some(result) = vm_tasks.next().await {
            for info in result? {
                machines.insert(info.id.clone(), info);
            }
        }
        drop(vm_tasks);

        debug!(
            machines = machines.len(),
            regions = sizes.len(),
            "populated machine inventory"
        );
        Ok(MachineInventory { machines, sizes })
    }
}

/// Derive one inventory entry from a scale-set instance. A machine with a
/// missing id, missing instance view, unknown family or no size entry for
/// its (region, SKU) is dropped with a debug log.
fn vm_info_from(
    cluster_name: &str,
    scale_set: &ScaleSet,
    vm: ScaleSetVm,
    sizes: &HashMap<String, HashMap<String, MachineSize>>,
) -> Option<VirtualMachineInfo> {
    let Some(id) = vm.vm_id.filter(|id| !id.is_empty()) else {
        debug!(scale_set = %scale_set.name, "instance without vm id, dropping");
        return None;
    };
    if !vm.has_instance_view {
        debug!(vm = %id, "instance without instance view, dropping");
        return None;
    }
    let Some(name) = vm.computer_name.filter(|n| !n.is_empty()) else {
        debug!(vm = %id, "instance without computer name, dropping");
        return None;
    };
    let Some(sku) = vm.sku.filter(|s| !s.is_empty()) else {
        debug!(vm = %id, "instance without sku, dropping");
        return None;
    };
    let region = vm
        .location
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| scale_set.location.clone());
    if region.is_empty() {
        debug!(vm = %id, "instance without region, dropping");
        return None;
    }
    let Some(family) = machine_family_from_sku(&sku) else {
        debug!(vm = %id, sku = %sku, "unknown machine family, dropping");
        return None;
    };
    let Some(size) = sizes.get(&region).and_then(|by_sku| by_sku.get(&sku)) else {
        debug!(vm = %id, region = %region, sku = %sku, "no size entry, dropping");
        return None;
    };

    let priority = if scale_set.priority.as_deref() == Some("Spot") {
        MachinePriority::Spot
    } else {
        MachinePriority::OnDemand
    };
    let os = if scale_set.has_linux_config {
        MachineOs::Linux
    } else {
        MachineOs::Windows
    };

    Some(VirtualMachineInfo {
        id,
        name: name.to_lowercase(),
        region,
        owning_vmss: scale_set.name.clone(),
        owning_cluster: cluster_name.to_string(),
        sku,
        family,
        os,
        priority,
        num_cores: size.cores,
        mem_mib: size.mem_mib,
        os_disk_mb: size.os_disk_mb,
    })
}
