//! ARM REST wrapper
//!
//! Thin paginated access to the Azure Resource Manager list endpoints the
//! AKS stores need. Each operation follows `nextLink` to exhaustion and
//! returns a materialized slice of flattened resources; collectors never
//! see page links or raw ARM JSON.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::error::{AzureError, AzureResult};

const ARM_ENDPOINT: &str = "https://management.azure.com";
const AKS_API_VERSION: &str = "2024-02-01";
const COMPUTE_API_VERSION: &str = "2024-03-01";
const DISK_API_VERSION: &str = "2024-03-02";

/// An AKS managed cluster.
#[derive(Debug, Clone)]
pub struct ManagedCluster {
    pub id: String,
    pub name: String,
    pub location: String,
    pub node_resource_group: Option<String>,
}

/// A VM scale set, with the profile fields machine classification needs.
#[derive(Debug, Clone)]
pub struct ScaleSet {
    pub name: String,
    pub location: String,
    pub priority: Option<String>,
    pub has_linux_config: bool,
    pub os_disk_size_gb: Option<i64>,
}

/// One VM instance of a scale set.
#[derive(Debug, Clone, Default)]
pub struct ScaleSetVm {
    pub vm_id: Option<String>,
    pub computer_name: Option<String>,
    pub has_instance_view: bool,
    pub sku: Option<String>,
    pub location: Option<String>,
}

/// Size metadata for one machine type in a region.
#[derive(Debug, Clone)]
pub struct MachineTypeInfo {
    pub name: String,
    pub cores: i32,
    pub mem_mib: i32,
    pub os_disk_mb: i64,
}

/// A managed disk with the tags Kubernetes stamps on dynamically
/// provisioned persistent volumes.
#[derive(Debug, Clone, Default)]
pub struct ManagedDisk {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub sku: String,
    pub size_gb: i64,
    pub state: Option<String>,
    pub zone: Option<String>,
    pub managed_by: Option<String>,
    pub tags: HashMap<String, String>,
}

/// Paginated ARM list operations used by the AKS stores.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AzureComputeApi: Send + Sync {
    async fn list_clusters_in_subscription(&self) -> AzureResult<Vec<ManagedCluster>>;

    async fn list_scale_sets_from_resource_group(
        &self,
        resource_group: &str,
    ) -> AzureResult<Vec<ScaleSet>>;

    async fn list_scale_set_owned_vms(
        &self,
        resource_group: &str,
        scale_set: &str,
    ) -> AzureResult<Vec<ScaleSetVm>>;

    async fn list_machine_types_by_location(
        &self,
        location: &str,
    ) -> AzureResult<Vec<MachineTypeInfo>>;

    async fn list_disks_in_subscription(&self) -> AzureResult<Vec<ManagedDisk>>;
}

/// ARM REST client bound to one subscription.
pub struct ArmClient {
    http: Client,
    token: Arc<TokenProvider>,
    subscription_id: String,
}

impl ArmClient {
    pub fn new(subscription_id: &str, token: Arc<TokenProvider>) -> AzureResult<Self> {
        if subscription_id.is_empty() {
            return Err(AzureError::InvalidConfig(
                "subscription id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            http: Client::new(),
            token,
            subscription_id: subscription_id.to_string(),
        })
    }

    async fn get_paged<T: DeserializeOwned>(&self, first_url: String) -> AzureResult<Vec<T>> {
        let mut items = Vec::new();
        let mut url = Some(first_url);

        while let Some(current) = url {
            let token = self.token.bearer().await?;
            let response = self.http.get(&current).bearer_auth(token).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AzureError::Api(format!(
                    "ARM returned status {status} for {current}"
                )));
            }

            let page: ArmPage<T> = response
                .json()
                .await
                .map_err(|e| AzureError::Api(e.to_string()))?;
            items.extend(page.value);
            url = page.next_link;
        }

        Ok(items)
    }
}

#[async_trait]
impl AzureComputeApi for ArmClient {
    async fn list_clusters_in_subscription(&self) -> AzureResult<Vec<ManagedCluster>> {
        let url = format!(
            "{ARM_ENDPOINT}/subscriptions/{}/providers/Microsoft.ContainerService/managedClusters?api-version={AKS_API_VERSION}",
            self.subscription_id
        );
        let resources: Vec<ClusterResource> = self.get_paged(url).await?;
        debug!(count = resources.len(), "listed managed clusters");
        Ok(resources.into_iter().map(ManagedCluster::from).collect())
    }

    async fn list_scale_sets_from_resource_group(
        &self,
        resource_group: &str,
    ) -> AzureResult<Vec<ScaleSet>> {
        let url = format!(
            "{ARM_ENDPOINT}/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachineScaleSets?api-version={COMPUTE_API_VERSION}",
            self.subscription_id
        );
        let resources: Vec<VmssResource> = self.get_paged(url).await?;
        Ok(resources.into_iter().map(ScaleSet::from).collect())
    }

    async fn list_scale_set_owned_vms(
        &self,
        resource_group: &str,
        scale_set: &str,
    ) -> AzureResult<Vec<ScaleSetVm>> {
        let url = format!(
            "{ARM_ENDPOINT}/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachineScaleSets/{scale_set}/virtualMachines?api-version={COMPUTE_API_VERSION}&$expand=instanceView",
            self.subscription_id
        );
        let resources: Vec<VmssVmResource> = self.get_paged(url).await?;
        Ok(resources.into_iter().map(ScaleSetVm::from).collect())
    }

    async fn list_machine_types_by_location(
        &self,
        location: &str,
    ) -> AzureResult<Vec<MachineTypeInfo>> {
        let url = format!(
            "{ARM_ENDPOINT}/subscriptions/{}/providers/Microsoft.Compute/locations/{location}/vmSizes?api-version={COMPUTE_API_VERSION}",
            self.subscription_id
        );
        let resources: Vec<VmSizeResource> = self.get_paged(url).await?;
        Ok(resources.into_iter().map(MachineTypeInfo::from).collect())
    }

    async fn list_disks_in_subscription(&self) -> AzureResult<Vec<ManagedDisk>> {
        let url = format!(
            "{ARM_ENDPOINT}/subscriptions/{}/providers/Microsoft.Compute/disks?api-version={DISK_API_VERSION}",
            self.subscription_id
        );
        let resources: Vec<DiskResource> = self.get_paged(url).await?;
        Ok(resources.into_iter().map(ManagedDisk::from).collect())
    }
}

/// Extract the resource group from a full ARM resource id. ARM casing is
/// inconsistent across providers, so the segment match ignores case.
pub fn resource_group_from_id(id: &str) -> String {
    let mut segments = id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next().unwrap_or_default().to_string();
        }
    }
    String::new()
}

// ---- wire types -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ArmPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterResource {
    id: String,
    name: String,
    location: String,
    properties: Option<ClusterProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterProperties {
    node_resource_group: Option<String>,
}

impl From<ClusterResource> for ManagedCluster {
    fn from(resource: ClusterResource) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            location: resource.location,
            node_resource_group: resource.properties.and_then(|p| p.node_resource_group),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VmssResource {
    name: String,
    location: String,
    properties: Option<VmssProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmssProperties {
    virtual_machine_profile: Option<VmssVmProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmssVmProfile {
    priority: Option<String>,
    os_profile: Option<VmssOsProfile>,
    storage_profile: Option<VmssStorageProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmssOsProfile {
    linux_configuration: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmssStorageProfile {
    os_disk: Option<VmssOsDisk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmssOsDisk {
    disk_size_gb: Option<i64>,
}

impl From<VmssResource> for ScaleSet {
    fn from(resource: VmssResource) -> Self {
        let profile = resource.properties.and_then(|p| p.virtual_machine_profile);
        let (priority, has_linux_config, os_disk_size_gb) = match profile {
            Some(profile) => (
                profile.priority,
                profile
                    .os_profile
                    .is_some_and(|os| os.linux_configuration.is_some()),
                profile
                    .storage_profile
                    .and_then(|s| s.os_disk)
                    .and_then(|d| d.disk_size_gb),
            ),
            None => (None, false, None),
        };
        Self {
            name: resource.name,
            location: resource.location,
            priority,
            has_linux_config,
            os_disk_size_gb,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VmssVmResource {
    sku: Option<ResourceSku>,
    location: Option<String>,
    properties: Option<VmssVmProperties>,
}

#[derive(Debug, Deserialize)]
struct ResourceSku {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmssVmProperties {
    vm_id: Option<String>,
    os_profile: Option<VmOsProfile>,
    instance_view: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmOsProfile {
    computer_name: Option<String>,
}

impl From<VmssVmResource> for ScaleSetVm {
    fn from(resource: VmssVmResource) -> Self {
        let (vm_id, computer_name, has_instance_view) = match resource.properties {
            Some(properties) => (
                properties.vm_id,
                properties.os_profile.and_then(|os| os.computer_name),
                properties.instance_view.is_some(),
            ),
            None => (None, None, false),
        };
        Self {
            vm_id,
            computer_name,
            has_instance_view,
            sku: resource.sku.and_then(|s| s.name),
            location: resource.location,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmSizeResource {
    name: String,
    number_of_cores: i32,
    memory_in_mb: i32,
    os_disk_size_in_mb: Option<i64>,
}

impl From<VmSizeResource> for MachineTypeInfo {
    fn from(resource: VmSizeResource) -> Self {
        Self {
            name: resource.name,
            cores: resource.number_of_cores,
            mem_mib: resource.memory_in_mb,
            os_disk_mb: resource.os_disk_size_in_mb.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiskResource {
    id: String,
    name: String,
    location: String,
    #[serde(rename = "managedBy")]
    managed_by: Option<String>,
    sku: Option<ResourceSku>,
    zones: Option<Vec<String>>,
    tags: Option<HashMap<String, String>>,
    properties: Option<DiskProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskProperties {
    disk_size_gb: Option<i64>,
    disk_state: Option<String>,
}

impl From<DiskResource> for ManagedDisk {
    fn from(resource: DiskResource) -> Self {
        let resource_group = resource_group_from_id(&resource.id);
        let (size_gb, state) = match resource.properties {
            Some(properties) => (
                properties.disk_size_gb.unwrap_or_default(),
                properties.disk_state,
            ),
            None => (0, None),
        };
        Self {
            id: resource.id,
            name: resource.name,
            resource_group,
            location: resource.location,
            sku: resource.sku.and_then(|s| s.name).unwrap_or_default(),
            size_gb,
            state,
            zone: resource.zones.and_then(|z| z.into_iter().next()),
            managed_by: resource.managed_by,
            tags: resource.tags.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_resource_parses_node_resource_group() {
        let raw = r#"{
            "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/prod",
            "name": "prod",
            "location": "westus",
            "properties": { "nodeResourceGroup": "MC_rg_prod_westus" }
        }"#;
        let cluster: ManagedCluster = serde_json::from_str::<ClusterResource>(raw).unwrap().into();
        assert_eq!(cluster.name, "prod");
        assert_eq!(cluster.location, "westus");
        assert_eq!(cluster.node_resource_group.as_deref(), Some("MC_rg_prod_westus"));
    }

    #[test]
    fn test_vmss_resource_classifies_linux_and_priority() {
        let raw = r#"{
            "name": "aks-nodepool1",
            "location": "westus",
            "properties": {
                "virtualMachineProfile": {
                    "priority": "Spot",
                    "osProfile": { "linuxConfiguration": { "disablePasswordAuthentication": true } },
                    "storageProfile": { "osDisk": { "diskSizeGB": 128 } }
                }
            }
        }"#;
        let vmss: ScaleSet = serde_json::from_str::<VmssResource>(raw).unwrap().into();
        assert_eq!(vmss.priority.as_deref(), Some("Spot"));
        assert!(vmss.has_linux_config);
        assert_eq!(vmss.os_disk_size_gb, Some(128));
    }

    #[test]
    fn test_vmss_resource_without_profile_defaults_to_windows() {
        let raw = r#"{ "name": "pool", "location": "westus" }"#;
        let vmss: ScaleSet = serde_json::from_str::<VmssResource>(raw).unwrap().into();
        assert!(!vmss.has_linux_config);
        assert!(vmss.priority.is_none());
    }

    #[test]
    fn test_vmss_vm_resource_flattens_instance_view() {
        let raw = r#"{
            "sku": { "name": "Standard_D4s_v3" },
            "location": "westus",
            "properties": {
                "vmId": "abc-123",
                "osProfile": { "computerName": "AKS-NodePool1-000000" },
                "instanceView": { "osName": "ubuntu" }
            }
        }"#;
        let vm: ScaleSetVm = serde_json::from_str::<VmssVmResource>(raw).unwrap().into();
        assert_eq!(vm.vm_id.as_deref(), Some("abc-123"));
        assert_eq!(vm.computer_name.as_deref(), Some("AKS-NodePool1-000000"));
        assert!(vm.has_instance_view);
        assert_eq!(vm.sku.as_deref(), Some("Standard_D4s_v3"));
    }

    #[test]
    fn test_vmss_vm_resource_without_instance_view() {
        let raw = r#"{
            "sku": { "name": "Standard_D4s_v3" },
            "properties": { "vmId": "abc-123" }
        }"#;
        let vm: ScaleSetVm = serde_json::from_str::<VmssVmResource>(raw).unwrap().into();
        assert!(!vm.has_instance_view);
        assert!(vm.computer_name.is_none());
    }

    #[test]
    fn test_vm_size_resource_parses_dimensions() {
        let raw = r#"{
            "name": "Standard_D4s_v3",
            "numberOfCores": 4,
            "memoryInMB": 16384,
            "osDiskSizeInMB": 1047552
        }"#;
        let size: MachineTypeInfo = serde_json::from_str::<VmSizeResource>(raw).unwrap().into();
        assert_eq!(size.name, "Standard_D4s_v3");
        assert_eq!(size.cores, 4);
        assert_eq!(size.mem_mib, 16384);
        assert_eq!(size.os_disk_mb, 1047552);
    }

    #[test]
    fn test_disk_resource_parses_tags_and_group() {
        let raw = r#"{
            "id": "/subscriptions/sub/resourceGroups/MC_rg_prod_westus/providers/Microsoft.Compute/disks/pvc-1234",
            "name": "pvc-1234",
            "location": "westus",
            "managedBy": "/subscriptions/sub/resourceGroups/MC_rg_prod_westus/providers/Microsoft.Compute/virtualMachines/vm0",
            "sku": { "name": "Premium_LRS" },
            "zones": ["1"],
            "tags": { "kubernetes.io-created-for-pv-name": "pvc-1234" },
            "properties": { "diskSizeGB": 1024, "diskState": "Attached" }
        }"#;
        let disk: ManagedDisk = serde_json::from_str::<DiskResource>(raw).unwrap().into();
        assert_eq!(disk.resource_group, "MC_rg_prod_westus");
        assert_eq!(disk.sku, "Premium_LRS");
        assert_eq!(disk.size_gb, 1024);
        assert_eq!(disk.state.as_deref(), Some("Attached"));
        assert_eq!(disk.zone.as_deref(), Some("1"));
        assert_eq!(
            disk.tags.get("kubernetes.io-created-for-pv-name").map(String::as_str),
            Some("pvc-1234")
        );
    }

    #[test]
    fn test_arm_page_defaults_value_to_empty() {
        let page: ArmPage<ClusterResource> = serde_json::from_str(r#"{}"#).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }

    #[test]
    fn test_resource_group_from_id() {
        assert_eq!(
            resource_group_from_id("/subscriptions/s/resourceGroups/my-rg/providers/x/y/z"),
            "my-rg"
        );
        assert_eq!(
            resource_group_from_id("/subscriptions/s/resourcegroups/other/providers/x"),
            "other"
        );
        assert_eq!(resource_group_from_id("/subscriptions/s"), "");
    }

    #[test]
    fn test_arm_client_rejects_empty_subscription() {
        let token = Arc::new(TokenProvider::new("t", "c", "s").unwrap());
        assert!(ArmClient::new("", token).is_err());
    }
}
