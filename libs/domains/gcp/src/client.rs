//! GCP API wrappers
//!
//! Three narrow paginated wrappers: the Cloud Billing catalog (API-key
//! addressable, https://cloud.google.com/billing/docs/reference/rest/v1/services.skus),
//! the Compute Engine aggregated instance list, and the Cloud Storage
//! bucket list. Inventory calls carry a bearer token from the metadata
//! server (workload identity) or a static override.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{GcpError, GcpResult};

/// GCP Cloud Billing API endpoint
const GCP_BILLING_API: &str = "https://cloudbilling.googleapis.com/v1";
const GCP_COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";
const GCP_STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Compute Engine billing catalog service.
pub const COMPUTE_ENGINE_SERVICE: &str = "services/6F81-5844-456A";
/// Cloud Storage billing catalog service.
pub const CLOUD_STORAGE_SERVICE: &str = "services/95FF-2EF5-5EA1";

const TOKEN_EXPIRY_MARGIN_SECS: i64 = 120;

/// One catalog SKU, flattened to the fields pricing maps consume. The
/// unit price is the first tiered rate in USD.
#[derive(Debug, Clone, Default)]
pub struct CatalogSku {
    pub sku_id: String,
    pub description: String,
    pub resource_family: String,
    pub resource_group: String,
    pub usage_type: String,
    pub service_regions: Vec<String>,
    pub usage_unit: String,
    pub unit_price: f64,
}

/// One running Compute Engine instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceInfo {
    pub name: String,
    pub zone: String,
    pub region: String,
    pub machine_type: String,
    pub family: String,
    pub cluster: Option<String>,
    pub spot: bool,
}

/// One Cloud Storage bucket.
#[derive(Debug, Clone, Default)]
pub struct BucketInfo {
    pub name: String,
    pub location: String,
    pub storage_class: String,
}

/// Paginated billing-catalog SKU listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingCatalogApi: Send + Sync {
    async fn list_skus(&self, service: &str) -> GcpResult<Vec<CatalogSku>>;
}

/// Paginated instance inventory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_instances(&self, project: &str) -> GcpResult<Vec<InstanceInfo>>;
}

/// Paginated bucket inventory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_buckets(&self, project: &str) -> GcpResult<Vec<BucketInfo>>;
}

/// Bearer-token source: a static token from configuration, or the GCE
/// metadata server when running with workload identity.
pub struct TokenSource {
    http: Client,
    static_token: Option<String>,
    cache: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(TOKEN_EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: i64,
}

impl TokenSource {
    pub fn new(static_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            static_token: static_token.filter(|t| !t.is_empty()),
            cache: RwLock::new(None),
        }
    }

    pub async fn bearer(&self) -> GcpResult<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let now = Utc::now();
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(now) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GcpError::Auth(format!(
                "metadata server returned status {}",
                response.status()
            )));
        }
        let body: MetadataTokenResponse = response
            .json()
            .await
            .map_err(|e| GcpError::Auth(e.to_string()))?;

        let token = body.access_token.clone();
        *cache = Some(CachedToken {
            token: body.access_token,
            expires_at: Utc::now() + TimeDelta::seconds(body.expires_in),
        });
        Ok(token)
    }
}

/// Billing-catalog client; the catalog is addressable with an API key.
pub struct CatalogClient {
    http: Client,
    api_key: String,
}

impl CatalogClient {
    pub fn new(api_key: &str) -> GcpResult<Self> {
        if api_key.is_empty() {
            return Err(GcpError::InvalidConfig("API key must not be empty".to_string()));
        }
        Ok(Self {
            http: Client::new(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl BillingCatalogApi for CatalogClient {
    async fn list_skus(&self, service: &str) -> GcpResult<Vec<CatalogSku>> {
        let mut skus = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{GCP_BILLING_API}/{service}/skus?key={}", self.api_key);
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={token}"));
            }

            let response = self.http.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(GcpError::Api(format!(
                    "billing catalog returned status {status}"
                )));
            }
            let page: SkuListResponse = response
                .json()
                .await
                .map_err(|e| GcpError::Api(e.to_string()))?;

            skus.extend(page.skus.unwrap_or_default().into_iter().map(CatalogSku::from));
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        debug!(service = service, count = skus.len(), "listed catalog skus");
        Ok(skus)
    }
}

/// Compute/Storage inventory client carrying a bearer token.
pub struct GcpRestClient {
    http: Client,
    token: TokenSource,
}

impl GcpRestClient {
    pub fn new(token: TokenSource) -> Self {
        Self {
            http: Client::new(),
            token,
        }
    }
}

#[async_trait]
impl ComputeApi for GcpRestClient {
    async fn list_instances(&self, project: &str) -> GcpResult<Vec<InstanceInfo>> {
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{GCP_COMPUTE_API}/projects/{project}/aggregated/instances");
            if let Some(token) = &page_token {
                url.push_str(&format!("?pageToken={token}"));
            }

            let bearer = self.token.bearer().await?;
            let response = self.http.get(&url).bearer_auth(bearer).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(GcpError::Api(format!(
                    "instance listing returned status {status}"
                )));
            }
            let page: AggregatedInstancesResponse = response
                .json()
                .await
                .map_err(|e| GcpError::Api(e.to_string()))?;

            for scope in page.items.unwrap_or_default().into_values() {
                for instance in scope.instances.unwrap_or_default() {
                    if let Some(info) = InstanceInfo::from_wire(instance) {
                        instances.push(info);
                    }
                }
            }
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        debug!(project = project, count = instances.len(), "listed instances");
        Ok(instances)
    }
}

#[async_trait]
impl StorageApi for GcpRestClient {
    async fn list_buckets(&self, project: &str) -> GcpResult<Vec<BucketInfo>> {
        let mut buckets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{GCP_STORAGE_API}/b?project={project}");
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={token}"));
            }

            let bearer = self.token.bearer().await?;
            let response = self.http.get(&url).bearer_auth(bearer).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(GcpError::Api(format!(
                    "bucket listing returned status {status}"
                )));
            }
            let page: BucketListResponse = response
                .json()
                .await
                .map_err(|e| GcpError::Api(e.to_string()))?;

            buckets.extend(page.items.unwrap_or_default().into_iter().map(|b| BucketInfo {
                name: b.name,
                location: b.location.to_lowercase(),
                storage_class: b.storage_class,
            }));
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        debug!(project = project, count = buckets.len(), "listed buckets");
        Ok(buckets)
    }
}

// ---- wire types -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SkuListResponse {
    skus: Option<Vec<WireSku>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSku {
    #[serde(rename = "skuId")]
    sku_id: String,
    description: String,
    category: Option<WireCategory>,
    #[serde(rename = "serviceRegions")]
    service_regions: Option<Vec<String>>,
    #[serde(rename = "pricingInfo")]
    pricing_info: Option<Vec<WirePricingInfo>>,
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    #[serde(rename = "resourceFamily")]
    resource_family: Option<String>,
    #[serde(rename = "resourceGroup")]
    resource_group: Option<String>,
    #[serde(rename = "usageType")]
    usage_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePricingInfo {
    #[serde(rename = "pricingExpression")]
    pricing_expression: Option<WirePricingExpression>,
}

#[derive(Debug, Deserialize)]
struct WirePricingExpression {
    #[serde(rename = "usageUnit")]
    usage_unit: String,
    #[serde(rename = "tieredRates")]
    tiered_rates: Option<Vec<WireTieredRate>>,
}

#[derive(Debug, Deserialize)]
struct WireTieredRate {
    #[serde(rename = "unitPrice")]
    unit_price: Option<WireMoney>,
}

#[derive(Debug, Deserialize)]
struct WireMoney {
    units: Option<String>,
    nanos: Option<i64>,
}

impl From<WireSku> for CatalogSku {
    fn from(sku: WireSku) -> Self {
        let (usage_unit, unit_price) = sku
            .pricing_info
            .as_ref()
            .and_then(|info| info.first())
            .and_then(|info| info.pricing_expression.as_ref())
            .map(|expression| {
                let price = expression
                    .tiered_rates
                    .as_ref()
                    .and_then(|rates| rates.iter().rev().find_map(|r| r.unit_price.as_ref()))
                    .map(|money| {
                        let units: i64 = money
                            .units
                            .as_deref()
                            .and_then(|u| u.parse().ok())
                            .unwrap_or(0);
                        units as f64 + money.nanos.unwrap_or(0) as f64 / 1e9
                    })
                    .unwrap_or(0.0);
                (expression.usage_unit.clone(), price)
            })
            .unwrap_or_default();

        let category = sku.category;
        Self {
            sku_id: sku.sku_id,
            description: sku.description,
            resource_family: category
                .as_ref()
                .and_then(|c| c.resource_family.clone())
                .unwrap_or_default(),
            resource_group: category
                .as_ref()
                .and_then(|c| c.resource_group.clone())
                .unwrap_or_default(),
            usage_type: category
                .and_then(|c| c.usage_type)
                .unwrap_or_default(),
            service_regions: sku.service_regions.unwrap_or_default(),
            usage_unit,
            unit_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AggregatedInstancesResponse {
    items: Option<HashMap<String, InstanceScope>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceScope {
    instances: Option<Vec<WireInstance>>,
}

#[derive(Debug, Deserialize)]
struct WireInstance {
    name: Option<String>,
    status: Option<String>,
    zone: Option<String>,
    #[serde(rename = "machineType")]
    machine_type: Option<String>,
    scheduling: Option<WireScheduling>,
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct WireScheduling {
    #[serde(rename = "provisioningModel")]
    provisioning_model: Option<String>,
    preemptible: Option<bool>,
}

/// Trailing path segment of a GCP resource URL.
fn url_tail(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Zone name to region: strip the trailing `-<letter>` suffix.
fn region_from_zone(zone: &str) -> &str {
    match zone.rfind('-') {
        Some(idx) => &zone[..idx],
        None => zone,
    }
}

impl InstanceInfo {
    fn from_wire(instance: WireInstance) -> Option<Self> {
        if instance.status.as_deref() != Some("RUNNING") {
            return None;
        }
        let name = instance.name?;
        let zone = url_tail(instance.zone.as_deref()?).to_string();
        let machine_type = url_tail(instance.machine_type.as_deref()?).to_string();
        let family = machine_type
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string();
        let region = region_from_zone(&zone).to_string();
        let spot = instance.scheduling.as_ref().is_some_and(|s| {
            s.provisioning_model.as_deref() == Some("SPOT") || s.preemptible == Some(true)
        });
        let cluster = instance
            .labels
            .and_then(|mut labels| labels.remove("goog-k8s-cluster-name"));

        Some(Self {
            name,
            zone,
            region,
            machine_type,
            family,
            cluster,
            spot,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BucketListResponse {
    items: Option<Vec<WireBucket>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireBucket {
    name: String,
    location: String,
    #[serde(rename = "storageClass")]
    storage_class: String,
}
