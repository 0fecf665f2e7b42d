//! Azure Retail Prices wrapper
//!
//! The Retail Prices API is public and unauthenticated:
//! https://docs.microsoft.com/en-us/rest/api/cost-management/retail-prices/azure-retail-prices
//! One call fetches the full filtered price sheet, following
//! `NextPageLink` to exhaustion. Broad server-side filters plus
//! client-side narrowing beat many narrow queries on observed latency, so
//! the stores pass a coarse `$filter` and do the rest themselves.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AzureError, AzureResult};

/// Azure Retail Prices API endpoint
const RETAIL_PRICES_API: &str = "https://prices.azure.com/api/retail/prices";
const RETAIL_API_VERSION: &str = "2023-01-01-preview";

/// Coarse filter for the VM price sheet; product/sku narrowing is client-side.
pub const VIRTUAL_MACHINES_FILTER: &str =
    "serviceName eq 'Virtual Machines' and priceType eq 'Consumption'";

/// Coarse filter for the managed-disk price sheet.
pub const MANAGED_DISK_FILTER: &str =
    "serviceName eq 'Storage' and contains(productName, 'Managed Disk') and priceType eq 'Consumption'";

#[derive(Debug, Deserialize)]
struct RetailPriceResponse {
    #[serde(rename = "Items")]
    items: Vec<RetailPrice>,
    #[serde(rename = "NextPageLink")]
    next_page_link: Option<String>,
}

/// One retail price sheet line item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetailPrice {
    #[serde(rename = "retailPrice")]
    pub retail_price: f64,
    #[serde(rename = "armRegionName")]
    pub arm_region_name: String,
    #[serde(rename = "location")]
    pub location: String,
    #[serde(rename = "meterName")]
    pub meter_name: String,
    #[serde(rename = "productName")]
    pub product_name: String,
    #[serde(rename = "skuName")]
    pub sku_name: String,
    #[serde(rename = "armSkuName")]
    pub arm_sku_name: Option<String>,
    #[serde(rename = "unitOfMeasure")]
    pub unit_of_measure: String,
}

/// Filtered retail price listing; pagination is encapsulated here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetailPricesApi: Send + Sync {
    async fn list_prices(&self, filter: &str) -> AzureResult<Vec<RetailPrice>>;
}

/// Reqwest-backed Retail Prices client.
pub struct RetailPricesClient {
    http: Client,
}

impl RetailPricesClient {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }
}

impl Default for RetailPricesClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetailPricesApi for RetailPricesClient {
    async fn list_prices(&self, filter: &str) -> AzureResult<Vec<RetailPrice>> {
        let mut items = Vec::new();
        let mut url = Some(format!(
            "{RETAIL_PRICES_API}?api-version={RETAIL_API_VERSION}&meterRegion='primary'&$filter={}",
            urlencoding::encode(filter)
        ));

        while let Some(current) = url {
            let response = self.http.get(&current).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AzureError::Api(format!(
                    "Retail Prices API returned status {status}"
                )));
            }

            let page: RetailPriceResponse = response
                .json()
                .await
                .map_err(|e| AzureError::Api(e.to_string()))?;
            items.extend(page.items);
            url = page.next_page_link.filter(|link| !link.is_empty());
        }

        debug!(count = items.len(), filter = filter, "listed retail prices");
        Ok(items)
    }
}
