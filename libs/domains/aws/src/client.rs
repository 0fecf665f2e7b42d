//! Cost Explorer client wrapper
//!
//! Collectors talk to a narrow trait returning materialized pages; the
//! AWS SDK stays confined to [`CostExplorerClient`]. One call fetches one
//! page so the S3 pricing cache can count API requests per page and mocks
//! can script multi-page sequences.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_costexplorer::types::{
    DateInterval, Dimension, DimensionValues, Expression, Granularity, GroupDefinition,
    GroupDefinitionType,
};
use chrono::NaiveDate;
use tracing::debug;

use crate::error::{AwsError, AwsResult};

const S3_SERVICE_FILTER: &str = "Amazon Simple Storage Service";

/// Closed date interval for a Cost Explorer query, in whole days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One USAGE_TYPE group from a Cost Explorer result, flattened across the
/// daily results of a page. Amounts stay as the API's decimal strings;
/// missing or empty amounts are resolved at aggregation time.
#[derive(Debug, Clone, Default)]
pub struct CostGroup {
    pub key: String,
    pub usage_amount: Option<String>,
    pub usage_unit: Option<String>,
    pub cost_amount: Option<String>,
}

/// One page of `GetCostAndUsage` output.
#[derive(Debug, Clone, Default)]
pub struct CostPage {
    pub groups: Vec<CostGroup>,
    pub next_page_token: Option<String>,
}

/// Paginated Cost Explorer access, one page per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CostAndUsageApi: Send + Sync {
    /// Fetch one page of daily S3 cost-and-usage grouped by USAGE_TYPE.
    async fn cost_and_usage(
        &self,
        period: &BillingPeriod,
        page_token: Option<String>,
    ) -> AwsResult<CostPage>;
}

/// Cost Explorer wrapper over the AWS SDK.
pub struct CostExplorerClient {
    inner: aws_sdk_costexplorer::Client,
}

impl CostExplorerClient {
    /// Build a client from the ambient AWS credential chain, optionally
    /// pinned to a named profile and region.
    pub async fn new(profile: Option<&str>, region: &str) -> AwsResult<Self> {
        if region.is_empty() {
            return Err(AwsError::InvalidConfig("region must not be empty".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Ok(Self {
            inner: aws_sdk_costexplorer::Client::new(&config),
        })
    }
}

#[async_trait]
impl CostAndUsageApi for CostExplorerClient {
    async fn cost_and_usage(
        &self,
        period: &BillingPeriod,
        page_token: Option<String>,
    ) -> AwsResult<CostPage> {
        let time_period = DateInterval::builder()
            .start(period.start.format("%Y-%m-%d").to_string())
            .end(period.end.format("%Y-%m-%d").to_string())
            .build()
            .map_err(|e| AwsError::InvalidConfig(e.to_string()))?;

        let filter = Expression::builder()
            .dimensions(
                DimensionValues::builder()
                    .key(Dimension::Service)
                    .values(S3_SERVICE_FILTER)
                    .build(),
            )
            .build();

        let mut request = self
            .inner
            .get_cost_and_usage()
            .time_period(time_period)
            .granularity(Granularity::Daily)
            .metrics("UsageQuantity")
            .metrics("UnblendedCost")
            .group_by(
                GroupDefinition::builder()
                    .r#type(GroupDefinitionType::Dimension)
                    .key("USAGE_TYPE")
                    .build(),
            )
            .filter(filter);
        if let Some(token) = page_token {
            request = request.next_page_token(token);
        }

        let output = request
            .send()
            .await
            .map_err(|e| AwsError::CostExplorer(e.to_string()))?;

        let mut groups = Vec::new();
        for result in output.results_by_time() {
            for group in result.groups() {
                let Some(key) = group.keys().first() else {
                    debug!("skipping cost group without a key");
                    continue;
                };
                let metrics = group.metrics();
                let usage = metrics.and_then(|m| m.get("UsageQuantity"));
                let cost = metrics.and_then(|m| m.get("UnblendedCost"));
                groups.push(CostGroup {
                    key: key.clone(),
                    usage_amount: usage.and_then(|v| v.amount().map(str::to_string)),
                    usage_unit: usage.and_then(|v| v.unit().map(str::to_string)),
                    cost_amount: cost.and_then(|v| v.amount().map(str::to_string)),
                });
            }
        }

        Ok(CostPage {
            groups,
            next_page_token: output.next_page_token().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_rejects_empty_region() {
        let result = CostExplorerClient::new(None, "").await;
        assert!(matches!(result, Err(AwsError::InvalidConfig(_))));
    }

    #[test]
    fn test_billing_period_formats_as_dates() {
        let period = BillingPeriod {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        };
        assert_eq!(period.start.format("%Y-%m-%d").to_string(), "2024-01-01");
        assert_eq!(period.end.format("%Y-%m-%d").to_string(), "2024-01-31");
    }
}
