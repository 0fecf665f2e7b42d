//! AWS Domain
//!
//! Cost-rate collectors for AWS. The only collector today is S3, whose
//! rates come from Cost Explorer billing data: Cost Explorer is billed
//! per call, so the collector keeps a pricing map refreshed on a slow
//! cadence and serves scrapes from that cache.

pub mod billing;
pub mod client;
pub mod error;
pub mod s3;

pub use billing::{BillingData, Pricing, parse_billing_key};
pub use client::{BillingPeriod, CostAndUsageApi, CostExplorerClient, CostGroup, CostPage};
pub use error::{AwsError, AwsResult};
pub use s3::S3Collector;
