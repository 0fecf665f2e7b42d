//! GCP Domain
//!
//! Cost-rate collectors for Google Cloud, built on the same store
//! discipline as the Azure collectors: a billing-catalog pricing map and
//! an inventory map, each refreshed on its own cadence and read under
//! brief locks during a scrape.

pub mod client;
pub mod error;
pub mod gcs;
pub mod gke;
pub mod pricing;

pub use client::{
    BillingCatalogApi, CatalogClient, CatalogSku, ComputeApi, GcpRestClient, StorageApi,
    TokenSource,
};
pub use error::{GcpError, GcpResult};
pub use gcs::{GcsCollector, GcsIntervals};
pub use gke::{GkeCollector, GkeIntervals};
