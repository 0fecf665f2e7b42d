//! Observability plumbing for the cost exporter.
//!
//! This crate provides:
//! - The [`Collector`] contract every cloud-cost collector implements
//! - The [`Provider`] runtime that fans a scrape out across collectors
//!   and records per-collector meta-metrics
//! - Prometheus text exposition for the scrape endpoint
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{Provider, ScrapeMetrics, encode_metrics};
//! use prometheus::Registry;
//!
//! let registry = Registry::new();
//! let meta = ScrapeMetrics::new(&registry)?;
//! let provider = Provider::new("azure", collectors, timeout, meta);
//! provider.register(&registry)?;
//!
//! // per scrape:
//! provider.collect().await;
//! let body = encode_metrics(&registry)?;
//! ```

pub mod collector;
pub mod provider;
pub mod store;

pub use collector::{Collector, CollectorError, CollectorResult};
pub use provider::{Provider, ScrapeMetrics};
pub use store::CachedStore;

use prometheus::{Encoder, Registry, TextEncoder};

/// Render a registry snapshot in the Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, CollectorError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| CollectorError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Gauge, Registry};

    #[test]
    fn test_encode_metrics_renders_registered_gauge() {
        let registry = Registry::new();
        let gauge = Gauge::new("test_gauge", "a test gauge").unwrap();
        gauge.set(4.2);
        registry.register(Box::new(gauge)).unwrap();

        let body = encode_metrics(&registry).unwrap();
        assert!(body.contains("# HELP test_gauge a test gauge"));
        assert!(body.contains("test_gauge 4.2"));
    }

    #[test]
    fn test_encode_metrics_empty_registry() {
        let registry = Registry::new();
        let body = encode_metrics(&registry).unwrap();
        assert!(body.is_empty());
    }
}
