//! Collector contract
//!
//! A collector turns one slice of cloud state into metrics on demand. It
//! owns its pricing/inventory stores and the metric vectors it emits into;
//! the provider runtime drives it once per scrape.

use async_trait::async_trait;
use prometheus::Registry;
use thiserror::Error;

/// Result type for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors surfaced by a collector during a scrape.
///
/// These are collector-scope failures: the provider runtime logs them and
/// records the scrape-error meta-metric, and the scrape as a whole
/// proceeds. Per-resource misses (a VM without a price, a disk without a
/// tier) are handled inside the collector and never reach this type.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// A cloud-provider API call failed; the previous cache is retained.
    #[error("provider API call failed: {0}")]
    Api(String),

    /// The scrape deadline fired while the collector was still working.
    #[error("scrape deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// Declaring descriptors against the registry failed. Fatal for the
    /// collector at startup.
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("{0}")]
    Internal(String),
}

/// A unit that turns cloud state into metrics on demand.
///
/// Contract:
/// - `name` is a stable identifier, unique within a provider, used as the
///   `collector` label value on meta-metrics.
/// - `register` declares every descriptor the collector may emit. It is
///   invoked once at startup; failure disables the collector.
/// - `collect` is invoked per scrape and must be safe under concurrent
///   invocation by independent scrapes. Implementations serialize access
///   to their stores behind a refresh gate held only for the
///   possibly-refreshing critical section.
///
/// Cancellation is cooperative: the provider runtime wraps `collect` in a
/// deadline, and dropping the future cancels in-flight HTTP/SDK calls.
/// Metrics already written when the deadline fires remain observable.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable identifier used as a label value.
    fn name(&self) -> &'static str;

    /// Declare all descriptors this collector may emit.
    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error>;

    /// Produce metrics for one scrape.
    async fn collect(&self) -> CollectorResult<()>;
}
