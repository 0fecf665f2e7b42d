//! Provider runtime
//!
//! One [`Provider`] per enabled cloud. It owns that cloud's collectors,
//! fans a scrape out across them with a per-collector deadline, and
//! records the scrape meta-metrics regardless of each collector's outcome.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::stream::{FuturesUnordered, StreamExt};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, error};

use crate::collector::{Collector, CollectorError};

const META_LABELS: &[&str] = &["provider", "collector"];

/// Per-collector scrape meta-metrics, shared by every provider runtime in
/// the process so the descriptors register exactly once.
pub struct ScrapeMetrics {
    last_scrape_error: GaugeVec,
    last_scrape_duration: GaugeVec,
    last_scrape_time: GaugeVec,
}

impl ScrapeMetrics {
    /// Create and register the meta-metric descriptors.
    pub fn new(registry: &Registry) -> Result<Arc<Self>, prometheus::Error> {
        let last_scrape_error = GaugeVec::new(
            Opts::new(
                "cloudcost_exporter_collector_last_scrape_error",
                "Whether the last scrape of the collector failed (1) or succeeded (0).",
            ),
            META_LABELS,
        )?;
        let last_scrape_duration = GaugeVec::new(
            Opts::new(
                "cloudcost_exporter_collector_last_scrape_duration_seconds",
                "Duration of the last scrape of the collector in seconds.",
            ),
            META_LABELS,
        )?;
        let last_scrape_time = GaugeVec::new(
            Opts::new(
                "cloudcost_exporter_collector_last_scrape_time",
                "Time of the last scrape of the collector, in seconds since the epoch.",
            ),
            META_LABELS,
        )?;

        registry.register(Box::new(last_scrape_error.clone()))?;
        registry.register(Box::new(last_scrape_duration.clone()))?;
        registry.register(Box::new(last_scrape_time.clone()))?;

        Ok(Arc::new(Self {
            last_scrape_error,
            last_scrape_duration,
            last_scrape_time,
        }))
    }

    fn record(&self, provider: &str, collector: &str, elapsed: Duration, failed: bool) {
        let labels = &[provider, collector];
        self.last_scrape_error
            .with_label_values(labels)
            .set(if failed { 1.0 } else { 0.0 });
        self.last_scrape_duration
            .with_label_values(labels)
            .set(elapsed.as_secs_f64());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.last_scrape_time.with_label_values(labels).set(now);
    }
}

/// Aggregator of collectors for one cloud provider.
pub struct Provider {
    name: &'static str,
    collectors: Vec<Arc<dyn Collector>>,
    scrape_timeout: Duration,
    metrics: Arc<ScrapeMetrics>,
}

impl Provider {
    pub fn new(
        name: &'static str,
        collectors: Vec<Arc<dyn Collector>>,
        scrape_timeout: Duration,
        metrics: Arc<ScrapeMetrics>,
    ) -> Self {
        Self {
            name,
            collectors,
            scrape_timeout,
            metrics,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    /// Declare descriptors for every owned collector. Invoked once at
    /// startup; a failure here disables the whole provider.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        for collector in &self.collectors {
            collector.register(registry)?;
            debug!(
                provider = self.name,
                collector = collector.name(),
                "registered collector metrics"
            );
        }
        Ok(())
    }

    /// Run one scrape across all collectors concurrently.
    ///
    /// A collector's failure is logged and surfaced only through the
    /// scrape-error meta-metric; it never aborts the other collectors in
    /// the same scrape. Each collector is bounded by the provider's scrape
    /// timeout; a fired deadline cancels its in-flight calls.
    pub async fn collect(&self) {
        let mut tasks = FuturesUnordered::new();

        for collector in &self.collectors {
            let collector = Arc::clone(collector);
            let timeout = self.scrape_timeout;
            tasks.push(async move {
                let start = Instant::now();
                let outcome = match tokio::time::timeout(timeout, collector.collect()).await {
                    Ok(result) => result,
                    Err(_) => Err(CollectorError::DeadlineExceeded(timeout)),
                };
                (collector, start.elapsed(), outcome)
            });
        }

        while let Some((collector, elapsed, outcome)) = tasks.next().await {
            let failed = outcome.is_err();
            if let Err(e) = outcome {
                error!(
                    provider = self.name,
                    collector = collector.name(),
                    error = %e,
                    "collector scrape failed"
                );
            } else {
                debug!(
                    provider = self.name,
                    collector = collector.name(),
                    duration_seconds = elapsed.as_secs_f64(),
                    "collector scrape complete"
                );
            }
            self.metrics
                .record(self.name, collector.name(), elapsed, failed);
        }
    }
}
