//! Cost Exporter
//!
//! A long-running exporter that serves instantaneous unit cost rates for
//! cloud resources visible to the configured credentials. Each scrape of
//! the metrics endpoint drives the enabled providers' collectors; the
//! expensive pricing and inventory fetches happen on their own refresh
//! cadences behind per-collector stores.

use std::sync::Arc;

use clap::Parser;
use core_config::Environment;
use core_config::tracing::{init_tracing, install_color_eyre};
use eyre::Result;
use tracing::info;

mod config;
mod exporter;
mod server;

use config::Config;
use exporter::Exporter;

#[derive(Parser)]
#[command(name = "cost-exporter")]
#[command(about = "Export cloud cost rates for AWS, Azure, and GCP as Prometheus metrics")]
struct Cli {
    /// Cloud providers to enable (aws, azure, gcp); overrides the environment
    #[arg(short, long, value_delimiter = ',')]
    providers: Option<Vec<String>>,

    /// Address to serve metrics on, e.g. 0.0.0.0:8080
    #[arg(long)]
    listen_address: Option<String>,

    /// Path serving the metric snapshot
    #[arg(long)]
    metrics_path: Option<String>,

    /// Per-collector scrape timeout in seconds
    #[arg(long)]
    scrape_timeout: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(providers) = self.providers {
            config.providers = providers;
        }
        if let Some(listen_address) = self.listen_address {
            config.server.listen_address = listen_address;
        }
        if let Some(metrics_path) = self.metrics_path {
            config.server.metrics_path = metrics_path;
        }
        if let Some(scrape_timeout) = self.scrape_timeout {
            config.scrape_timeout_secs = scrape_timeout;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let mut config = Config::from_env()?;
    Cli::parse().apply(&mut config);

    let environment = Environment::from_env();
    init_tracing(&environment);

    info!(
        providers = ?config.providers,
        listen_address = %config.server.listen_address,
        "starting cost exporter"
    );

    let exporter = Arc::new(Exporter::build(&config).await?);
    if exporter.provider_count() == 0 {
        info!("no providers enabled; serving meta-metrics only");
    }

    let app = server::router(Arc::clone(&exporter), &config.server.metrics_path);
    let listener = tokio::net::TcpListener::bind(&config.server.listen_address).await?;
    info!(
        address = %listener.local_addr()?,
        path = %config.server.metrics_path,
        "metrics server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("cost exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
