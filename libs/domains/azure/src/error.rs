use observability::CollectorError;
use thiserror::Error;

/// Result type for Azure domain operations
pub type AzureResult<T> = Result<T, AzureError>;

/// Errors that can occur in the Azure domain
#[derive(Debug, Error)]
pub enum AzureError {
    /// No inventory entry for the VM id; the resource is omitted from the
    /// scrape
    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    /// No retail price under (region, priority, os, sku); the VM is
    /// omitted from the scrape
    #[error("Price information not found for {0}")]
    PriceNotFound(String),

    /// No managed-disk price under (tier, region); the disk is omitted
    /// from the scrape
    #[error("Disk price not found for {0}")]
    DiskPriceNotFound(String),

    /// ARM or Retail Prices call failed; recoverable on the next refresh
    #[error("Azure API request failed: {0}")]
    Api(String),

    /// Token acquisition failed
    #[error("Azure authentication failed: {0}")]
    Auth(String),

    /// Missing or malformed credentials/subscription; fatal at startup
    #[error("Invalid Azure configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<AzureError> for CollectorError {
    fn from(err: AzureError) -> Self {
        CollectorError::Api(err.to_string())
    }
}
