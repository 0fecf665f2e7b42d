use observability::CollectorError;
use thiserror::Error;

/// Result type for GCP domain operations
pub type GcpResult<T> = Result<T, GcpError>;

/// Errors that can occur in the GCP domain
#[derive(Debug, Error)]
pub enum GcpError {
    /// No catalog rate for the (region, family) pair; the resource is
    /// omitted from the scrape
    #[error("Price not found for {0}")]
    PriceNotFound(String),

    /// Catalog or inventory call failed; recoverable on the next refresh
    #[error("GCP API request failed: {0}")]
    Api(String),

    /// Token acquisition failed
    #[error("GCP authentication failed: {0}")]
    Auth(String),

    /// Missing project or API key; fatal at startup
    #[error("Invalid GCP configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<GcpError> for CollectorError {
    fn from(err: GcpError) -> Self {
        CollectorError::Api(err.to_string())
    }
}
