use observability::CollectorError;
use thiserror::Error;

/// Result type for AWS domain operations
pub type AwsResult<T> = Result<T, AwsError>;

/// Errors that can occur in the AWS domain
#[derive(Debug, Error)]
pub enum AwsError {
    /// Cost Explorer call failed; recoverable on the next refresh
    #[error("Cost Explorer request failed: {0}")]
    CostExplorer(String),

    /// Credential or client construction failure; fatal at startup
    #[error("Invalid AWS configuration: {0}")]
    InvalidConfig(String),
}

impl From<AwsError> for CollectorError {
    fn from(err: AwsError) -> Self {
        CollectorError::Api(err.to_string())
    }
}
