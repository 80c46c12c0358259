use thiserror::Error;

/// Errors surfaced by provider adapters. The router folds every one of
/// these into its fallback chain; callers of `route` never see them.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed response: {0}")]
    ResponseFormat(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::RequestFailed(format!("request timed out: {err}"))
        } else {
            ProviderError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ResponseFormat(err.to_string())
    }
}
