//! Error Taxonomy and Retry Logic
//!
//! Every fallible operation in the crate returns [`CatalogError`]. The core
//! never retries on its own; entry points that talk to a remote catalog can
//! wrap a call in [`with_retry`] and let [`ErrorCategory`] decide whether a
//! failure is worth another attempt.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Result alias used throughout the crate
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// Failures surfaced by catalog, mapping and document operations
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog answered with a non-success status
    #[error("catalog request failed ({status}): {message}")]
    Backend { status: u16, message: String },

    /// A workflow-gated asset could not be returned to an editable state
    #[error("asset {asset} is not editable: {message}")]
    Permission { asset: String, message: String },

    /// A lookup that must resolve did not
    #[error("not found: {0}")]
    NotFound(String),

    /// A document or result violated an expected structural invariant
    #[error("structural inconsistency: {0}")]
    Structural(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid mapping pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unsupported asset type '{0}'")]
    Unsupported(String),

    #[error("xml error: {0}")]
    Xml(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<quick_xml::Error> for CatalogError {
    fn from(err: quick_xml::Error) -> Self {
        CatalogError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CatalogError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        CatalogError::Xml(err.to_string())
    }
}

impl CatalogError {
    /// Build a backend error from a status code and any displayable body
    pub fn backend(status: u16, message: impl std::fmt::Display) -> Self {
        CatalogError::Backend {
            status,
            message: message.to_string(),
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            CatalogError::Http(e) if e.is_timeout() => ErrorCategory::Timeout,
            CatalogError::Http(_) => ErrorCategory::Network,
            CatalogError::Backend { status, .. } if *status >= 500 => ErrorCategory::Network,
            CatalogError::Backend { .. } => ErrorCategory::Backend,
            CatalogError::Permission { .. } => ErrorCategory::Permission,
            CatalogError::NotFound(_) => ErrorCategory::Lookup,
            CatalogError::Structural(_) | CatalogError::Xml(_) => ErrorCategory::Validation,
            CatalogError::Config(_)
            | CatalogError::InvalidPattern { .. }
            | CatalogError::Unsupported(_)
            | CatalogError::Toml(_) => ErrorCategory::Configuration,
            CatalogError::Io(_) | CatalogError::Csv(_) => ErrorCategory::FileSystem,
            CatalogError::Json(_) => ErrorCategory::Validation,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying only errors whose category is retryable
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempts >= policy.max_attempts || !e.category().is_retryable() {
                    return Err(e);
                }

                tracing::warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "catalog call failed, retrying in {:?}",
                    delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Categorized error types for reporting and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport failures and server-side errors (retryable)
    Network,

    /// Timeouts (retryable)
    Timeout,

    /// Client-side rejections from the catalog
    Backend,

    /// Workflow gate refused an edit
    Permission,

    /// Identity or context did not resolve
    Lookup,

    FileSystem,

    Configuration,

    /// Malformed documents or payloads
    Validation,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Timeout)
    }

    /// Short operator-facing hints for the CLI
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ErrorCategory::Network | ErrorCategory::Timeout => &[
                "Check that the catalog host and port are reachable",
                "Verify the certificate supplied in CATALOG_CERT",
            ],
            ErrorCategory::Backend => &["Review the request payload logged at debug level"],
            ErrorCategory::Permission => &["Check the asset's workflow state and your role"],
            ErrorCategory::Lookup => &[
                "Check the identity mappings for the asset's type",
                "Confirm the asset exists in the target environment",
            ],
            ErrorCategory::FileSystem => &["Verify the path exists and is writable"],
            ErrorCategory::Configuration => &[
                "Review the configuration file and CATALOG_* environment variables",
            ],
            ErrorCategory::Validation => &["Confirm the input document was exported by the catalog"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_categorization() {
        let server = CatalogError::backend(503, "unavailable");
        assert_eq!(server.category(), ErrorCategory::Network);

        let client = CatalogError::backend(400, "bad query");
        assert_eq!(client.category(), ErrorCategory::Backend);

        let missing = CatalogError::NotFound("term::x".into());
        assert_eq!(missing.category(), ErrorCategory::Lookup);
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
        assert!(!ErrorCategory::Permission.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CatalogError::Config("missing host".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_server_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::default(), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(CatalogError::backend(502, "gateway"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
