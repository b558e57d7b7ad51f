//! Error types for provider construction, invocation and retrieval.
//!
//! Every provider-facing error carries the originating provider id, and the
//! taxonomy separates what a caller can fix (missing credentials, unknown
//! model) from what a retry can fix (timeouts, rate limits, 5xx responses).
//! [`LlmError::is_transient`] is the single predicate the invocation-path
//! retry loop consults; configuration-shaped errors are never retried.

use thiserror::Error;

use crate::index::ScoredChunk;

/// Result type for all crate operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors produced by the provider abstraction and retrieval pipeline.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Credentials for a provider are incomplete. Names every missing field.
    #[error("provider '{provider}' is not configured: missing {}", missing.join(", "))]
    Configuration {
        provider: String,
        missing: Vec<String>,
    },

    /// Provider id is not present in the registry.
    #[error("unknown provider: '{provider}'")]
    UnknownProvider { provider: String },

    /// Model id is not in the provider's catalog (and the catalog is not open).
    #[error("model '{model}' is not available for provider '{provider}'")]
    UnsupportedModel { provider: String, model: String },

    /// Client construction failed (malformed endpoint, bad project id, ...).
    #[error("failed to initialize provider '{provider}': {reason}")]
    ProviderInitialization { provider: String, reason: String },

    /// The provider rejected our credentials.
    #[error("authentication failed for provider '{provider}': {message}")]
    Auth { provider: String, message: String },

    /// Malformed request parameters (local validation or provider-side 400).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider asked us to slow down.
    #[error("rate limited by provider '{provider}': {message}")]
    RateLimited { provider: String, message: String },

    /// The remote call timed out.
    #[error("request to provider '{provider}' timed out")]
    Timeout { provider: String },

    /// Transport-level failure (DNS, connect, TLS).
    #[error("network error talking to provider '{provider}': {message}")]
    Network { provider: String, message: String },

    /// Provider-side error response (5xx and friends).
    #[error("provider '{provider}' returned an error: {message}")]
    Api { provider: String, message: String },

    /// Operation not supported by this provider.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Query embedding dimension differs from the index dimension.
    #[error("embedding dimension mismatch: index has {expected}, query model produced {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Batch embedding failed mid-build; `embedded` chunks made it in before
    /// the failure, so the caller can decide to retry just the remainder.
    #[error("embedding with provider '{provider}' failed after {embedded} chunks: {message}")]
    Embedding {
        provider: String,
        embedded: usize,
        message: String,
    },

    /// Answer generation failed after retrieval succeeded. The retrieved
    /// chunks ride along so callers can surface partial diagnostics.
    #[error("answer generation with provider '{provider}' failed: {message}")]
    Generation {
        provider: String,
        message: String,
        retrieved: Vec<ScoredChunk>,
    },

    /// Failed to encode a request or decode a response body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    /// Map a transport error onto the taxonomy, tagging the provider id.
    pub fn transport(provider: impl Into<String>, err: reqwest::Error) -> Self {
        let provider = provider.into();
        if err.is_timeout() {
            LlmError::Timeout { provider }
        } else if err.is_connect() {
            LlmError::Network {
                provider,
                message: format!("connection failed: {err}"),
            }
        } else {
            LlmError::Network {
                provider,
                message: err.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(
        provider: impl Into<String>,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        let provider = provider.into();
        let message = body.trim().to_string();
        match status.as_u16() {
            401 | 403 => LlmError::Auth { provider, message },
            429 => LlmError::RateLimited { provider, message },
            400 | 404 | 422 => LlmError::InvalidRequest(format!(
                "provider '{provider}' rejected the request ({status}): {message}"
            )),
            _ => LlmError::Api {
                provider,
                message: format!("{status}: {message}"),
            },
        }
    }

    /// Whether a bounded-backoff retry might succeed.
    ///
    /// Timeouts, transport failures, rate limits and provider-side 5xx are
    /// transient; everything the caller must fix first is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout { .. }
                | LlmError::Network { .. }
                | LlmError::RateLimited { .. }
                | LlmError::Api { .. }
        )
    }

    /// The provider id this error originated from, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            LlmError::Configuration { provider, .. }
            | LlmError::UnknownProvider { provider }
            | LlmError::UnsupportedModel { provider, .. }
            | LlmError::ProviderInitialization { provider, .. }
            | LlmError::Auth { provider, .. }
            | LlmError::RateLimited { provider, .. }
            | LlmError::Timeout { provider }
            | LlmError::Network { provider, .. }
            | LlmError::Api { provider, .. }
            | LlmError::Embedding { provider, .. }
            | LlmError::Generation { provider, .. } => Some(provider),
            _ => None,
        }
    }
}
