//! Upstream authentication conventions
//!
//! Defines the `Provider` trait that decouples the forwarding loop from how a
//! credential travels to the upstream. `QueryKeyProvider` appends the key as a
//! query parameter (the generative-language API default); `HeaderKeyProvider`
//! sends it in a request header instead.
//!
//! Providers also classify upstream statuses. Classification is by status
//! code alone; response bodies are never inspected.

pub mod header_key;
pub mod query_key;

pub use header_key::HeaderKeyProvider;
pub use query_key::QueryKeyProvider;

use reqwest::Url;
use reqwest::header::HeaderMap;

/// What an upstream attempt means for the credential that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Not credential-specific: hand the response to the caller
    Passthrough,
    /// 429, credential hit its rate or usage limit
    QuotaExceeded,
    /// 401/403, upstream refused the credential
    Unauthorized,
    /// No response received (connect error, timeout, reset)
    Transport,
}

impl ErrorClassification {
    /// Whether the credential should be put on cooldown and another tried.
    pub fn rotates(&self) -> bool {
        !matches!(self, ErrorClassification::Passthrough)
    }

    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Passthrough => "ok",
            ErrorClassification::QuotaExceeded => "quota_exceeded",
            ErrorClassification::Unauthorized => "unauthorized",
            ErrorClassification::Transport => "transport",
        }
    }
}

/// Classify an upstream HTTP status.
///
/// 401, 403 and 429 are quota/auth signals; everything else (2xx, 3xx,
/// unrelated 4xx, 5xx) is passed through.
pub fn classify_status(status: u16) -> ErrorClassification {
    match status {
        429 => ErrorClassification::QuotaExceeded,
        401 | 403 => ErrorClassification::Unauthorized,
        _ => ErrorClassification::Passthrough,
    }
}

/// Errors from provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The credential cannot be encoded for this transport. The credential
    /// itself is never included in the message.
    #[error("credential not representable as {0}")]
    Unrepresentable(&'static str),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// How a credential is attached to an outbound upstream request.
///
/// Used as `Arc<dyn Provider>` by the forwarder, so methods stay synchronous
/// and object safe.
pub trait Provider: Send + Sync {
    /// Identifier for logging (e.g. "query", "header")
    fn id(&self) -> &str;

    /// Attach `credential` to the outbound target and/or headers.
    ///
    /// Called once per attempt on a fresh copy of the target URL and headers,
    /// so implementations may overwrite whatever a caller supplied.
    fn attach_credential(
        &self,
        url: &mut Url,
        headers: &mut HeaderMap,
        credential: &str,
    ) -> Result<()>;

    /// Classify an upstream status. Defaults to [`classify_status`].
    fn classify_status(&self, status: u16) -> ErrorClassification {
        classify_status(status)
    }
}
