//! Service-specific error types

use thiserror::Error;

/// Startup errors for the key rotator.
///
/// Per-request failures (pool exhausted, upstream unreachable, unreadable
/// body) are answered by the forwarder as HTTP responses and never
/// propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] common::Error),

    #[error("Credential pool error: {0}")]
    Pool(#[from] key_pool::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Invalid header name: {0}")]
    InvalidHeader(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::from(common::Error::NoCredentials).to_string(),
            "No credentials configured: set API_KEYS or pool.keys_file"
        );
        assert_eq!(
            Error::from(key_pool::Error::Empty).to_string(),
            "Credential pool error: credential pool requires at least one credential"
        );
        assert!(
            Error::InvalidHeader("bad header".into())
                .to_string()
                .contains("bad header")
        );
    }

    #[test]
    fn error_debug_includes_variant_name() {
        let err = Error::InvalidHeader("x y".into());
        let debug = format!("{err:?}");
        assert!(
            debug.contains("InvalidHeader"),
            "Debug output must include variant name, got: {debug}"
        );
    }
}
