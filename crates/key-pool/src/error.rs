//! Error types for pool construction

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential pool requires at least one credential")]
    Empty,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
