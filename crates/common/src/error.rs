//! Configuration and startup errors

use thiserror::Error;

/// Errors raised while assembling the rotator configuration.
///
/// All of these are fatal at startup: the listener is never bound when one
/// of them is returned.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No credentials configured: set API_KEYS or pool.keys_file")]
    NoCredentials,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
