//! Types shared by the key rotator crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
