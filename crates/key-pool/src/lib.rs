//! Credential pool for upstream API keys
//!
//! Holds a fixed, ordered set of API keys and selects them round-robin,
//! skipping keys that are cooling down after a quota or auth failure.
//!
//! Key lifecycle:
//! 1. Loaded at startup, active
//! 2. Selected round-robin; the cursor moves past every pick, success or not
//! 3. Upstream rejects the key (401/403/429 or transport failure) →
//!    `mark_exhausted`, skipped until the cooldown elapses
//! 4. Cooldown elapses → selectable again on the next scan
//!
//! State lives in memory only and resets on restart.

pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::{
    Availability, CredentialPool, CredentialState, DEFAULT_COOLDOWN, PoolStatus, SelectedCredential,
    SlotStatus,
};
