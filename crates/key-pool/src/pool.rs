//! Round-robin selection and cooldown bookkeeping
//!
//! The pool owns one `CredentialState` per key, by position, plus a rotation
//! cursor. Both sit behind a single mutex so the scan-then-advance in
//! `select` is one critical section. Two concurrent requests may still pick
//! the same key before either marks it exhausted; the upstream rejects both
//! and each request rotates locally.
//!
//! Time comes from `tokio::time::Instant`, so tests drive cooldowns with
//! paused time instead of sleeping.

use std::time::Duration;

use common::Secret;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Cooldown applied by `mark_exhausted` when the caller passes no override.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Upper bound on any cooldown, keeps `Instant` arithmetic in range.
const MAX_COOLDOWN: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Exclusion state of a single credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialState {
    exhausted_until: Option<Instant>,
}

/// Where a credential stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Never exhausted, or cleared after recovering
    Active,
    /// Was exhausted, cooldown has elapsed
    Recovered,
    /// Must not be selected yet
    CoolingDown { remaining: Duration },
}

impl CredentialState {
    pub fn availability(&self, now: Instant) -> Availability {
        match self.exhausted_until {
            None => Availability::Active,
            Some(until) if now >= until => Availability::Recovered,
            Some(until) => Availability::CoolingDown {
                remaining: until - now,
            },
        }
    }

    pub fn is_available(&self, now: Instant) -> bool {
        match self.availability(now) {
            Availability::Active | Availability::Recovered => true,
            Availability::CoolingDown { .. } => false,
        }
    }
}

/// A credential picked for one upstream attempt.
#[derive(Debug)]
pub struct SelectedCredential<'a> {
    pub index: usize,
    pub credential: &'a Secret<String>,
}

/// Per-slot entry of a `PoolStatus` report. Never carries the key itself.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub index: usize,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

/// Pool summary for health and statistics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// "healthy" (all available), "degraded" (some) or "unhealthy" (none)
    pub status: &'static str,
    pub total: usize,
    pub available: usize,
    pub exhausted: usize,
    pub credentials: Vec<SlotStatus>,
}

struct Rotation {
    cursor: usize,
    slots: Vec<CredentialState>,
}

/// Fixed-size pool of API keys with round-robin selection.
///
/// Keys are immutable after construction; only the rotation cursor and the
/// per-slot cooldowns change. Construct one per upstream and share it via
/// `Arc`; independent pools never interact.
pub struct CredentialPool {
    credentials: Vec<Secret<String>>,
    rotation: Mutex<Rotation>,
    default_cooldown: Duration,
}

impl CredentialPool {
    /// Build a pool over `credentials`, in order. Fails if the list is empty.
    pub fn new(credentials: Vec<Secret<String>>, default_cooldown: Duration) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::Empty);
        }
        let slots = vec![CredentialState::default(); credentials.len()];
        info!(
            credentials = credentials.len(),
            cooldown_secs = default_cooldown.as_secs(),
            "credential pool initialized"
        );
        Ok(Self {
            credentials,
            rotation: Mutex::new(Rotation { cursor: 0, slots }),
            default_cooldown,
        })
    }

    /// Select the next usable credential, starting at the cursor.
    ///
    /// Scans at most `count_total()` slots in cyclic order. On a hit the
    /// cursor moves to the slot after the selected one. Returns `None`
    /// without touching the cursor when every slot is cooling down.
    pub async fn select(&self) -> Option<SelectedCredential<'_>> {
        let now = Instant::now();
        let n = self.credentials.len();
        let mut rotation = self.rotation.lock().await;

        for offset in 0..n {
            let index = (rotation.cursor + offset) % n;
            match rotation.slots[index].availability(now) {
                Availability::Active => {}
                Availability::Recovered => {
                    info!(index, "cooldown expired, credential available again");
                    rotation.slots[index] = CredentialState::default();
                }
                Availability::CoolingDown { .. } => continue,
            }

            rotation.cursor = (index + 1) % n;
            debug!(index, "credential selected");
            return Some(SelectedCredential {
                index,
                credential: &self.credentials[index],
            });
        }

        debug!(total = n, "no credential available");
        None
    }

    /// Exclude a credential from selection for `cooldown`, or the pool
    /// default when `None`.
    ///
    /// Always overwrites any earlier cooldown with `now + cooldown`. An
    /// out-of-range index is logged and ignored.
    pub async fn mark_exhausted(&self, index: usize, cooldown: Option<Duration>) {
        let cooldown = cooldown.unwrap_or(self.default_cooldown).min(MAX_COOLDOWN);
        let mut rotation = self.rotation.lock().await;
        let Some(slot) = rotation.slots.get_mut(index) else {
            warn!(
                index,
                total = self.credentials.len(),
                "mark_exhausted on unknown credential index"
            );
            return;
        };
        slot.exhausted_until = Some(Instant::now() + cooldown);
        info!(
            index,
            cooldown_secs = cooldown.as_secs(),
            "credential entering cooldown"
        );
    }

    pub fn count_total(&self) -> usize {
        self.credentials.len()
    }

    /// Number of slots selectable at `now`.
    pub async fn count_available(&self, now: Instant) -> usize {
        let rotation = self.rotation.lock().await;
        rotation
            .slots
            .iter()
            .filter(|slot| slot.is_available(now))
            .count()
    }

    /// `count_total() - count_available(now)`.
    pub async fn count_exhausted(&self, now: Instant) -> usize {
        self.count_total() - self.count_available(now).await
    }

    /// Index the next scan starts from.
    pub async fn cursor(&self) -> usize {
        self.rotation.lock().await.cursor
    }

    /// Copy of every slot's state, by index.
    pub async fn states(&self) -> Vec<CredentialState> {
        self.rotation.lock().await.slots.clone()
    }

    /// Summary with per-slot status. Remaining cooldowns round up to whole
    /// seconds so a cooling slot never reports 0.
    pub async fn status(&self) -> PoolStatus {
        let now = Instant::now();
        let states = self.states().await;

        let credentials: Vec<SlotStatus> = states
            .iter()
            .enumerate()
            .map(|(index, state)| match state.availability(now) {
                Availability::Active | Availability::Recovered => SlotStatus {
                    index,
                    status: "available",
                    cooldown_remaining_secs: None,
                },
                Availability::CoolingDown { remaining } => SlotStatus {
                    index,
                    status: "exhausted",
                    cooldown_remaining_secs: Some(remaining.as_secs_f64().ceil() as u64),
                },
            })
            .collect();

        let total = credentials.len();
        let available = credentials
            .iter()
            .filter(|slot| slot.cooldown_remaining_secs.is_none())
            .count();
        let status = if available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        PoolStatus {
            status,
            total,
            available,
            exhausted: total - available,
            credentials,
        }
    }
}
