//! Per-credential counters and a recent-call log for `/stats`
//!
//! Fed by the forwarder after every upstream attempt. Credentials appear only
//! by pool index. Counters live in memory and reset on restart.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use key_pool::PoolStatus;
use serde::Serialize;
use tokio::sync::Mutex;

/// Attempts kept in the recent-call log.
pub const RECENT_CAPACITY: usize = 100;

/// One upstream attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    /// Unix time in milliseconds
    pub timestamp_ms: u64,
    pub request_id: String,
    pub index: usize,
    /// `None` when no response was received
    pub status: Option<u16>,
    pub outcome: &'static str,
    pub duration_ms: u64,
    pub method: String,
    /// Inbound path without the query string
    pub path: String,
}

impl AttemptRecord {
    fn is_error(&self) -> bool {
        self.status.is_none_or(|status| status >= 400)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    requests: u64,
    errors: u64,
}

#[derive(Debug, Serialize)]
pub struct CredentialReport {
    pub index: usize,
    pub requests: u64,
    pub errors: u64,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub total_attempts: u64,
    pub total_errors: u64,
    pub credentials: Vec<CredentialReport>,
    /// Newest first
    pub recent: Vec<AttemptRecord>,
}

struct Inner {
    counters: Vec<Counters>,
    recent: VecDeque<AttemptRecord>,
}

pub struct Stats {
    inner: Mutex<Inner>,
}

impl Stats {
    pub fn new(credentials: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: vec![Counters::default(); credentials],
                recent: VecDeque::with_capacity(RECENT_CAPACITY),
            }),
        }
    }

    pub async fn record(&self, record: AttemptRecord) {
        let mut inner = self.inner.lock().await;
        if let Some(counters) = inner.counters.get_mut(record.index) {
            counters.requests += 1;
            if record.is_error() {
                counters.errors += 1;
            }
        }
        if inner.recent.len() == RECENT_CAPACITY {
            inner.recent.pop_front();
        }
        inner.recent.push_back(record);
    }

    /// Merge counters with the pool's current per-slot status.
    pub async fn report(&self, pool: &PoolStatus) -> StatsReport {
        let inner = self.inner.lock().await;
        let credentials = pool
            .credentials
            .iter()
            .map(|slot| {
                let counters = inner.counters.get(slot.index).copied().unwrap_or_default();
                CredentialReport {
                    index: slot.index,
                    requests: counters.requests,
                    errors: counters.errors,
                    status: slot.status,
                    cooldown_remaining_secs: slot.cooldown_remaining_secs,
                }
            })
            .collect();

        StatsReport {
            total_attempts: inner.counters.iter().map(|c| c.requests).sum(),
            total_errors: inner.counters.iter().map(|c| c.errors).sum(),
            credentials,
            recent: inner.recent.iter().rev().cloned().collect(),
        }
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
