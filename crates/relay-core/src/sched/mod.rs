//! Credential scheduler: picks a credential per request, tracks in-flight
//! counts, cooldowns and statistics, refreshes expired access tokens and
//! retires credentials whose refresh token has died.

mod guard;
mod outcome;
mod refresh;
pub mod retry_after;
mod selection;
mod stats;

pub use guard::ActiveGuard;
pub use outcome::UpstreamFailure;
pub use selection::Lease;
pub use stats::{AllStats, CredentialStatsRow, CredentialStatus, LastOutcome, StatsSummary};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::store::{Credential, CredentialStore};
use stats::CredentialStats;

pub struct CredentialScheduler {
    pub(crate) store: Arc<CredentialStore>,
    /// Enabled credentials in file order.
    pub(crate) enabled: RwLock<Vec<Credential>>,
    /// Per-credential counters and cooldown state, keyed by refresh token.
    /// Created lazily on first reference, never persisted.
    pub(crate) stats: DashMap<String, CredentialStats>,
    /// refresh_token -> in-flight request count.
    pub(crate) active: Arc<DashMap<String, AtomicU32>>,
    pub(crate) per_token_limit: u32,
    pub(crate) http: reqwest::Client,
}

impl CredentialScheduler {
    pub fn new(store: Arc<CredentialStore>, per_token_limit: u32, http: reqwest::Client) -> Self {
        Self {
            store,
            enabled: RwLock::new(Vec::new()),
            stats: DashMap::new(),
            active: Arc::new(DashMap::new()),
            per_token_limit: per_token_limit.max(1),
            http,
        }
    }

    /// Load (or reload) the enabled set from the store.
    pub async fn load(&self) -> usize {
        let creds = self.store.load().await;
        let count = creds.len();
        *self.enabled.write().await = creds;
        count
    }

    pub async fn enabled_count(&self) -> usize {
        self.enabled.read().await.len()
    }

    pub fn active_count(&self, refresh_token: &str) -> u32 {
        self.active
            .get(refresh_token)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Sum of in-flight requests across the pool.
    pub fn total_active(&self) -> u32 {
        self.active.iter().map(|e| e.value().load(Ordering::Acquire)).sum()
    }

    pub(crate) fn with_stats<R>(
        &self,
        refresh_token: &str,
        f: impl FnOnce(&mut CredentialStats) -> R,
    ) -> R {
        let mut entry = self
            .stats
            .entry(refresh_token.to_string())
            .or_default();
        f(entry.value_mut())
    }
}

#[cfg(test)]
mod tests;
