//! Credential selection: least-loaded first, skipping credentials that are
//! cooling down, at their concurrency cap, or already tried on this request.

use std::collections::HashSet;

use crate::error::{RelayError, RelayResult};
use crate::now_ms;
use crate::store::Credential;

use super::guard::ActiveGuard;
use super::CredentialScheduler;

/// A selected credential plus its reserved in-flight slot.
///
/// Dropping the lease releases the slot; the retry loop keeps it alive for
/// the full duration of the upstream call so crashes between success and
/// release cannot leak the active count.
pub struct Lease {
    pub credential: Credential,
    _guard: ActiveGuard,
}

impl CredentialScheduler {
    /// Pick a credential for one request attempt.
    ///
    /// `tried` is the caller's per-request exclusion set; credentials that
    /// fail refresh here are added to it, and the same credential is never
    /// returned twice within one request's retry chain.
    pub async fn acquire(&self, tried: &mut HashSet<String>) -> RelayResult<Lease> {
        loop {
            let enabled = self.enabled.read().await.clone();
            if enabled.is_empty() {
                return Err(RelayError::NoCredentials("no credentials loaded".into()));
            }

            let now = now_ms();
            let mut untried = 0usize;
            let mut cooling = 0usize;
            let mut overloaded = 0usize;
            let mut min_cooldown_remaining: Option<i64> = None;
            let mut best: Option<(u32, Credential)> = None;

            for cred in &enabled {
                if tried.contains(&cred.refresh_token) {
                    continue;
                }
                untried += 1;

                let cooldown = self
                    .stats
                    .get(&cred.refresh_token)
                    .and_then(|s| s.cooldown_until)
                    .filter(|until| *until > now);
                if let Some(until) = cooldown {
                    cooling += 1;
                    let remaining = until - now;
                    min_cooldown_remaining = Some(match min_cooldown_remaining {
                        Some(m) => m.min(remaining),
                        None => remaining,
                    });
                    continue;
                }

                let active = self.active_count(&cred.refresh_token);
                if active >= self.per_token_limit {
                    overloaded += 1;
                    continue;
                }

                // Ties break by file order: strictly-less keeps the earlier one.
                if best.as_ref().map_or(true, |(a, _)| active < *a) {
                    best = Some((active, cred.clone()));
                }
            }

            let Some((_, mut credential)) = best else {
                if untried > 0 && overloaded == 0 && cooling == untried {
                    let secs = min_cooldown_remaining
                        .map(|ms| (ms as u64).div_ceil(1000))
                        .unwrap_or(1);
                    return Err(RelayError::RateLimited {
                        message: format!(
                            "all credentials are cooling down, retry in {secs}s"
                        ),
                        retry_after_secs: Some(secs),
                    });
                }
                if overloaded > 0 {
                    return Err(RelayError::NoCredentials(
                        "per-credential concurrency cap reached".into(),
                    ));
                }
                return Err(RelayError::NoCredentials("no usable credentials".into()));
            };

            // Reserve before returning so concurrent selectors see the slot
            // as taken. Losing the race just re-runs the scan.
            let Some(guard) = ActiveGuard::try_new(
                self.active.clone(),
                credential.refresh_token.clone(),
                self.per_token_limit,
            ) else {
                continue;
            };

            self.with_stats(&credential.refresh_token, |s| s.last_used_time = Some(now));

            if credential.is_access_token_expired(now) {
                match self.refresh_credential(&credential).await {
                    Ok(updated) => credential = updated,
                    Err(failure) => {
                        // Roll back the reservation before recording; the
                        // failure may disable the credential and reload the
                        // enabled set.
                        drop(guard);
                        tracing::warn!(
                            "Refresh failed for credential {}: {failure}",
                            crate::store::token_prefix(&credential.refresh_token)
                        );
                        tried.insert(credential.refresh_token.clone());
                        self.record_failure(&credential.refresh_token, &failure).await;
                        continue;
                    },
                }
            }

            return Ok(Lease { credential, _guard: guard });
        }
    }
}
