//! Terminal-outcome bookkeeping: status transitions, cooldowns and counters.

use std::fmt;

use crate::now_ms;
use crate::store::token_prefix;

use super::stats::{CredentialStatus, LastError, LastOutcome};
use super::CredentialScheduler;

/// What went wrong with one upstream attempt on one credential.
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Upstream (or token endpoint) answered with a non-2xx status.
    Http {
        status: u16,
        body: String,
        /// Wait hint already extracted from the response, in milliseconds.
        retry_after_ms: Option<u64>,
    },
    /// Transport-level failure; no HTTP status was received.
    Network(String),
    /// The response stream broke after it had started.
    Stream(String),
}

impl UpstreamFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, UpstreamFailure::Network(_))
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::Http { status, body, .. } => write!(f, "HTTP {status}: {body}"),
            UpstreamFailure::Network(msg) => write!(f, "network: {msg}"),
            UpstreamFailure::Stream(msg) => write!(f, "stream: {msg}"),
        }
    }
}

/// Fallback cooldown when a 429 carries no wait hint. Deliberately short:
/// the scheduler rotates to the next credential instead of backing off on
/// this one.
const DEFAULT_429_COOLDOWN_MS: u64 = 2000;

impl CredentialScheduler {
    /// Record a successful terminal outcome.
    pub fn record_success(&self, refresh_token: &str) {
        let now = now_ms();
        self.with_stats(refresh_token, |s| {
            s.total_requests += 1;
            s.success_count += 1;
            s.status = CredentialStatus::Active;
            s.cooldown_until = None;
            s.consecutive_429 = 0;
            s.last_outcome = LastOutcome::Success;
            s.last_used_time = Some(now);
        });
    }

    /// Record a failed terminal outcome and apply the status transition.
    ///
    /// A 401/403 disables the credential: persistence is awaited before this
    /// returns, so a disabled credential cannot be reselected through the
    /// window between the failure and the file write.
    pub async fn record_failure(&self, refresh_token: &str, failure: &UpstreamFailure) {
        let now = now_ms();
        let mut disable = false;
        self.with_stats(refresh_token, |s| {
            s.total_requests += 1;
            s.failure_count += 1;
            s.last_error = Some(LastError {
                status: failure.status(),
                message: failure.to_string(),
                timestamp: now,
                is_network_error: failure.is_network(),
            });

            match failure {
                UpstreamFailure::Http { status: 429, retry_after_ms, .. } => {
                    let wait = (*retry_after_ms).unwrap_or(DEFAULT_429_COOLDOWN_MS);
                    s.status = CredentialStatus::RateLimited;
                    s.cooldown_until = Some(now + wait as i64);
                    s.consecutive_429 += 1;
                    s.last_outcome = LastOutcome::RateLimited;
                },
                UpstreamFailure::Http { status: 401 | 403, .. } => {
                    s.status = CredentialStatus::Disabled;
                    s.cooldown_until = None;
                    s.last_outcome = LastOutcome::AuthFailed;
                    disable = true;
                },
                UpstreamFailure::Http { status: 500..=599, .. } => {
                    s.cooldown_until = None;
                    s.consecutive_429 = 0;
                    s.last_outcome = LastOutcome::ServerError;
                },
                UpstreamFailure::Http { .. } => {
                    s.last_outcome = LastOutcome::Error;
                },
                UpstreamFailure::Network(_) => {
                    s.cooldown_until = None;
                    s.consecutive_429 = 0;
                    s.last_outcome = LastOutcome::NetworkError;
                },
                UpstreamFailure::Stream(_) => {
                    s.last_outcome = LastOutcome::Error;
                },
            }
        });

        if disable {
            self.disable_credential(refresh_token).await;
        }
    }

    /// Persist `enable=false` and drop the credential from rotation.
    pub(crate) async fn disable_credential(&self, refresh_token: &str) {
        tracing::warn!(
            "Disabling credential {} after auth failure",
            token_prefix(refresh_token)
        );
        if let Err(e) = self.store.disable(refresh_token).await {
            tracing::error!(
                "Failed to persist disable for credential {}: {e}",
                token_prefix(refresh_token)
            );
        }
        let count = self.load().await;
        tracing::info!("Credential pool reloaded, {count} enabled");
    }
}
