//! Per-credential counters and the aggregated stats payload served on
//! `/api/stats`.

use serde::Serialize;

use crate::now_ms;
use crate::store::token_prefix;

use super::CredentialScheduler;

/// Live per-credential counters. Lazily created, in-memory only.
#[derive(Debug, Default, Clone)]
pub(crate) struct CredentialStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub refresh_count: u64,
    /// Epoch millis of the last time the credential was handed out.
    pub last_used_time: Option<i64>,
    pub last_error: Option<LastError>,
    pub status: CredentialStatus,
    /// Absolute epoch millis before which the credential is not selectable.
    pub cooldown_until: Option<i64>,
    pub consecutive_429: u32,
    pub last_outcome: LastOutcome,
}

impl CredentialStats {
    pub fn is_cooling(&self, now: i64) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LastError {
    pub status: Option<u16>,
    pub message: String,
    pub timestamp: i64,
    pub is_network_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[default]
    Idle,
    Active,
    RateLimited,
    Disabled,
}

/// Classification of the most recent terminal event on a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LastOutcome {
    #[default]
    Unused,
    Success,
    RateLimited,
    AuthFailed,
    ServerError,
    NetworkError,
    Error,
}

/// One row of the stats payload, file order preserved, disabled included.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatsRow {
    /// First ten characters of the refresh token.
    pub token: String,
    pub enabled: bool,
    pub active_count: u32,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub refresh_count: u64,
    /// Percentage with one decimal, 0.0 when unused.
    pub success_rate: f64,
    pub last_used_time: Option<i64>,
    /// Real-time status overlay: disabled > active > rate_limited > idle.
    pub status: CredentialStatus,
    pub last_status: LastOutcome,
    pub cooldown_until: Option<i64>,
    pub consecutive_429: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub active: usize,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub refresh_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllStats {
    pub summary: StatsSummary,
    pub credentials: Vec<CredentialStatsRow>,
}

impl CredentialScheduler {
    /// Snapshot every credential in the file (disabled included, file order
    /// preserved) together with the aggregate summary.
    pub fn get_all_stats(&self) -> AllStats {
        let now = now_ms();
        let records = self.store.read_records();
        let mut rows = Vec::with_capacity(records.len());
        let mut summary = StatsSummary {
            total: records.len(),
            enabled: 0,
            disabled: 0,
            active: 0,
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            refresh_count: 0,
        };

        for record in &records {
            let stats = self
                .stats
                .get(&record.refresh_token)
                .map(|s| s.value().clone())
                .unwrap_or_default();
            let active_count = self.active_count(&record.refresh_token);

            let status = if !record.enable || stats.status == CredentialStatus::Disabled {
                CredentialStatus::Disabled
            } else if active_count > 0 {
                CredentialStatus::Active
            } else if stats.is_cooling(now) {
                CredentialStatus::RateLimited
            } else {
                CredentialStatus::Idle
            };

            let success_rate = if stats.total_requests == 0 {
                0.0
            } else {
                let pct = stats.success_count as f64 / stats.total_requests as f64 * 100.0;
                (pct * 10.0).round() / 10.0
            };

            match status {
                CredentialStatus::Disabled => summary.disabled += 1,
                CredentialStatus::Active => {
                    summary.enabled += 1;
                    summary.active += 1;
                },
                _ => summary.enabled += 1,
            }
            summary.total_requests += stats.total_requests;
            summary.success_count += stats.success_count;
            summary.failure_count += stats.failure_count;
            summary.refresh_count += stats.refresh_count;

            rows.push(CredentialStatsRow {
                token: token_prefix(&record.refresh_token),
                enabled: record.enable,
                active_count,
                total_requests: stats.total_requests,
                success_count: stats.success_count,
                failure_count: stats.failure_count,
                refresh_count: stats.refresh_count,
                success_rate,
                last_used_time: stats.last_used_time,
                status,
                last_status: stats.last_outcome,
                cooldown_until: stats.cooldown_until.filter(|until| *until > now),
                consecutive_429: stats.consecutive_429,
                last_error: stats
                    .last_error
                    .as_ref()
                    .map(|e| serde_json::to_value(e).unwrap_or_default()),
                remark: record.remark.clone(),
            });
        }

        AllStats { summary, credentials: rows }
    }
}
