//! Durable credential storage: a single JSON file of refresh-token accounts.
//!
//! All writes go through one async mutex so concurrent writers observe
//! strictly sequential durability; reads bypass the lock. The persisted
//! shape ([`CredentialRecord`]) and the runtime snapshot ([`Credential`])
//! are separate types so the ephemeral `session_id` can never leak to disk.

mod project_id;

pub use project_id::generate_project_id;

use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

fn default_enable() -> bool {
    true
}

/// One persisted account, exactly the on-disk shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Opaque OAuth refresh token; the stable identity of the account.
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: String,
    /// Access-token lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    /// Epoch millis when the access token was issued.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Assigned exactly once on first load and never changed after.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

/// In-memory snapshot of an enabled account, handed out by the scheduler.
///
/// Carries the per-process `session_id` on top of the persisted fields.
#[derive(Debug, Clone)]
pub struct Credential {
    pub refresh_token: String,
    pub access_token: String,
    pub expires_in: i64,
    pub timestamp: i64,
    pub project_id: String,
    pub remark: Option<String>,
    /// Ephemeral negative identifier regenerated on every process start.
    pub session_id: i64,
}

impl Credential {
    /// Whether the access token is expired (or within the 5-minute skew).
    pub fn is_access_token_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.timestamp + self.expires_in * 1000 - 300_000
    }

    fn from_record(record: &CredentialRecord) -> Self {
        Self {
            refresh_token: record.refresh_token.clone(),
            access_token: record.access_token.clone(),
            expires_in: record.expires_in,
            timestamp: record.timestamp,
            project_id: record.project_id.clone().unwrap_or_default(),
            remark: record.remark.clone(),
            session_id: new_session_id(),
        }
    }
}

/// Signed-negative session identifier, magnitude capped below 9×10^18.
fn new_session_id() -> i64 {
    -(rand::thread_rng().gen_range(1..=9_000_000_000_000_000_000i64))
}

pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the file without taking the write lock. Missing or unparsable
    /// files degrade to an empty list; the scheduler then fails requests
    /// with a "no credentials" error rather than the process refusing to
    /// start.
    pub fn read_records(&self) -> Vec<CredentialRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Credential file {} unreadable: {e}", self.path.display());
                return Vec::new();
            },
        };
        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Credential file {} unparsable: {e}", self.path.display());
                Vec::new()
            },
        }
    }

    /// Load the enabled credential set.
    ///
    /// Records missing a `project_id` get one assigned and persisted before
    /// any snapshot is produced, so the identifier is stable from the very
    /// first request. Every returned snapshot carries a fresh `session_id`.
    pub async fn load(&self) -> Vec<Credential> {
        let mut records = self.read_records();

        let mut assigned = 0usize;
        for record in records.iter_mut() {
            if record.project_id.as_deref().map_or(true, str::is_empty) {
                record.project_id = Some(generate_project_id());
                assigned += 1;
            }
        }
        if assigned > 0 {
            tracing::info!("Assigned project_id to {assigned} credential(s)");
            if let Err(e) = self.write_records(&records).await {
                tracing::error!("Failed to persist project_id assignments: {e}");
            }
        }

        records
            .iter()
            .filter(|r| r.enable)
            .map(Credential::from_record)
            .collect()
    }

    /// Overlay `updated` onto the file by `refresh_token` match and write
    /// back. Snapshots are reduced to their persistent fields here, so
    /// `session_id` is stripped by construction.
    pub async fn save_all(&self, updated: &[Credential]) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_records();
        for cred in updated {
            if let Some(record) =
                records.iter_mut().find(|r| r.refresh_token == cred.refresh_token)
            {
                record.access_token = cred.access_token.clone();
                record.expires_in = cred.expires_in;
                record.timestamp = cred.timestamp;
                record.project_id = Some(cred.project_id.clone());
                record.remark = cred.remark.clone();
            }
        }
        self.write_records_locked(&records)
    }

    /// Mark one credential disabled and persist. The caller is expected to
    /// reload its enabled set afterwards.
    pub async fn disable(&self, refresh_token: &str) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_records();
        match records.iter_mut().find(|r| r.refresh_token == refresh_token) {
            Some(record) => record.enable = false,
            None => return Err(format!("credential {} not found", token_prefix(refresh_token))),
        }
        self.write_records_locked(&records)
    }

    /// Update the remark of the `index`-th record in the full on-disk list
    /// (disabled records included).
    pub async fn update_remark(&self, index: usize, remark: &str) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_records();
        match records.get_mut(index) {
            Some(record) => {
                record.remark = if remark.is_empty() { None } else { Some(remark.to_string()) }
            },
            None => return Err(format!("credential index {index} out of range")),
        }
        self.write_records_locked(&records)
    }

    async fn write_records(&self, records: &[CredentialRecord]) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        self.write_records_locked(records)
    }

    /// Temp-file-and-rename write; callers must hold `write_lock`.
    fn write_records_locked(&self, records: &[CredentialRecord]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| format!("failed to serialize credentials: {e}"))?;
        let temp_path = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&temp_path, content) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(format!("failed to write {}: {e}", temp_path.display()));
        }
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            format!("failed to replace {}: {e}", self.path.display())
        })
    }
}

/// First ten characters of a refresh token, for logs and stats rows.
pub fn token_prefix(refresh_token: &str) -> String {
    refresh_token.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(records: &[CredentialRecord]) -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, serde_json::to_string_pretty(records).unwrap()).unwrap();
        (dir, CredentialStore::new(path))
    }

    fn record(token: &str) -> CredentialRecord {
        CredentialRecord {
            refresh_token: token.to_string(),
            access_token: "at".to_string(),
            expires_in: 3600,
            timestamp: 0,
            enable: true,
            project_id: None,
            remark: None,
        }
    }

    #[tokio::test]
    async fn test_load_assigns_and_persists_project_ids() {
        let (_dir, store) = store_with(&[record("tok-a"), record("tok-b")]);
        let creds = store.load().await;
        assert_eq!(creds.len(), 2);
        for cred in &creds {
            assert!(!cred.project_id.is_empty());
            let parts: Vec<&str> = cred.project_id.split('-').collect();
            assert_eq!(parts.len(), 3);
            assert_eq!(parts[2].len(), 5);
        }

        // Second load must see the same identifiers, not regenerate them.
        let ids: Vec<String> = creds.iter().map(|c| c.project_id.clone()).collect();
        let again = store.load().await;
        let ids_again: Vec<String> = again.iter().map(|c| c.project_id.clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[tokio::test]
    async fn test_load_skips_disabled() {
        let mut disabled = record("tok-dead");
        disabled.enable = false;
        let (_dir, store) = store_with(&[record("tok-a"), disabled]);
        let creds = store.load().await;
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].refresh_token, "tok-a");
    }

    #[tokio::test]
    async fn test_session_id_is_negative_and_not_persisted() {
        let (_dir, store) = store_with(&[record("tok-a")]);
        let creds = store.load().await;
        assert!(creds[0].session_id < 0);
        assert!(creds[0].session_id >= -9_000_000_000_000_000_000);

        store.save_all(&creds).await.unwrap();
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(!content.contains("session_id"));
    }

    #[tokio::test]
    async fn test_save_all_overlays_by_refresh_token() {
        let (_dir, store) = store_with(&[record("tok-a"), record("tok-b")]);
        let mut creds = store.load().await;
        creds[0].access_token = "fresh".to_string();
        creds[0].timestamp = 42;
        store.save_all(&creds).await.unwrap();

        let records = store.read_records();
        assert_eq!(records[0].access_token, "fresh");
        assert_eq!(records[0].timestamp, 42);
        assert_eq!(records[1].access_token, "at");
    }

    #[tokio::test]
    async fn test_disable_persists_and_survives_reload() {
        let (_dir, store) = store_with(&[record("tok-a"), record("tok-b")]);
        store.disable("tok-a").await.unwrap();
        let creds = store.load().await;
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].refresh_token, "tok-b");
        assert!(!store.read_records()[0].enable);
    }

    #[tokio::test]
    async fn test_update_remark_by_full_list_index() {
        let mut disabled = record("tok-dead");
        disabled.enable = false;
        let (_dir, store) = store_with(&[disabled, record("tok-b")]);
        // Index 0 addresses the disabled record.
        store.update_remark(0, "sunset").await.unwrap();
        let records = store.read_records();
        assert_eq!(records[0].remark.as_deref(), Some("sunset"));
        assert!(store.update_remark(9, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = CredentialStore::new(path);
        assert!(store.load().await.is_empty());
    }

    #[test]
    fn test_expiry_includes_skew() {
        let cred = Credential {
            refresh_token: "t".into(),
            access_token: "a".into(),
            expires_in: 3600,
            timestamp: 1_000_000,
            project_id: "p".into(),
            remark: None,
            session_id: -1,
        };
        // One millisecond inside the 5-minute window.
        assert!(cred.is_access_token_expired(1_000_000 + 3_600_000 - 300_000));
        assert!(!cred.is_access_token_expired(1_000_000 + 3_600_000 - 300_001));
    }

    #[test]
    fn test_token_prefix() {
        assert_eq!(token_prefix("1//0abcdefghij"), "1//0abcdef");
        assert_eq!(token_prefix("short"), "short");
    }
}
