//! Scheduler test support: a temp-file store pre-seeded with credentials.


use std::sync::Arc;

use crate::store::{CredentialRecord, CredentialStore};

use super::CredentialScheduler;

pub(super) struct Harness {
    pub scheduler: CredentialScheduler,
    _dir: tempfile::TempDir,
}

pub(super) fn record(token: &str) -> CredentialRecord {
    CredentialRecord {
        refresh_token: token.to_string(),
        access_token: "access".to_string(),
        expires_in: 3600,
        // Far future so selection never tries a real refresh in tests.
        timestamp: crate::now_ms(),
        enable: true,
        project_id: Some("test-project-00000".to_string()),
        remark: None,
    }
}

pub(super) async fn harness(records: &[CredentialRecord], per_token_limit: u32) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    std::fs::write(&path, serde_json::to_string_pretty(records).unwrap()).unwrap();
    let store = Arc::new(CredentialStore::new(path));
    let scheduler = CredentialScheduler::new(store, per_token_limit, reqwest::Client::new());
    scheduler.load().await;
    Harness { scheduler, _dir: dir }
}
