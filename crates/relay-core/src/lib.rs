//! Core of the CloudCode relay: a pool of OAuth refresh-token credentials,
//! a least-loaded scheduler with cooldown tracking, an admission queue in
//! front of the upstream, and the SSE translation layer that reshapes
//! CloudCode candidate streams into OpenAI chat-completion chunks.

pub mod config;
pub mod error;
pub mod handlers;
pub mod mappers;
pub mod middleware;
pub mod queue;
pub mod sched;
pub mod server;
pub mod store;
pub mod stream;
pub mod upstream;

pub use config::AppConfig;
pub use error::{RelayError, RelayResult};
pub use queue::AdmissionQueue;
pub use sched::CredentialScheduler;
pub use store::CredentialStore;

/// Current wall-clock time in epoch milliseconds.
///
/// All cooldown and expiry arithmetic in this crate is done on epoch millis,
/// matching the `timestamp` field of the credential file.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
