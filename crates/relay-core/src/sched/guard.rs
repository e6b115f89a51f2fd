//! RAII guard for cancellation-safe active request counting.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Holds one reserved in-flight slot on a credential.
///
/// The increment happens inside [`ActiveGuard::try_new`] so concurrent
/// selectors observe the reservation before the credential is handed out;
/// the decrement happens on drop, exactly once, whatever path the request
/// takes out of the retry loop.
pub struct ActiveGuard {
    active: Arc<DashMap<String, AtomicU32>>,
    key: String,
}

impl ActiveGuard {
    /// Reserve a slot if the credential is below `limit`. Returns `None`
    /// when a concurrent selector took the last slot first.
    pub fn try_new(
        active: Arc<DashMap<String, AtomicU32>>,
        key: String,
        limit: u32,
    ) -> Option<Self> {
        let acquired = {
            let counter = active.entry(key.clone()).or_insert_with(|| AtomicU32::new(0));
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    if v < limit {
                        Some(v + 1)
                    } else {
                        None
                    }
                })
                .is_ok()
        };
        if acquired {
            Some(Self { active, key })
        } else {
            None
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(counter) = self.active.get(&self.key) {
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });
        }
    }
}
