//! Lock limiter: a cap on concurrently in-flight uses.
//!
//! Lock state describes currently-executing work, not history, so it is
//! process-local only and resets on restart.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{LimitScope, Limiter};

/// An in-memory concurrency limiter.
pub struct Lock {
    scope: LimitScope,
    prompt: Option<String>,
    max_count: u64,
    /// In-flight counts, one slot per scope key.
    tasks: Mutex<HashMap<String, u64>>,
}

impl Lock {
    pub fn new(scope: LimitScope, prompt: Option<String>, max_count: u64) -> Self {
        Self {
            scope,
            prompt,
            max_count,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Maximum number of concurrently in-flight uses per key.
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Current in-flight count under `key`.
    pub fn count(&self, key: &str) -> u64 {
        self.tasks.lock().get(key).copied().unwrap_or(0)
    }

    /// Record one in-flight use under `key`. Callers must pair every
    /// claim with an [`unclaim`](Lock::unclaim) on every exit path;
    /// prefer [`try_claim`](Lock::try_claim) which releases on drop.
    pub fn claim(&self, key: &str) {
        let mut tasks = self.tasks.lock();
        *tasks.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Release one in-flight use under `key`. Clamps at zero: an
    /// unmatched unclaim must not mint extra permits.
    pub fn unclaim(&self, key: &str) {
        let mut tasks = self.tasks.lock();
        if let Some(count) = tasks.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    /// Atomically check and claim, returning a guard that unclaims on
    /// drop. Returns `None` when the key is at its cap.
    pub fn try_claim(self: &Arc<Self>, key: &str) -> Option<LockClaim> {
        let mut tasks = self.tasks.lock();
        let count = tasks.entry(key.to_string()).or_insert(0);
        if *count >= self.max_count {
            return None;
        }
        *count += 1;
        Some(LockClaim {
            lock: Arc::clone(self),
            key: key.to_string(),
        })
    }
}

impl Limiter for Lock {
    fn scope(&self) -> LimitScope {
        self.scope
    }

    fn prompt_template(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    fn check(&self, key: &str) -> bool {
        self.count(key) < self.max_count
    }

    fn info(&self, key: &str) -> Vec<(&'static str, String)> {
        let count = self.count(key);
        vec![
            ("target", self.scope.target().to_string()),
            ("max_count", self.max_count.to_string()),
            ("count", count.to_string()),
            ("remain_count", self.max_count.saturating_sub(count).to_string()),
        ]
    }
}

/// A held lock permit; releases its claim when dropped.
pub struct LockClaim {
    lock: Arc<Lock>,
    key: String,
}

impl Drop for LockClaim {
    fn drop(&mut self) {
        self.lock.unclaim(&self.key);
    }
}
