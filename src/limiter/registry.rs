//! Process-wide limiter caches.
//!
//! Limiters are shared by name: repeated lookups reuse the same in-memory
//! counters, and name collisions deliberately share state. The registry is
//! an explicit object injected into the pipeline rather than ambient
//! global state.

use chrono::NaiveTime;
use dashmap::DashMap;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::Store;

use super::{Cooldown, LimitScope, Lock, Quota};

/// Name→instance caches for all limiter kinds, populated lazily on
/// first use and reconciled from the store at startup.
pub struct LimiterRegistry {
    store: Arc<dyn Store>,
    cooldowns: DashMap<String, Arc<Cooldown>>,
    quotas: DashMap<String, Arc<Quota>>,
    locks: DashMap<String, Arc<Lock>>,
}

impl LimiterRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cooldowns: DashMap::new(),
            quotas: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Get or create the cooldown limiter registered under `name`.
    pub fn cooldown(
        &self,
        name: &str,
        scope: LimitScope,
        prompt: Option<String>,
        duration: u64,
    ) -> Arc<Cooldown> {
        self.cooldowns
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(limiter = %name, "Creating cooldown limiter");
                Arc::new(Cooldown::new(
                    self.store.clone(),
                    name,
                    scope,
                    prompt,
                    duration,
                ))
            })
            .clone()
    }

    /// Get or create the quota limiter registered under `name`.
    pub fn quota(
        &self,
        name: &str,
        scope: LimitScope,
        prompt: Option<String>,
        limit: u64,
        reset_time: NaiveTime,
    ) -> Arc<Quota> {
        self.quotas
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(limiter = %name, "Creating quota limiter");
                Arc::new(Quota::new(
                    self.store.clone(),
                    name,
                    scope,
                    prompt,
                    limit,
                    reset_time,
                ))
            })
            .clone()
    }

    /// Get or create the in-memory lock registered under `name`.
    pub fn lock(
        &self,
        name: &str,
        scope: LimitScope,
        prompt: Option<String>,
        max_count: u64,
    ) -> Arc<Lock> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Lock::new(scope, prompt, max_count)))
            .clone()
    }

    /// All registered quota limiters, for the runtime's reset job.
    pub fn quotas(&self) -> Vec<Arc<Quota>> {
        self.quotas.iter().map(|e| e.value().clone()).collect()
    }

    /// Reconcile every cached persisted limiter from the store. Store
    /// state wins over freshly-constructed defaults; failures propagate
    /// so startup can abort instead of running with stale state.
    pub async fn sync(&self) -> Result<()> {
        let cooldowns: Vec<_> = self.cooldowns.iter().map(|e| e.value().clone()).collect();
        let quotas: Vec<_> = self.quotas.iter().map(|e| e.value().clone()).collect();
        try_join_all(cooldowns.iter().map(|limiter| limiter.sync())).await?;
        try_join_all(quotas.iter().map(|limiter| limiter.sync())).await?;
        info!(
            cooldowns = cooldowns.len(),
            quotas = quotas.len(),
            "Limiter state synced from store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::Limiter;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_same_name_shares_state() {
        let registry = LimiterRegistry::new(Arc::new(MemoryStore::new()));
        let first = registry.cooldown("cd", LimitScope::Local, None, 10);
        let second = registry.cooldown("cd", LimitScope::Local, None, 99);

        first.start("k", 10).await.unwrap();
        assert!(!second.check("k"));
        // The first registration's configuration wins.
        assert_eq!(second.duration(), 10);
    }

    #[tokio::test]
    async fn test_sync_pulls_persisted_counters() {
        let store = Arc::new(MemoryStore::new());
        {
            let registry = LimiterRegistry::new(store.clone());
            let quota = registry.quota("qt", LimitScope::User, None, 1, NaiveTime::default());
            quota.consume("u1", 1).await.unwrap();
        }

        // Fresh process: defaults are clean until sync pulls the store.
        let registry = LimiterRegistry::new(store);
        let quota = registry.quota("qt", LimitScope::User, None, 1, NaiveTime::default());
        assert!(quota.check("u1"));
        registry.sync().await.unwrap();
        assert!(!quota.check("u1"));
    }
}
