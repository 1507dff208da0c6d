//! Cooldown limiter: a minimum time between uses.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, WardenError};
use crate::store::Store;

use super::{now_secs, human_readable_time, LimitScope, Limiter};

/// Store collection holding cooldown documents.
const COLLECTION: &str = "cooldown";

/// Persisted document form of a cooldown limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CooldownDoc {
    name: String,
    scope: LimitScope,
    prompt: Option<String>,
    duration: u64,
    #[serde(default)]
    expire: HashMap<String, f64>,
}

/// A persisted cooldown limiter, keyed by a globally unique name.
///
/// A key is permitted when its expiry instant has passed; a key that was
/// never armed is always permitted.
pub struct Cooldown {
    name: String,
    scope: LimitScope,
    prompt: Option<String>,
    duration: u64,
    /// Expiry instants in epoch seconds, one slot per scope key.
    expire: Mutex<HashMap<String, f64>>,
    store: Arc<dyn Store>,
}

impl Cooldown {
    pub fn new(
        store: Arc<dyn Store>,
        name: impl Into<String>,
        scope: LimitScope,
        prompt: Option<String>,
        duration: u64,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            prompt,
            duration,
            expire: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Globally unique limiter name (the store primary key).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default cooldown duration in seconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Arm the cooldown for `key` and persist.
    ///
    /// A `duration` of 0 uses the limiter's default duration.
    pub async fn start(&self, key: &str, duration: u64) -> Result<()> {
        let effective = if duration == 0 { self.duration } else { duration };
        {
            let mut expire = self.expire.lock();
            expire.insert(key.to_string(), now_secs() + effective as f64);
        }
        debug!(limiter = %self.name, key = %key, duration = effective, "Cooldown armed");
        self.save().await
    }

    /// Seconds until `key` leaves cooldown (0 when already permitted).
    pub fn remaining(&self, key: &str) -> i64 {
        let expire = self.expire.lock();
        let deadline = expire.get(key).copied().unwrap_or(0.0);
        ((deadline - now_secs()).ceil() as i64).max(0)
    }

    /// Overwrite local state from the store. Store state is authoritative
    /// at startup; a fetch failure propagates.
    pub async fn sync(&self) -> Result<()> {
        if let Some(doc) = self.store.get(COLLECTION, &self.name).await? {
            let doc: CooldownDoc = serde_json::from_value(doc)
                .map_err(|e| WardenError::Store(e.to_string()))?;
            *self.expire.lock() = doc.expire;
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let doc = CooldownDoc {
            name: self.name.clone(),
            scope: self.scope,
            prompt: self.prompt.clone(),
            duration: self.duration,
            expire: self.expire.lock().clone(),
        };
        let value = serde_json::to_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
        self.store.save(COLLECTION, &self.name, value).await
    }
}

impl Limiter for Cooldown {
    fn scope(&self) -> LimitScope {
        self.scope
    }

    fn prompt_template(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    fn check(&self, key: &str) -> bool {
        let expire = self.expire.lock();
        now_secs() >= expire.get(key).copied().unwrap_or(0.0)
    }

    fn info(&self, key: &str) -> Vec<(&'static str, String)> {
        let remaining = self.remaining(key);
        vec![
            ("target", self.scope.target().to_string()),
            ("duration", self.duration.to_string()),
            ("remain_time", remaining.to_string()),
            ("human_remain_time", human_readable_time(remaining)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cooldown(duration: u64) -> Cooldown {
        Cooldown::new(
            Arc::new(MemoryStore::new()),
            "test.plugin#cmd",
            LimitScope::Local,
            None,
            duration,
        )
    }

    #[tokio::test]
    async fn test_never_started_key_is_permitted() {
        let cd = cooldown(10);
        assert!(cd.check("g1_u1"));
        assert_eq!(cd.remaining("g1_u1"), 0);
    }

    #[tokio::test]
    async fn test_start_blocks_until_elapsed() {
        let cd = cooldown(10);
        cd.start("k", 0).await.unwrap();
        assert!(!cd.check("k"));
        assert!(cd.remaining("k") > 0);
        // Other keys are unaffected.
        assert!(cd.check("other"));
    }

    #[tokio::test]
    async fn test_explicit_duration_overrides_default() {
        let cd = cooldown(3600);
        cd.start("k", 1).await.unwrap();
        assert!(cd.remaining("k") <= 1);
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let cd = cooldown(1);
        cd.start("k", 1).await.unwrap();
        assert!(!cd.check("k"));
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(cd.check("k"));
    }

    #[tokio::test]
    async fn test_sync_overwrites_local_state() {
        let store = Arc::new(MemoryStore::new());
        let first = Cooldown::new(store.clone(), "cd", LimitScope::Local, None, 60);
        first.start("k", 60).await.unwrap();

        // A freshly constructed instance picks up the persisted expiry.
        let second = Cooldown::new(store, "cd", LimitScope::Local, None, 60);
        assert!(second.check("k"));
        second.sync().await.unwrap();
        assert!(!second.check("k"));
    }

    #[tokio::test]
    async fn test_prompt_renders_remaining_time() {
        let store = Arc::new(MemoryStore::new());
        let cd = Cooldown::new(
            store,
            "cd",
            LimitScope::User,
            Some("wait {remain_time}s, {target}".to_string()),
            10,
        );
        cd.start("u1", 5).await.unwrap();
        let prompt = cd.prompt("u1").unwrap();
        assert_eq!(prompt, "wait 5s, you");
    }
}
