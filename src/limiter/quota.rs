//! Quota limiter: a maximum use count per reset window.

use chrono::{DateTime, Duration, Local, NaiveTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, WardenError};
use crate::store::Store;

use super::{LimitScope, Limiter};

/// Store collection holding quota documents.
const COLLECTION: &str = "quota";

/// Persisted document form of a quota limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuotaDoc {
    name: String,
    scope: LimitScope,
    prompt: Option<String>,
    limit: u64,
    #[serde(default)]
    accum: HashMap<String, u64>,
    reset_time: NaiveTime,
    reset_at: Option<DateTime<Local>>,
}

/// A persisted quota limiter, keyed by a globally unique name.
///
/// Counters accumulate until an out-of-band scheduled job calls
/// [`reset`](Quota::reset) or [`reset_all`](Quota::reset_all); the limiter
/// never self-expires.
pub struct Quota {
    name: String,
    scope: LimitScope,
    prompt: Option<String>,
    limit: u64,
    /// Consumed amounts, one slot per scope key.
    accum: Mutex<HashMap<String, u64>>,
    /// Time of day the window resets at.
    reset_time: NaiveTime,
    /// Next reset instant, computed lazily on first consumption.
    reset_at: Mutex<Option<DateTime<Local>>>,
    store: Arc<dyn Store>,
}

impl Quota {
    pub fn new(
        store: Arc<dyn Store>,
        name: impl Into<String>,
        scope: LimitScope,
        prompt: Option<String>,
        limit: u64,
        reset_time: NaiveTime,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            prompt,
            limit,
            accum: Mutex::new(HashMap::new()),
            reset_time,
            reset_at: Mutex::new(None),
            store,
        }
    }

    /// Globally unique limiter name (the store primary key).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum amount per reset window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Amount already consumed under `key`.
    pub fn accum(&self, key: &str) -> u64 {
        self.accum.lock().get(key).copied().unwrap_or(0)
    }

    /// The next reset instant, if consumption has started.
    pub fn reset_at(&self) -> Option<DateTime<Local>> {
        *self.reset_at.lock()
    }

    /// Consume quota under `key` and persist.
    pub async fn consume(&self, key: &str, amount: u64) -> Result<()> {
        {
            let mut accum = self.accum.lock();
            *accum.entry(key.to_string()).or_insert(0) += amount;
        }
        {
            let mut reset_at = self.reset_at.lock();
            if reset_at.is_none() {
                *reset_at = Some(daily_reset_at(self.reset_time));
            }
        }
        debug!(limiter = %self.name, key = %key, amount = amount, "Quota consumed");
        self.save().await
    }

    /// Restore the full quota for `key` and persist.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.accum.lock().insert(key.to_string(), 0);
        self.save().await
    }

    /// Restore the full quota for every key and persist.
    pub async fn reset_all(&self) -> Result<()> {
        self.accum.lock().clear();
        *self.reset_at.lock() = None;
        debug!(limiter = %self.name, "Quota reset for all keys");
        self.save().await
    }

    /// Overwrite local counters from the store. Store state is
    /// authoritative at startup; a fetch failure propagates.
    pub async fn sync(&self) -> Result<()> {
        if let Some(doc) = self.store.get(COLLECTION, &self.name).await? {
            let doc: QuotaDoc = serde_json::from_value(doc)
                .map_err(|e| WardenError::Store(e.to_string()))?;
            *self.accum.lock() = doc.accum;
            *self.reset_at.lock() = doc.reset_at;
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let doc = QuotaDoc {
            name: self.name.clone(),
            scope: self.scope,
            prompt: self.prompt.clone(),
            limit: self.limit,
            accum: self.accum.lock().clone(),
            reset_time: self.reset_time,
            reset_at: *self.reset_at.lock(),
        };
        let value = serde_json::to_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
        self.store.save(COLLECTION, &self.name, value).await
    }
}

impl Limiter for Quota {
    fn scope(&self) -> LimitScope {
        self.scope
    }

    fn prompt_template(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    fn check(&self, key: &str) -> bool {
        self.accum(key) < self.limit
    }

    fn info(&self, key: &str) -> Vec<(&'static str, String)> {
        let accum = self.accum(key);
        vec![
            ("target", self.scope.target().to_string()),
            ("limit", self.limit.to_string()),
            ("accum", accum.to_string()),
            ("remain_amount", self.limit.saturating_sub(accum).to_string()),
        ]
    }
}

/// Today at `reset_time`, or tomorrow if that instant has already passed.
fn daily_reset_at(reset_time: NaiveTime) -> DateTime<Local> {
    let now = Local::now();
    let mut target = now.date_naive().and_time(reset_time);
    if target <= now.naive_local() {
        target += Duration::days(1);
    }
    target
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or(now)
}
