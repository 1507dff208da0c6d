//! Named allow-policies applied to subject patterns.

use dashmap::DashMap;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BotConfig;
use crate::error::{Result, WardenError};
use crate::store::Store;
use crate::subject::Subject;

/// Store collection holding policy documents.
const COLLECTION: &str = "policy";

/// Persisted document form of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyDoc {
    name: String,
    remark: String,
    #[serde(default)]
    allow: HashSet<String>,
    #[serde(default)]
    applied: HashSet<Subject>,
}

/// A named allow-list of capability identifiers (`"*"`, service ids,
/// ability ids), applicable to a set of subject patterns.
pub struct Policy {
    name: String,
    remark: String,
    allow: Mutex<HashSet<String>>,
    applied: Mutex<HashSet<Subject>>,
}

impl Policy {
    fn new(name: impl Into<String>, allow: HashSet<String>, remark: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remark: remark.into(),
            allow: Mutex::new(allow),
            applied: Mutex::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remark(&self) -> &str {
        &self.remark
    }

    /// Whether this policy grants the given capability.
    pub fn check(&self, capability: &str) -> bool {
        self.allow.lock().contains(capability)
    }

    pub fn allow(&self) -> HashSet<String> {
        self.allow.lock().clone()
    }

    /// Whether any applied pattern contains one of the given concrete
    /// subjects. Linear scan: patterns hash by string form, so hashed
    /// probing would miss wildcards.
    fn applies_to(&self, subjects: &[Subject]) -> bool {
        let applied = self.applied.lock();
        applied
            .iter()
            .any(|pattern| subjects.iter().any(|subject| pattern.matches(subject)))
    }

    fn to_doc(&self) -> PolicyDoc {
        PolicyDoc {
            name: self.name.clone(),
            remark: self.remark.clone(),
            allow: self.allow.lock().clone(),
            applied: self.applied.lock().clone(),
        }
    }
}

/// Registry of all policies, seeded with the two built-ins:
/// `whitelist` (allows everything) and `blacklist` (allows nothing).
pub struct PolicyRegistry {
    store: Arc<dyn Store>,
    config: Arc<BotConfig>,
    policies: DashMap<String, Arc<Policy>>,
}

impl PolicyRegistry {
    pub fn new(store: Arc<dyn Store>, config: Arc<BotConfig>) -> Self {
        let registry = Self {
            store,
            config,
            policies: DashMap::new(),
        };
        registry.insert(Policy::new(
            "whitelist",
            HashSet::from(["*".to_string()]),
            "whitelist",
        ));
        registry.insert(Policy::new("blacklist", HashSet::new(), "blacklist"));
        registry
    }

    fn insert(&self, policy: Policy) -> Arc<Policy> {
        let policy = Arc::new(policy);
        self.policies.insert(policy.name.clone(), policy.clone());
        policy
    }

    /// Create (or replace) a policy.
    pub fn create(&self, name: &str, allow: HashSet<String>, remark: &str) -> Arc<Policy> {
        self.insert(Policy::new(name, allow, remark))
    }

    /// Explicitly delete a policy from the registry and the store.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.policies.remove(name);
        self.store.delete(COLLECTION, name).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(name).map(|policy| policy.clone())
    }

    /// Apply a policy to a subject (which may be a pattern). Unknown
    /// policy names are a no-op.
    pub async fn apply(&self, policy: &str, subject: Subject) -> Result<()> {
        let Some(policy) = self.get(policy) else {
            return Ok(());
        };
        policy.applied.lock().insert(subject.clone());
        debug!(policy = %policy.name, subject = %subject, "Policy applied");
        self.save(&policy).await
    }

    /// Remove a subject from a policy's applied set.
    pub async fn unapply(&self, policy: &str, subject: &Subject) -> Result<()> {
        let Some(policy) = self.get(policy) else {
            return Ok(());
        };
        policy.applied.lock().remove(subject);
        self.save(&policy).await
    }

    /// Add capabilities to a policy's allow set.
    pub async fn add_allow(&self, policy: &str, capabilities: &[&str]) -> Result<()> {
        let Some(policy) = self.get(policy) else {
            return Ok(());
        };
        {
            let mut allow = policy.allow.lock();
            allow.extend(capabilities.iter().map(|c| c.to_string()));
        }
        self.save(&policy).await
    }

    /// Remove capabilities from a policy's allow set.
    pub async fn remove_allow(&self, policy: &str, capabilities: &[&str]) -> Result<()> {
        let Some(policy) = self.get(policy) else {
            return Ok(());
        };
        {
            let mut allow = policy.allow.lock();
            for capability in capabilities {
                allow.remove(*capability);
            }
        }
        self.save(&policy).await
    }

    /// All policies whose applied set intersects the given subjects.
    pub fn policies_for(&self, subjects: &[Subject]) -> Vec<Arc<Policy>> {
        self.policies
            .iter()
            .filter(|entry| entry.value().applies_to(subjects))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Union of `allow` over every applicable policy; falls back to the
    /// configured default allow-set when no policy applies.
    pub fn get_allowed(&self, subjects: &[Subject]) -> HashSet<String> {
        let policies = self.policies_for(subjects);
        if policies.is_empty() {
            return self.config.default_policy_allow.clone();
        }
        policies
            .iter()
            .flat_map(|policy| policy.allow.lock().clone())
            .collect()
    }

    /// Reconcile every policy from the store. Store state wins.
    pub async fn sync(&self) -> Result<()> {
        let policies: Vec<_> = self.policies.iter().map(|e| e.value().clone()).collect();
        try_join_all(policies.iter().map(|policy| self.sync_one(policy))).await?;
        info!(policies = policies.len(), "Policies synced from store");
        Ok(())
    }

    async fn sync_one(&self, policy: &Arc<Policy>) -> Result<()> {
        if let Some(doc) = self.store.get(COLLECTION, &policy.name).await? {
            let doc: PolicyDoc =
                serde_json::from_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
            *policy.allow.lock() = doc.allow;
            *policy.applied.lock() = doc.applied;
            self.save(policy).await?;
        }
        Ok(())
    }

    async fn save(&self, policy: &Policy) -> Result<()> {
        let value = serde_json::to_value(policy.to_doc())
            .map_err(|e| WardenError::Store(e.to_string()))?;
        self.store.save(COLLECTION, &policy.name, value).await
    }
}
