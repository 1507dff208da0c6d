//! Weighted, hierarchical roles with scoped assignment.

use dashmap::DashMap;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BotConfig;
use crate::error::{Result, WardenError};
use crate::store::Store;
use crate::subject::Subject;

/// Store collection holding role documents.
const COLLECTION: &str = "role";

/// Scope key used for assignments made without an explicit scope.
pub const GLOBAL_SCOPE: &str = "*:*";

/// Persisted document form of a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleDoc {
    name: String,
    weight: i32,
    remark: String,
    #[serde(default)]
    assigned: HashMap<String, HashSet<String>>,
}

/// A role with a weight-based total order.
///
/// Roles are long-lived singletons keyed by name; assignment state lives
/// behind a lock and is persisted by the owning [`RoleRegistry`].
pub struct Role {
    name: String,
    weight: i32,
    remark: String,
    /// Scope key (a subject string, possibly a pattern) → principal ids.
    assigned: Mutex<HashMap<String, HashSet<String>>>,
}

impl Role {
    fn new(name: impl Into<String>, weight: i32, remark: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight,
            remark: remark.into(),
            assigned: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn remark(&self) -> &str {
        &self.remark
    }

    /// Whether this role's weight meets or exceeds `other`'s.
    pub fn check(&self, other: &Role) -> bool {
        self.weight >= other.weight
    }

    /// Whether `principal` holds this role under any of the given scopes.
    ///
    /// The global scope is always consulted. Scope keys stored as
    /// patterns are matched with a linear scan, never by hashed lookup.
    fn held_by(&self, principal: &str, scopes: &[Subject]) -> bool {
        let assigned = self.assigned.lock();
        assigned.iter().any(|(scope_key, principals)| {
            if !principals.contains(principal) {
                return false;
            }
            if scope_key == GLOBAL_SCOPE {
                return true;
            }
            let pattern = Subject::from(scope_key.as_str());
            scopes.iter().any(|scope| pattern.matches(scope))
        })
    }

    fn to_doc(&self) -> RoleDoc {
        RoleDoc {
            name: self.name.clone(),
            weight: self.weight,
            remark: self.remark.clone(),
            assigned: self.assigned.lock().clone(),
        }
    }
}

/// Registry of all roles, seeded with the four built-ins:
/// normal(1), admin(9), owner(99), superuser(999).
pub struct RoleRegistry {
    store: Arc<dyn Store>,
    config: Arc<BotConfig>,
    roles: DashMap<String, Arc<Role>>,
}

impl RoleRegistry {
    pub fn new(store: Arc<dyn Store>, config: Arc<BotConfig>) -> Self {
        let registry = Self {
            store,
            config,
            roles: DashMap::new(),
        };
        registry.insert(Role::new("normal", 1, "regular member"));
        registry.insert(Role::new("admin", 9, "group administrator"));
        registry.insert(Role::new("owner", 99, "group owner"));
        registry.insert(Role::new("superuser", 999, "superuser"));
        registry
    }

    fn insert(&self, role: Role) -> Arc<Role> {
        let role = Arc::new(role);
        self.roles.insert(role.name.clone(), role.clone());
        role
    }

    /// Create (or replace) a role.
    pub fn create(&self, name: &str, weight: i32, remark: &str) -> Arc<Role> {
        self.insert(Role::new(name, weight, remark))
    }

    /// Explicitly delete a role from the registry and the store.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.roles.remove(name);
        self.store.delete(COLLECTION, name).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<Role>> {
        self.roles.get(name).map(|role| role.clone())
    }

    /// Assign a role to a principal, optionally limited to a scope.
    /// No scope means the assignment applies everywhere. Unknown role
    /// names are a no-op.
    pub async fn assign(
        &self,
        role: &str,
        principal: &str,
        scope: Option<&Subject>,
    ) -> Result<()> {
        let Some(role) = self.get(role) else {
            return Ok(());
        };
        let scope_key = scope.map_or_else(|| GLOBAL_SCOPE.to_string(), |s| s.to_string());
        {
            let mut assigned = role.assigned.lock();
            assigned
                .entry(scope_key.clone())
                .or_default()
                .insert(principal.to_string());
        }
        debug!(role = %role.name, principal = %principal, scope = %scope_key, "Role assigned");
        self.save(&role).await
    }

    /// Revoke a role from a principal. With no scope, the principal is
    /// removed from every scope.
    pub async fn revoke(
        &self,
        role: &str,
        principal: &str,
        scope: Option<&Subject>,
    ) -> Result<()> {
        let Some(role) = self.get(role) else {
            return Ok(());
        };
        {
            let mut assigned = role.assigned.lock();
            match scope {
                Some(scope) => {
                    if let Some(principals) = assigned.get_mut(&scope.to_string()) {
                        principals.remove(principal);
                    }
                }
                None => {
                    for principals in assigned.values_mut() {
                        principals.remove(principal);
                    }
                }
            }
            assigned.retain(|_, principals| !principals.is_empty());
        }
        self.save(&role).await
    }

    /// All roles held by `principal` under the given scopes. Configured
    /// superusers always hold `superuser`, independent of assignment.
    pub fn query(&self, principal: &str, scopes: &[Subject]) -> Vec<Arc<Role>> {
        let mut held: Vec<Arc<Role>> = self
            .roles
            .iter()
            .filter(|entry| entry.value().held_by(principal, scopes))
            .map(|entry| entry.value().clone())
            .collect();
        if self.config.superusers.contains(principal)
            && !held.iter().any(|role| role.name == "superuser")
        {
            if let Some(superuser) = self.get("superuser") {
                held.push(superuser);
            }
        }
        held
    }

    /// The highest-weighted role held by `principal`, if any.
    pub fn highest(&self, principal: &str, scopes: &[Subject]) -> Option<Arc<Role>> {
        self.query(principal, scopes)
            .into_iter()
            .max_by_key(|role| role.weight)
    }

    /// Reconcile every role's assignment table from the store.
    /// Assignment data wins over code-declared defaults.
    pub async fn sync(&self) -> Result<()> {
        let roles: Vec<_> = self.roles.iter().map(|e| e.value().clone()).collect();
        try_join_all(roles.iter().map(|role| self.sync_one(role))).await?;
        info!(roles = roles.len(), "Role assignments synced from store");
        Ok(())
    }

    async fn sync_one(&self, role: &Arc<Role>) -> Result<()> {
        if let Some(doc) = self.store.get(COLLECTION, &role.name).await? {
            let doc: RoleDoc =
                serde_json::from_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
            *role.assigned.lock() = doc.assigned;
            self.save(role).await?;
        }
        Ok(())
    }

    async fn save(&self, role: &Role) -> Result<()> {
        let value = serde_json::to_value(role.to_doc())
            .map_err(|e| WardenError::Store(e.to_string()))?;
        self.store.save(COLLECTION, &role.name, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> RoleRegistry {
        RoleRegistry::new(Arc::new(MemoryStore::new()), Arc::new(BotConfig::default()))
    }

    #[test]
    fn test_builtin_weights_are_strictly_ordered() {
        let registry = registry();
        let weights: Vec<i32> = ["normal", "admin", "owner", "superuser"]
            .iter()
            .map(|name| registry.get(name).unwrap().weight())
            .collect();
        assert!(weights.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_check_is_weight_comparison() {
        let registry = registry();
        let admin = registry.get("admin").unwrap();
        let superuser = registry.get("superuser").unwrap();
        let normal = registry.get("normal").unwrap();
        assert!(superuser.check(&admin));
        assert!(!normal.check(&admin));
        assert!(admin.check(&admin));
    }

    #[tokio::test]
    async fn test_global_assignment_applies_in_any_scope() {
        let registry = registry();
        registry.assign("admin", "u1", None).await.unwrap();

        let in_group = registry.query("u1", &[Subject::group("g1")]);
        assert!(in_group.iter().any(|r| r.name() == "admin"));
        let nowhere = registry.query("u1", &[]);
        assert!(nowhere.iter().any(|r| r.name() == "admin"));
    }

    #[tokio::test]
    async fn test_scoped_assignment_needs_matching_scope() {
        let registry = registry();
        let scope = Subject::group("g1");
        registry.assign("admin", "u1", Some(&scope)).await.unwrap();

        assert!(registry.highest("u1", &[Subject::group("g1")]).is_some());
        let elsewhere = registry.query("u1", &[Subject::group("g2")]);
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn test_wildcard_scope_matches_concrete_probe() {
        let registry = registry();
        let every_group = Subject::new("group", "*");
        registry
            .assign("admin", "u1", Some(&every_group))
            .await
            .unwrap();

        let held = registry.query("u1", &[Subject::group("g42")]);
        assert!(held.iter().any(|r| r.name() == "admin"));
    }

    #[tokio::test]
    async fn test_revoke_without_scope_clears_everywhere() {
        let registry = registry();
        let scope = Subject::group("g1");
        registry.assign("admin", "u1", None).await.unwrap();
        registry.assign("admin", "u1", Some(&scope)).await.unwrap();

        registry.revoke("admin", "u1", None).await.unwrap();
        assert!(registry.query("u1", &[Subject::group("g1")]).is_empty());
    }

    #[tokio::test]
    async fn test_superuser_by_config_without_assignment() {
        let config = BotConfig {
            superusers: HashSet::from(["u9".to_string()]),
            ..BotConfig::default()
        };
        let registry = RoleRegistry::new(Arc::new(MemoryStore::new()), Arc::new(config));

        let held = registry.query("u9", &[]);
        assert!(held.iter().any(|r| r.name() == "superuser"));
        assert_eq!(registry.highest("u9", &[]).unwrap().name(), "superuser");
    }

    #[tokio::test]
    async fn test_query_missing_principal_is_empty() {
        let registry = registry();
        assert!(registry.query("nobody", &[Subject::group("g1")]).is_empty());
        assert!(registry.highest("nobody", &[]).is_none());
    }

    #[tokio::test]
    async fn test_sync_store_wins_over_defaults() {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(BotConfig::default());
        {
            let registry = RoleRegistry::new(store.clone(), config.clone());
            registry.assign("owner", "u1", None).await.unwrap();
        }

        let registry = RoleRegistry::new(store, config);
        assert!(registry.query("u1", &[]).is_empty());
        registry.sync().await.unwrap();
        assert!(registry.query("u1", &[]).iter().any(|r| r.name() == "owner"));
    }
}
