//! Plugin servitization: binding plugins to services and handlers to
//! abilities, merging configuration sources, and syncing persisted
//! overrides.

use dashmap::DashMap;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{Result, WardenError};
use crate::store::Store;
use crate::subject::Subject;

use super::{Ability, Mixin, MixinConfig, MixinOverrides, Service};

/// Store collection holding service override documents.
const SERVICE_COLLECTION: &str = "service";
/// Store collection holding ability override documents.
const ABILITY_COLLECTION: &str = "ability";

/// What the plugin loader tells us about one registered handler.
#[derive(Debug, Clone)]
pub struct HandlerInfo {
    /// Stable opaque handle key for this handler.
    pub key: String,
    /// Explicit registration alias, preferred as the ability name.
    pub alias: Option<String>,
    /// Name of the first handler function, the fallback ability name.
    pub func_name: Option<String>,
}

/// What the plugin loader tells us about one loaded plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginInfo {
    /// Stable fully-qualified plugin name; doubles as the plugin handle
    /// key.
    pub full_name: String,
    /// Declared plugin metadata, if any.
    pub metadata: Option<ServiceConfig>,
    /// Path to an optional sidecar `service.yaml`.
    pub config_path: Option<PathBuf>,
    /// Handlers the plugin registered, in registration order.
    pub handlers: Vec<HandlerInfo>,
}

/// Declared or file-sourced service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: Option<String>,
    #[serde(default)]
    pub alias: HashSet<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(flatten)]
    pub mixin: MixinOverrides,
    /// Per-ability config blocks, matched by resolved ability name.
    #[serde(default)]
    pub abilities: Vec<AbilityConfig>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceConfig {
    /// Overlay `other` on top of `self`; `other` wins where set.
    fn merged_with(&self, other: &ServiceConfig) -> ServiceConfig {
        ServiceConfig {
            name: other.name.clone().or_else(|| self.name.clone()),
            alias: if other.alias.is_empty() {
                self.alias.clone()
            } else {
                other.alias.clone()
            },
            summary: other.summary.clone().or_else(|| self.summary.clone()),
            description: other
                .description
                .clone()
                .or_else(|| self.description.clone()),
            usage: other.usage.clone().or_else(|| self.usage.clone()),
            version: other.version.clone().or_else(|| self.version.clone()),
            author: other.author.clone().or_else(|| self.author.clone()),
            tags: if other.tags.is_empty() {
                self.tags.clone()
            } else {
                other.tags.clone()
            },
            mixin: self.mixin.merged_with(&other.mixin),
            abilities: if other.abilities.is_empty() {
                self.abilities.clone()
            } else {
                other.abilities.clone()
            },
            extra: if other.extra.is_empty() {
                self.extra.clone()
            } else {
                other.extra.clone()
            },
        }
    }
}

/// A per-ability config block inside a [`ServiceConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbilityConfig {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub mixin: MixinOverrides,
}

/// The sidecar file's top-level shape.
#[derive(Debug, Deserialize)]
struct SidecarFile {
    plugin: ServiceConfig,
}

/// Persisted runtime overrides for a service or ability.
#[derive(Debug, Default, Serialize, Deserialize)]
struct OverrideDoc {
    #[serde(flatten)]
    mixin: MixinOverrides,
    #[serde(default)]
    status: HashMap<Subject, bool>,
}

impl OverrideDoc {
    fn from_snapshot(config: &MixinConfig) -> Self {
        Self {
            mixin: MixinOverrides {
                enabled: Some(config.enabled),
                position: config.position,
                visible: Some(config.visible),
                role: Some(config.role.clone()),
                scope: Some(config.scope),
                cooldown: config.cooldown.clone(),
                quota: config.quota.clone(),
                state: Some(config.state),
            },
            status: config.status.clone(),
        }
    }

    fn apply_to(&self, mixin: &Mixin) {
        let mut resolved = self.mixin.apply_to(&mixin.snapshot());
        resolved.status = self.status.clone();
        mixin.overwrite(resolved);
    }
}

/// Sort key shared by service and ability enumeration: explicit position
/// ascending, unset last, then name.
fn sort_key(position: Option<u32>, name: &str) -> (u64, String) {
    (
        position.map_or(u64::MAX, u64::from),
        name.to_string(),
    )
}

/// Binds plugins to services and handlers to abilities, and owns the
/// merged configuration lifecycle.
///
/// The bidirectional plugin↔service and handler↔ability lookups are two
/// plain maps each, kept in sync by the single binding operation.
pub struct ServiceRegistry {
    store: Arc<dyn Store>,
    /// plugin key → service
    services: DashMap<String, Arc<Service>>,
    /// service id → plugin key
    service_plugins: DashMap<String, String>,
    /// handler key → ability
    abilities: DashMap<String, Arc<Ability>>,
    /// ability id → handler key
    ability_handlers: DashMap<String, String>,
    /// handler key → plugin key, for every handler including unnamed ones
    handler_plugins: DashMap<String, String>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            services: DashMap::new(),
            service_plugins: DashMap::new(),
            abilities: DashMap::new(),
            ability_handlers: DashMap::new(),
            handler_plugins: DashMap::new(),
        }
    }

    /// Load a plugin as a service: merge declared metadata with the
    /// optional sidecar file, bind the plugin and its handlers, and
    /// construct the ability list.
    ///
    /// Duplicate ability names within one service fail the whole
    /// service; the caller decides whether to continue with the rest of
    /// the system (it should).
    pub fn load_service(&self, plugin: &PluginInfo) -> Result<Arc<Service>> {
        let mut config = plugin.metadata.clone().unwrap_or_default();
        if let Some(sidecar) = self.load_sidecar(plugin) {
            config = config.merged_with(&sidecar);
        }

        let author = config.author.clone().unwrap_or_else(|| "unknown".to_string());
        if author.contains(' ') || author.contains('.') {
            return Err(WardenError::Config(format!(
                "author must not contain spaces or dots: {}",
                author
            )));
        }

        let id = format!("{}.{}", author, plugin.full_name)
            .to_lowercase()
            .replace('_', "-");
        let service = Arc::new(Service {
            id: id.clone(),
            name: config.name.clone().unwrap_or_else(|| plugin.full_name.clone()),
            alias: config.alias.clone(),
            summary: config.summary.clone().unwrap_or_default(),
            description: config.description.clone().unwrap_or_default(),
            usage: config.usage.clone().unwrap_or_default(),
            version: config.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
            author,
            tags: config.tags.clone(),
            extra: config.extra.clone(),
            mixin: Mixin::new(config.mixin.apply_to(&MixinConfig::default())),
            abilities: Default::default(),
        });

        self.load_abilities(&service, plugin, &config.abilities)?;
        self.services.insert(plugin.full_name.clone(), service.clone());
        self.service_plugins.insert(id, plugin.full_name.clone());
        info!(
            service = %service.id,
            abilities = service.abilities().len(),
            "Service loaded"
        );
        Ok(service)
    }

    fn load_sidecar(&self, plugin: &PluginInfo) -> Option<ServiceConfig> {
        let path = plugin.config_path.as_ref()?;
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_yaml::from_str::<SidecarFile>(&contents) {
            Ok(sidecar) => Some(sidecar.plugin),
            Err(e) => {
                error!(
                    plugin = %plugin.full_name,
                    path = %path.display(),
                    error = %e,
                    "Loading sidecar configuration failed, using declared metadata"
                );
                None
            }
        }
    }

    fn load_abilities(
        &self,
        service: &Arc<Service>,
        plugin: &PluginInfo,
        configs: &[AbilityConfig],
    ) -> Result<Vec<Arc<Ability>>> {
        let base = service.mixin.snapshot();
        let mut named: HashMap<String, Arc<Ability>> = HashMap::new();

        for handler in &plugin.handlers {
            self.handler_plugins
                .insert(handler.key.clone(), plugin.full_name.clone());

            let Some(name) = handler.alias.clone().or_else(|| handler.func_name.clone())
            else {
                continue;
            };
            if named.contains_key(&name) {
                return Err(WardenError::Service(format!(
                    "Ability name conflict! Duplicate with existing handler name: {}",
                    name
                )));
            }

            let block = configs.iter().find(|config| config.name == name);
            let mixin = block
                .map(|block| block.mixin.apply_to(&base))
                .unwrap_or_else(|| MixinOverrides::default().apply_to(&base));
            let ability = Arc::new(Ability {
                id: format!("{}#{}", service.id, name),
                name: name.clone(),
                command: block
                    .and_then(|block| block.command.clone())
                    .unwrap_or_default(),
                description: block
                    .and_then(|block| block.description.clone())
                    .unwrap_or_default(),
                mixin: Mixin::new(mixin),
                exception: AtomicU32::new(0),
            });

            self.abilities.insert(handler.key.clone(), ability.clone());
            self.ability_handlers
                .insert(ability.id.clone(), handler.key.clone());
            named.insert(name, ability);
        }

        let mut abilities: Vec<Arc<Ability>> = named.into_values().collect();
        abilities.sort_by_key(|ability| sort_key(ability.mixin.position(), &ability.name));
        service.set_abilities(abilities.clone());
        Ok(abilities)
    }

    /// The service a handler belongs to, resolved through its plugin.
    pub fn service_for_handler(&self, handler_key: &str) -> Option<Arc<Service>> {
        let plugin_key = self.handler_plugins.get(handler_key)?;
        self.services.get(plugin_key.value()).map(|s| s.clone())
    }

    /// The ability bound to a handler, `None` for unnamed/ephemeral
    /// handlers.
    pub fn ability_for_handler(&self, handler_key: &str) -> Option<Arc<Ability>> {
        self.abilities.get(handler_key).map(|a| a.clone())
    }

    /// The handler key an ability is bound to. An ability that was never
    /// bound is a programming error, hence the panic.
    pub fn handler_for_ability(&self, ability: &Ability) -> String {
        self.ability_handlers
            .get(&ability.id)
            .map(|key| key.clone())
            .unwrap_or_else(|| panic!("ability {} was never bound to a handler", ability.id))
    }

    /// The plugin key a service is bound to. A service that was never
    /// bound is a programming error, hence the panic.
    pub fn plugin_for_service(&self, service: &Service) -> String {
        self.service_plugins
            .get(&service.id)
            .map(|key| key.clone())
            .unwrap_or_else(|| panic!("service {} was never bound to a plugin", service.id))
    }

    /// Look up a service by plugin key, service id, name, or alias.
    pub fn get_service(&self, key: &str) -> Option<Arc<Service>> {
        if let Some(service) = self.services.get(key) {
            return Some(service.clone());
        }
        if let Some(plugin_key) = self.service_plugins.get(key) {
            return self.services.get(plugin_key.value()).map(|s| s.clone());
        }
        self.services
            .iter()
            .map(|entry| entry.value().clone())
            .find(|service| service.name == key || service.alias.contains(key))
    }

    /// All services, ordered by (position, name), optionally filtered by
    /// tag.
    pub fn get_services(&self, tag: Option<&str>) -> Vec<Arc<Service>> {
        let mut services: Vec<Arc<Service>> = self
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|service| tag.is_none_or(|tag| service.tags.contains(tag)))
            .collect();
        services.sort_by_key(|service| sort_key(service.mixin.position(), &service.name));
        services
    }

    /// Fetch an ability by its 1-based position in the service listing.
    pub fn get_ability(&self, service: &Service, index: usize) -> Option<Arc<Ability>> {
        service.abilities().get(index.checked_sub(1)?).cloned()
    }

    /// Flip a per-subject status override on a service and persist it.
    pub async fn set_service_status(
        &self,
        service: &Service,
        subject: Subject,
        enabled: bool,
    ) -> Result<()> {
        service.mixin.set_status(subject, enabled);
        self.persist(SERVICE_COLLECTION, &service.id, &service.mixin)
            .await
    }

    /// Flip a per-subject status override on an ability and persist it.
    pub async fn set_ability_status(
        &self,
        ability: &Ability,
        subject: Subject,
        enabled: bool,
    ) -> Result<()> {
        ability.mixin.set_status(subject, enabled);
        self.persist(ABILITY_COLLECTION, &ability.id, &ability.mixin)
            .await
    }

    async fn persist(&self, collection: &str, id: &str, mixin: &Mixin) -> Result<()> {
        let doc = OverrideDoc::from_snapshot(&mixin.snapshot());
        let value = serde_json::to_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
        self.store.save(collection, id, value).await
    }

    /// Apply persisted runtime overrides to every service and ability.
    /// Store state wins; failures propagate so startup can abort.
    pub async fn sync(&self) -> Result<()> {
        let services: Vec<Arc<Service>> = self
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        try_join_all(services.iter().map(|service| self.sync_service(service))).await?;
        info!(services = services.len(), "Service overrides synced from store");
        Ok(())
    }

    async fn sync_service(&self, service: &Arc<Service>) -> Result<()> {
        if let Some(doc) = self.store.get(SERVICE_COLLECTION, &service.id).await? {
            let doc: OverrideDoc =
                serde_json::from_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
            doc.apply_to(&service.mixin);
        }
        for ability in service.abilities() {
            if let Some(doc) = self.store.get(ABILITY_COLLECTION, &ability.id).await? {
                let doc: OverrideDoc =
                    serde_json::from_value(doc).map_err(|e| WardenError::Store(e.to_string()))?;
                doc.apply_to(&ability.mixin);
            }
        }
        // Persisted positions may reorder the listing.
        let mut abilities = service.abilities();
        abilities.sort_by_key(|ability| sort_key(ability.mixin.position(), &ability.name));
        service.set_abilities(abilities);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CooldownConfig, MessageScope};
    use crate::store::MemoryStore;

    fn handler(key: &str, alias: Option<&str>, func: Option<&str>) -> HandlerInfo {
        HandlerInfo {
            key: key.to_string(),
            alias: alias.map(str::to_string),
            func_name: func.map(str::to_string),
        }
    }

    fn plugin() -> PluginInfo {
        PluginInfo {
            full_name: "dice_tools".to_string(),
            metadata: Some(ServiceConfig {
                name: Some("Dice".to_string()),
                author: Some("acme".to_string()),
                ..ServiceConfig::default()
            }),
            config_path: None,
            handlers: vec![
                handler("h-roll", Some("roll"), None),
                handler("h-flip", None, Some("flip")),
                handler("h-temp", None, None),
            ],
        }
    }

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_service_id_is_normalized() {
        let registry = registry();
        let service = registry.load_service(&plugin()).unwrap();
        assert_eq!(service.id, "acme.dice-tools");
    }

    #[test]
    fn test_author_validation() {
        let registry = registry();
        let mut info = plugin();
        info.metadata.as_mut().unwrap().author = Some("a.b".to_string());
        assert!(matches!(
            registry.load_service(&info),
            Err(WardenError::Config(_))
        ));
    }

    #[test]
    fn test_ability_name_resolution_and_ids() {
        let registry = registry();
        let service = registry.load_service(&plugin()).unwrap();

        // Alias preferred, function name as fallback, unnamed skipped.
        let names: Vec<String> = service
            .abilities()
            .iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(names, vec!["flip".to_string(), "roll".to_string()]);
        let roll = registry.ability_for_handler("h-roll").unwrap();
        assert_eq!(roll.id, "acme.dice-tools#roll");
        assert!(registry.ability_for_handler("h-temp").is_none());
    }

    #[test]
    fn test_unnamed_handler_still_resolves_service() {
        let registry = registry();
        registry.load_service(&plugin()).unwrap();
        let service = registry.service_for_handler("h-temp").unwrap();
        assert_eq!(service.id, "acme.dice-tools");
    }

    #[test]
    fn test_duplicate_ability_name_fails_service() {
        let registry = registry();
        let mut info = plugin();
        info.handlers = vec![
            handler("h1", Some("roll"), None),
            handler("h2", None, Some("roll")),
        ];
        assert!(matches!(
            registry.load_service(&info),
            Err(WardenError::Service(_))
        ));
    }

    #[test]
    fn test_ability_inherits_service_mixin() {
        let registry = registry();
        let mut info = plugin();
        let meta = info.metadata.as_mut().unwrap();
        meta.mixin.scope = Some(MessageScope::Group);
        meta.mixin.cooldown = Some(CooldownConfig {
            scope: crate::limiter::LimitScope::Local,
            prompt: None,
            time: 30,
        });
        meta.abilities = vec![AbilityConfig {
            name: "roll".to_string(),
            mixin: MixinOverrides {
                enabled: Some(false),
                ..MixinOverrides::default()
            },
            ..AbilityConfig::default()
        }];

        let service = registry.load_service(&info).unwrap();
        let roll = registry.ability_for_handler("h-roll").unwrap();
        assert_eq!(roll.mixin.scope(), MessageScope::Group);
        assert_eq!(roll.mixin.cooldown().unwrap().time, 30);
        assert!(!roll.mixin.enabled());
        // The sibling without a block inherits wholesale.
        let flip = registry.ability_for_handler("h-flip").unwrap();
        assert!(flip.mixin.enabled());
        assert_eq!(service.mixin.scope(), MessageScope::Group);
    }

    #[test]
    fn test_ordering_by_position_then_name() {
        let registry = registry();
        let mut info = plugin();
        let meta = info.metadata.as_mut().unwrap();
        meta.abilities = vec![AbilityConfig {
            name: "roll".to_string(),
            mixin: MixinOverrides {
                position: Some(0),
                ..MixinOverrides::default()
            },
            ..AbilityConfig::default()
        }];

        let service = registry.load_service(&info).unwrap();
        let names: Vec<String> = service
            .abilities()
            .iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(names, vec!["roll".to_string(), "flip".to_string()]);
        assert_eq!(
            registry.get_ability(&service, 1).unwrap().name,
            "roll"
        );
    }

    #[test]
    fn test_lookup_by_name_and_alias() {
        let registry = registry();
        let mut info = plugin();
        info.metadata.as_mut().unwrap().alias = HashSet::from(["d20".to_string()]);
        registry.load_service(&info).unwrap();

        assert!(registry.get_service("Dice").is_some());
        assert!(registry.get_service("d20").is_some());
        assert!(registry.get_service("acme.dice-tools").is_some());
        assert!(registry.get_service("nope").is_none());
    }

    #[tokio::test]
    async fn test_status_override_persists_and_syncs() {
        let store = Arc::new(MemoryStore::new());
        let registry = ServiceRegistry::new(store.clone());
        let service = registry.load_service(&plugin()).unwrap();
        let subject = Subject::group("g1");
        registry
            .set_service_status(&service, subject.clone(), false)
            .await
            .unwrap();

        // Fresh process: overrides come back from the store.
        let registry = ServiceRegistry::new(store);
        let service = registry.load_service(&plugin()).unwrap();
        assert!(service.mixin.check_enabled(&[subject.clone()]));
        registry.sync().await.unwrap();
        assert!(!service.mixin.check_enabled(&[subject]));
    }
}
