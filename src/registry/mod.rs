//! Service and ability configuration.
//!
//! A [`Service`] is the access-control facade bound one-to-one with a
//! loaded plugin; an [`Ability`] is bound one-to-one with a registered
//! handler inside it. Both carry the shared [`MixinConfig`] block;
//! ability fields default from the owning service where the per-ability
//! config block leaves them unset.

mod manager;

pub use manager::{AbilityConfig, HandlerInfo, PluginInfo, ServiceConfig, ServiceRegistry};

use chrono::NaiveTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::limiter::LimitScope;
use crate::subject::Subject;

/// Running state of a service or ability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Usable by everyone.
    #[default]
    Normal,
    /// Disabled for everyone, e.g. after abuse or an unfixable problem.
    Shutdown,
    /// Disabled for everyone while under maintenance.
    Maint,
    /// Only superusers and test users may use it.
    Develop,
    /// May misbehave but remains usable.
    Exception,
    /// Broken and unusable until fixed.
    Fault,
}

/// Minimum roles required to use and to manage a service or ability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequirement {
    #[serde(default = "default_user_role")]
    pub user: String,
    #[serde(default = "default_manager_role")]
    pub manager: String,
}

impl Default for RoleRequirement {
    fn default() -> Self {
        Self {
            user: default_user_role(),
            manager: default_manager_role(),
        }
    }
}

fn default_user_role() -> String {
    "normal".to_string()
}

fn default_manager_role() -> String {
    "admin".to_string()
}

/// Declared cooldown for a service or ability.
///
/// Deserializes either from a full mapping or from a bare integer
/// shorthand meaning `{ time: <n> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CooldownRepr")]
pub struct CooldownConfig {
    pub scope: LimitScope,
    pub prompt: Option<String>,
    /// Cooldown duration in seconds.
    pub time: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CooldownRepr {
    Shorthand(u64),
    Full {
        #[serde(default, alias = "type")]
        scope: LimitScope,
        #[serde(default)]
        prompt: Option<String>,
        time: u64,
    },
}

impl From<CooldownRepr> for CooldownConfig {
    fn from(repr: CooldownRepr) -> Self {
        match repr {
            CooldownRepr::Shorthand(time) => Self {
                scope: LimitScope::default(),
                prompt: None,
                time,
            },
            CooldownRepr::Full {
                scope,
                prompt,
                time,
            } => Self {
                scope,
                prompt,
                time,
            },
        }
    }
}

/// Declared per-window quota for a service or ability.
///
/// Deserializes either from a full mapping or from a bare integer
/// shorthand meaning `{ limit: <n> }`. The reset time accepts an hour
/// number or an `"HH:MM[:SS]"` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuotaRepr")]
pub struct QuotaConfig {
    pub scope: LimitScope,
    pub prompt: Option<String>,
    /// Maximum uses per reset window.
    pub limit: u64,
    /// Time of day the window resets at.
    pub reset: NaiveTime,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuotaRepr {
    Shorthand(u64),
    Full {
        #[serde(default, alias = "type")]
        scope: LimitScope,
        #[serde(default)]
        prompt: Option<String>,
        limit: u64,
        #[serde(default)]
        reset: Option<ResetTimeRepr>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResetTimeRepr {
    Hour(u32),
    Text(String),
}

impl TryFrom<QuotaRepr> for QuotaConfig {
    type Error = String;

    fn try_from(repr: QuotaRepr) -> Result<Self, Self::Error> {
        match repr {
            QuotaRepr::Shorthand(limit) => Ok(Self {
                scope: LimitScope::default(),
                prompt: None,
                limit,
                reset: NaiveTime::default(),
            }),
            QuotaRepr::Full {
                scope,
                prompt,
                limit,
                reset,
            } => Ok(Self {
                scope,
                prompt,
                limit,
                reset: parse_reset_time(reset)?,
            }),
        }
    }
}

fn parse_reset_time(repr: Option<ResetTimeRepr>) -> Result<NaiveTime, String> {
    match repr {
        None => Ok(NaiveTime::default()),
        Some(ResetTimeRepr::Hour(hour)) => NaiveTime::from_hms_opt(hour, 0, 0)
            .ok_or_else(|| format!("invalid reset hour: {}", hour)),
        Some(ResetTimeRepr::Text(text)) => {
            let parts: Vec<&str> = text.split(':').collect();
            if parts.is_empty() || parts.len() > 3 {
                return Err(format!("invalid reset time: {}", text));
            }
            let mut fields = [0u32; 3];
            for (slot, part) in fields.iter_mut().zip(&parts) {
                *slot = part
                    .parse()
                    .map_err(|_| format!("invalid reset time: {}", text))?;
            }
            NaiveTime::from_hms_opt(fields[0], fields[1], fields[2])
                .ok_or_else(|| format!("invalid reset time: {}", text))
        }
    }
}

/// The shared configuration block carried by services and abilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixinConfig {
    /// Default enabled state, overridable per subject via `status`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit sort position for enumeration; unset sorts last.
    #[serde(default)]
    pub position: Option<u32>,
    /// Whether to show in help listings.
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub role: RoleRequirement,
    /// Which message kinds may trigger it.
    #[serde(default)]
    pub scope: MessageScope,
    #[serde(default)]
    pub cooldown: Option<CooldownConfig>,
    #[serde(default)]
    pub quota: Option<QuotaConfig>,
    #[serde(default)]
    pub state: State,
    /// Per-subject enabled overrides; absence falls back to `enabled`.
    #[serde(default)]
    pub status: HashMap<Subject, bool>,
}

fn default_true() -> bool {
    true
}

impl Default for MixinConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            position: None,
            visible: true,
            role: RoleRequirement::default(),
            scope: MessageScope::default(),
            cooldown: None,
            quota: None,
            state: State::default(),
            status: HashMap::new(),
        }
    }
}

/// Message scope a service or ability responds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageScope {
    /// Group messages only.
    Group,
    /// Private messages only.
    Private,
    /// Both.
    #[default]
    All,
}

impl MessageScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageScope::Group => "group",
            MessageScope::Private => "private",
            MessageScope::All => "all",
        }
    }
}

/// All-optional mirror of [`MixinConfig`], used for declared metadata
/// and per-ability config blocks. `None` fields inherit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixinOverrides {
    pub enabled: Option<bool>,
    pub position: Option<u32>,
    pub visible: Option<bool>,
    pub role: Option<RoleRequirement>,
    pub scope: Option<MessageScope>,
    pub cooldown: Option<CooldownConfig>,
    pub quota: Option<QuotaConfig>,
    pub state: Option<State>,
}

impl MixinOverrides {
    /// Overlay `other` on top of `self`, keeping `self` where `other`
    /// is unset.
    pub fn merged_with(&self, other: &MixinOverrides) -> MixinOverrides {
        MixinOverrides {
            enabled: other.enabled.or(self.enabled),
            position: other.position.or(self.position),
            visible: other.visible.or(self.visible),
            role: other.role.clone().or_else(|| self.role.clone()),
            scope: other.scope.or(self.scope),
            cooldown: other.cooldown.clone().or_else(|| self.cooldown.clone()),
            quota: other.quota.clone().or_else(|| self.quota.clone()),
            state: other.state.or(self.state),
        }
    }

    /// Resolve against a base configuration.
    pub fn apply_to(&self, base: &MixinConfig) -> MixinConfig {
        MixinConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            position: self.position.or(base.position),
            visible: self.visible.unwrap_or(base.visible),
            role: self.role.clone().unwrap_or_else(|| base.role.clone()),
            scope: self.scope.unwrap_or(base.scope),
            cooldown: self.cooldown.clone().or_else(|| base.cooldown.clone()),
            quota: self.quota.clone().or_else(|| base.quota.clone()),
            state: self.state.unwrap_or(base.state),
            status: HashMap::new(),
        }
    }
}

/// Shared runtime state wrapper for the mixin block.
///
/// Reads snapshot the interesting fields; `status` mutations go through
/// the owning registry so they persist.
pub struct Mixin {
    inner: Mutex<MixinConfig>,
}

impl Mixin {
    pub fn new(config: MixinConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    pub fn snapshot(&self) -> MixinConfig {
        self.inner.lock().clone()
    }

    pub fn enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn position(&self) -> Option<u32> {
        self.inner.lock().position
    }

    pub fn visible(&self) -> bool {
        self.inner.lock().visible
    }

    pub fn role(&self) -> RoleRequirement {
        self.inner.lock().role.clone()
    }

    pub fn scope(&self) -> MessageScope {
        self.inner.lock().scope
    }

    pub fn cooldown(&self) -> Option<CooldownConfig> {
        self.inner.lock().cooldown.clone()
    }

    pub fn quota(&self) -> Option<QuotaConfig> {
        self.inner.lock().quota.clone()
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub(crate) fn set_status(&self, subject: Subject, enabled: bool) {
        self.inner.lock().status.insert(subject, enabled);
    }

    pub(crate) fn overwrite(&self, config: MixinConfig) {
        *self.inner.lock() = config;
    }

    /// Whether every given subject resolves to enabled.
    pub fn check_enabled(&self, subjects: &[Subject]) -> bool {
        let inner = self.inner.lock();
        subjects
            .iter()
            .all(|subject| *inner.status.get(subject).unwrap_or(&inner.enabled))
    }

    /// The subset of subjects whose effective state is enabled.
    pub fn enabled_subjects(&self, subjects: &[Subject]) -> Vec<Subject> {
        let inner = self.inner.lock();
        subjects
            .iter()
            .filter(|subject| *inner.status.get(*subject).unwrap_or(&inner.enabled))
            .cloned()
            .collect()
    }

    /// The subset of subjects whose effective state is disabled.
    pub fn disabled_subjects(&self, subjects: &[Subject]) -> Vec<Subject> {
        let inner = self.inner.lock();
        subjects
            .iter()
            .filter(|subject| !*inner.status.get(*subject).unwrap_or(&inner.enabled))
            .cloned()
            .collect()
    }
}

/// A service: the access-control/config facade for one loaded plugin.
pub struct Service {
    /// Globally unique, stable id: `"{author}.{plugin-full-name}"`.
    pub id: String,
    pub name: String,
    pub alias: HashSet<String>,
    pub summary: String,
    pub description: String,
    pub usage: String,
    pub version: String,
    pub author: String,
    pub tags: HashSet<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub mixin: Mixin,
    /// Owned abilities, ordered by (position, name).
    abilities: Mutex<Vec<Arc<Ability>>>,
}

impl Service {
    pub fn abilities(&self) -> Vec<Arc<Ability>> {
        self.abilities.lock().clone()
    }

    pub(crate) fn set_abilities(&self, abilities: Vec<Arc<Ability>>) {
        *self.abilities.lock() = abilities;
    }
}

/// An ability: the access-control/config facade for one registered
/// handler inside a service.
pub struct Ability {
    /// Globally unique, stable id: `"{service-id}#{name}"`.
    pub id: String,
    pub name: String,
    /// Command/usage example shown in help.
    pub command: String,
    pub description: String,
    pub mixin: Mixin,
    /// Count of exceptions raised by this ability's handler.
    exception: AtomicU32,
}

impl Ability {
    pub fn exception_count(&self) -> u32 {
        self.exception.load(Ordering::Relaxed)
    }

    /// Record one handler exception.
    pub fn record_exception(&self) {
        self.exception.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_shorthand() {
        let config: CooldownConfig = serde_yaml::from_str("10").unwrap();
        assert_eq!(config.time, 10);
        assert_eq!(config.scope, LimitScope::Local);
        assert!(config.prompt.is_none());
    }

    #[test]
    fn test_cooldown_full_form_with_type_alias() {
        let yaml = r#"
type: group
time: 30
prompt: "wait {remain_time}s"
"#;
        let config: CooldownConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scope, LimitScope::Group);
        assert_eq!(config.time, 30);
        assert!(config.prompt.is_some());
    }

    #[test]
    fn test_quota_reset_time_forms() {
        let hour: QuotaConfig = serde_yaml::from_str("{ limit: 3, reset: 4 }").unwrap();
        assert_eq!(hour.reset, NaiveTime::from_hms_opt(4, 0, 0).unwrap());

        let text: QuotaConfig = serde_yaml::from_str("{ limit: 3, reset: \"04:30\" }").unwrap();
        assert_eq!(text.reset, NaiveTime::from_hms_opt(4, 30, 0).unwrap());

        let shorthand: QuotaConfig = serde_yaml::from_str("3").unwrap();
        assert_eq!(shorthand.limit, 3);
        assert_eq!(shorthand.reset, NaiveTime::default());
    }

    #[test]
    fn test_quota_invalid_reset_is_an_error() {
        let result: Result<QuotaConfig, _> =
            serde_yaml::from_str("{ limit: 3, reset: \"4:30:00:00\" }");
        assert!(result.is_err());
    }

    #[test]
    fn test_status_override_beats_default() {
        let mixin = Mixin::new(MixinConfig::default());
        let subject = Subject::group("g1");
        assert!(mixin.check_enabled(&[subject.clone()]));

        mixin.set_status(subject.clone(), false);
        assert!(!mixin.check_enabled(&[subject.clone()]));
        assert_eq!(mixin.disabled_subjects(&[subject]).len(), 1);
    }

    #[test]
    fn test_disabled_default_with_enabling_override() {
        let config = MixinConfig {
            enabled: false,
            ..MixinConfig::default()
        };
        let mixin = Mixin::new(config);
        let on = Subject::group("g1");
        let off = Subject::group("g2");
        mixin.set_status(on.clone(), true);

        assert!(mixin.check_enabled(&[on.clone()]));
        assert!(!mixin.check_enabled(&[on, off]));
    }

    #[test]
    fn test_overrides_inherit_from_base() {
        let base = MixinConfig {
            scope: MessageScope::Group,
            cooldown: Some(CooldownConfig {
                scope: LimitScope::Local,
                prompt: None,
                time: 10,
            }),
            ..MixinConfig::default()
        };
        let overrides = MixinOverrides {
            enabled: Some(false),
            ..MixinOverrides::default()
        };
        let resolved = overrides.apply_to(&base);
        assert!(!resolved.enabled);
        assert_eq!(resolved.scope, MessageScope::Group);
        assert_eq!(resolved.cooldown.unwrap().time, 10);
    }
}
