//! Rate limiters shared by services and abilities.
//!
//! Three limiter kinds share one contract: a pure `check(key)` predicate, a
//! consumption/claim mutator, and an info accessor used to render the
//! optional user-facing prompt. [`Cooldown`] and [`Quota`] persist their
//! counters through the [`Store`](crate::store::Store); [`Lock`] tracks
//! in-flight work and is process-local only.

mod cooldown;
mod lock;
mod quota;
mod registry;

pub use cooldown::Cooldown;
pub use lock::{Lock, LockClaim};
pub use quota::Quota;
pub use registry::LimiterRegistry;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::event::Event;

/// Isolation granularity of a rate limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// One shared key for everyone.
    Global,
    /// One key per group (per user outside groups).
    Group,
    /// One key per user.
    User,
    /// One key per (group, user) pair.
    #[default]
    Local,
}

impl LimitScope {
    /// Human-readable description of who the limit applies to, used in
    /// prompt templates as `{target}`.
    pub fn target(&self) -> &'static str {
        match self {
            LimitScope::Global => "everyone",
            LimitScope::Group => "this group",
            LimitScope::User | LimitScope::Local => "you",
        }
    }
}

/// Derive the counter key for an event under the given scope.
///
/// Returns `None` when the scope needs an id the event cannot supply;
/// callers must treat that as "no limiting applies".
pub fn scope_key(event: &Event, scope: LimitScope) -> Option<String> {
    let group_id = event.group_id.as_deref();
    let user_id = event.user_id.as_deref();

    match scope {
        LimitScope::Global => Some("GLOBAL".to_string()),
        LimitScope::Group => group_id.or(user_id).map(str::to_string),
        LimitScope::User => user_id.map(str::to_string),
        LimitScope::Local => match (group_id, user_id) {
            (Some(group), Some(user)) => Some(format!("{}_{}", group, user)),
            (None, Some(user)) => Some(user.to_string()),
            _ => None,
        },
    }
}

/// Shared limiter contract.
pub trait Limiter {
    /// Isolation scope of this limiter.
    fn scope(&self) -> LimitScope;

    /// The raw prompt template, if one is configured.
    fn prompt_template(&self) -> Option<&str>;

    /// Whether a call under `key` is currently permitted. Never mutates.
    fn check(&self, key: &str) -> bool;

    /// Named values describing the current state under `key`, used to
    /// fill the prompt template.
    fn info(&self, key: &str) -> Vec<(&'static str, String)>;

    /// Render the prompt template against the current state, if a
    /// template is configured.
    fn prompt(&self, key: &str) -> Option<String> {
        let template = self.prompt_template()?;
        Some(render_template(template, &self.info(key)))
    }
}

/// Substitute `{name}` placeholders with the given values.
fn render_template(template: &str, values: &[(&'static str, String)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in values {
        rendered = rendered.replace(&format!("{{{}}}", name), value);
    }
    rendered
}

/// Current wall-clock time as fractional epoch seconds.
pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Convert a second count to a compact human-readable form ("1h2m3s").
pub fn human_readable_time(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_global() {
        let event = Event::group_message("bot", "u1", "g1");
        assert_eq!(scope_key(&event, LimitScope::Global).unwrap(), "GLOBAL");
    }

    #[test]
    fn test_scope_key_group_falls_back_to_user() {
        let group = Event::group_message("bot", "u1", "g1");
        let private = Event::private_message("bot", "u1");
        assert_eq!(scope_key(&group, LimitScope::Group).unwrap(), "g1");
        assert_eq!(scope_key(&private, LimitScope::Group).unwrap(), "u1");
    }

    #[test]
    fn test_scope_key_local() {
        let group = Event::group_message("bot", "u1", "g1");
        let private = Event::private_message("bot", "u1");
        assert_eq!(scope_key(&group, LimitScope::Local).unwrap(), "g1_u1");
        assert_eq!(scope_key(&private, LimitScope::Local).unwrap(), "u1");
    }

    #[test]
    fn test_scope_key_missing_user() {
        // A notice carries no user id; user-keyed scopes do not apply.
        let notice = Event::notice("bot");
        assert!(scope_key(&notice, LimitScope::User).is_none());
        assert!(scope_key(&notice, LimitScope::Local).is_none());
        assert!(scope_key(&notice, LimitScope::Group).is_none());
        assert!(scope_key(&notice, LimitScope::Global).is_some());
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "wait {remain_time}s, {target}",
            &[("remain_time", "5".into()), ("target", "you".into())],
        );
        assert_eq!(rendered, "wait 5s, you");
    }

    #[test]
    fn test_human_readable_time() {
        assert_eq!(human_readable_time(0), "0s");
        assert_eq!(human_readable_time(5), "5s");
        assert_eq!(human_readable_time(65), "1m5s");
        assert_eq!(human_readable_time(3600), "1h");
        assert_eq!(human_readable_time(3725), "1h2m5s");
        assert_eq!(human_readable_time(-3), "0s");
    }
}
