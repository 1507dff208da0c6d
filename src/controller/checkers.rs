//! Built-in service checkers.
//!
//! Each checker is an independent predicate over the resolved service,
//! ability, event, and subject set. They run concurrently and must not
//! rely on any execution order.

use async_trait::async_trait;

use crate::error::WardenError;
use crate::event::MessageKind;
use crate::limiter::{scope_key, Limiter};
use crate::registry::MessageScope;
use crate::subject::Subject;

use super::{CheckContext, Checker, Outcome};

fn reject(reason: impl Into<String>) -> Outcome {
    Outcome::Reject {
        reason: reason.into(),
        prompt: None,
    }
}

fn join_subjects(subjects: &[Subject]) -> String {
    subjects
        .iter()
        .map(|subject| subject.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The event's message scope must match both the service's and the
/// ability's declared scope (or either declares `all`).
pub struct ScopeChecker;

#[async_trait]
impl Checker for ScopeChecker {
    fn name(&self) -> &'static str {
        "scope"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome {
        // Non-message events carry no message scope.
        let Some(kind) = ctx.event.message_kind else {
            return Outcome::Skip;
        };

        let mut scopes = vec![ctx.service.mixin.scope()];
        if let Some(ability) = ctx.ability {
            scopes.push(ability.mixin.scope());
        }
        for scope in scopes {
            if scope != MessageScope::All && scope.as_str() != kind.as_str() {
                return reject(format!(
                    "message scope mismatch: event is {}, required {}",
                    kind.as_str(),
                    scope.as_str()
                ));
            }
        }
        Outcome::Pass
    }
}

/// The effective enabled state (per-subject override, else default)
/// must be true for every subject, on both the ability and the service.
pub struct EnabledChecker;

#[async_trait]
impl Checker for EnabledChecker {
    fn name(&self) -> &'static str {
        "enabled"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome {
        if let Some(ability) = ctx.ability {
            let disabled = ability.mixin.disabled_subjects(ctx.subjects);
            if !disabled.is_empty() {
                return reject(format!(
                    "ability \"{}#{}\" is disabled for: {}",
                    ctx.service.name,
                    ability.name,
                    join_subjects(&disabled)
                ));
            }
        }
        let disabled = ctx.service.mixin.disabled_subjects(ctx.subjects);
        if !disabled.is_empty() {
            return reject(format!(
                "service \"{}\" is disabled for: {}",
                ctx.service.name,
                join_subjects(&disabled)
            ));
        }
        Outcome::Pass
    }
}

/// The caller's highest role must meet the ability's or the service's
/// required user role.
pub struct RoleChecker;

#[async_trait]
impl Checker for RoleChecker {
    fn name(&self) -> &'static str {
        "role"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome {
        let Some(user_id) = ctx.event.user_id.as_deref() else {
            return Outcome::Skip;
        };

        // Explicit assignments win; otherwise the platform-reported
        // standing seeds the role, defaulting to normal. That standing
        // describes group membership, so it is only trusted on group
        // messages.
        let user_role = match ctx.roles.highest(user_id, ctx.subjects) {
            Some(role) => role,
            None => {
                let platform = ctx
                    .event
                    .sender_role
                    .as_deref()
                    .filter(|_| ctx.event.message_kind == Some(MessageKind::Group))
                    .filter(|name| *name != "member")
                    .unwrap_or("normal");
                match ctx.roles.get(platform).or_else(|| ctx.roles.get("normal")) {
                    Some(role) => role,
                    None => {
                        return Outcome::Fault(WardenError::Config(
                            "the built-in normal role is missing".to_string(),
                        ))
                    }
                }
            }
        };

        let mut required = vec![ctx.service.mixin.role().user];
        if let Some(ability) = ctx.ability {
            required.push(ability.mixin.role().user);
        }
        for name in &required {
            let Some(role) = ctx.roles.get(name) else {
                return Outcome::Fault(WardenError::Config(format!(
                    "required role does not exist: {}",
                    name
                )));
            };
            if user_role.check(&role) {
                return Outcome::Pass;
            }
        }
        reject(format!(
            "user role is insufficient: requires at least {}, current is {}",
            required.join(" or "),
            user_role.name()
        ))
    }
}

/// The caller's allowed-capability set must contain `"*"`, the ability
/// id, or the service id.
pub struct PolicyChecker;

#[async_trait]
impl Checker for PolicyChecker {
    fn name(&self) -> &'static str {
        "policy"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome {
        let allowed = ctx.policies.get_allowed(ctx.subjects);
        if allowed.contains("*") || allowed.contains(&ctx.service.id) {
            return Outcome::Pass;
        }
        if let Some(ability) = ctx.ability {
            if allowed.contains(&ability.id) {
                return Outcome::Pass;
            }
        }
        reject(format!(
            "no policy permits access for: {}",
            join_subjects(ctx.subjects)
        ))
    }
}

/// If the service or ability declares a cooldown, the scope key must
/// not be cooling down; on pass the cooldown is armed.
pub struct CooldownChecker;

impl CooldownChecker {
    async fn check_source(&self, ctx: &CheckContext<'_>, id: &str) -> Outcome {
        let config = if let Some(ability) = ctx.ability.filter(|a| a.id == id) {
            ability.mixin.cooldown()
        } else {
            ctx.service.mixin.cooldown()
        };
        let Some(config) = config else {
            return Outcome::Pass;
        };
        // No derivable key means no limiting applies.
        let Some(key) = scope_key(ctx.event, config.scope) else {
            return Outcome::Skip;
        };

        let limiter = ctx
            .limiters
            .cooldown(id, config.scope, config.prompt.clone(), config.time);
        if limiter.check(&key) {
            if let Err(error) = limiter.start(&key, 0).await {
                return Outcome::Fault(error);
            }
            return Outcome::Pass;
        }
        Outcome::Reject {
            reason: "service or ability is cooling down".to_string(),
            prompt: limiter.prompt(&key),
        }
    }
}

#[async_trait]
impl Checker for CooldownChecker {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome {
        let mut ids = vec![ctx.service.id.clone()];
        if let Some(ability) = ctx.ability {
            ids.push(ability.id.clone());
        }
        for id in &ids {
            match self.check_source(ctx, id).await {
                Outcome::Pass | Outcome::Skip => {}
                other => return other,
            }
        }
        Outcome::Pass
    }
}

/// If the service or ability declares a quota, the scope key must have
/// remaining quota; on pass one unit is consumed.
pub struct QuotaChecker;

impl QuotaChecker {
    async fn check_source(&self, ctx: &CheckContext<'_>, id: &str) -> Outcome {
        let config = if let Some(ability) = ctx.ability.filter(|a| a.id == id) {
            ability.mixin.quota()
        } else {
            ctx.service.mixin.quota()
        };
        let Some(config) = config else {
            return Outcome::Pass;
        };
        let Some(key) = scope_key(ctx.event, config.scope) else {
            return Outcome::Skip;
        };

        let limiter = ctx.limiters.quota(
            id,
            config.scope,
            config.prompt.clone(),
            config.limit,
            config.reset,
        );
        if limiter.check(&key) {
            if let Err(error) = limiter.consume(&key, 1).await {
                return Outcome::Fault(error);
            }
            return Outcome::Pass;
        }
        Outcome::Reject {
            reason: "service or ability quota is exhausted".to_string(),
            prompt: limiter.prompt(&key),
        }
    }
}

#[async_trait]
impl Checker for QuotaChecker {
    fn name(&self) -> &'static str {
        "quota"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome {
        let mut ids = vec![ctx.service.id.clone()];
        if let Some(ability) = ctx.ability {
            ids.push(ability.id.clone());
        }
        for id in &ids {
            match self.check_source(ctx, id).await {
                Outcome::Pass | Outcome::Skip => {}
                other => return other,
            }
        }
        Outcome::Pass
    }
}
