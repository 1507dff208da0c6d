//! The service controller pipeline.
//!
//! For every inbound event, immediately before its handler runs, the
//! controller resolves the targeted service/ability, derives the event's
//! subject set, fans every registered checker out concurrently, and
//! aggregates their outcomes into a single verdict.

mod checkers;

pub use checkers::{
    CooldownChecker, EnabledChecker, PolicyChecker, QuotaChecker, RoleChecker, ScopeChecker,
};

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error};

use crate::access::{PolicyRegistry, RoleRegistry};
use crate::config::BotConfig;
use crate::error::{Result, WardenError};
use crate::event::Event;
use crate::limiter::LimiterRegistry;
use crate::registry::{Ability, Service, ServiceRegistry};
use crate::subject::Subject;

/// The outcome of a single checker.
///
/// Checkers return outcomes instead of raising: a reject is a policy
/// decision, a skip means the check did not apply, and a fault is a
/// genuine error. Collapsing these categories is the one mistake this
/// type exists to prevent.
#[derive(Debug)]
pub enum Outcome {
    /// The check passed.
    Pass,
    /// The check did not apply to this event; treated as a pass.
    Skip,
    /// Deny the event, optionally telling the user why.
    Reject {
        reason: String,
        prompt: Option<String>,
    },
    /// The checker itself failed; a bug, not a policy outcome.
    Fault(WardenError),
}

/// One soft rejection, carried in the aggregate verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Human-readable reason, logged at debug level.
    pub reason: String,
    /// Pre-composed prompt for the runtime to send before dropping the
    /// event.
    pub prompt: Option<String>,
}

/// The aggregate pipeline verdict for one event.
#[derive(Debug)]
pub enum Verdict {
    /// All checks passed; run the handler.
    Proceed,
    /// At least one checker rejected; drop the event after sending any
    /// prompts.
    Rejected(Vec<Rejection>),
}

impl Verdict {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Verdict::Proceed)
    }
}

/// Everything a checker may consult, resolved once per event.
pub struct CheckContext<'a> {
    pub event: &'a Event,
    pub service: &'a Arc<Service>,
    /// `None` for ephemeral handlers that never became an ability.
    pub ability: Option<&'a Arc<Ability>>,
    pub subjects: &'a [Subject],
    pub config: &'a BotConfig,
    pub roles: &'a RoleRegistry,
    pub policies: &'a PolicyRegistry,
    pub limiters: &'a LimiterRegistry,
}

/// A single registered check, run concurrently with its peers.
///
/// Checkers must not depend on one another's side effects within a
/// pipeline run; no execution order is guaranteed.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self, ctx: &CheckContext<'_>) -> Outcome;
}

/// A subject extractor contributes one subject per event, or `None`
/// when it does not apply.
pub type SubjectExtractor = Box<dyn Fn(&Event) -> Option<Subject> + Send + Sync>;

/// The controller: owns the registered extractors and checkers and the
/// registries they consult.
pub struct Controller {
    config: Arc<BotConfig>,
    services: Arc<ServiceRegistry>,
    roles: Arc<RoleRegistry>,
    policies: Arc<PolicyRegistry>,
    limiters: Arc<LimiterRegistry>,
    extractors: Vec<SubjectExtractor>,
    checkers: Vec<Arc<dyn Checker>>,
}

impl Controller {
    /// Build a controller with the built-in extractors (bot, user,
    /// group) and checkers (scope, enabled, role, policy, cooldown,
    /// quota).
    pub fn new(
        config: Arc<BotConfig>,
        services: Arc<ServiceRegistry>,
        roles: Arc<RoleRegistry>,
        policies: Arc<PolicyRegistry>,
        limiters: Arc<LimiterRegistry>,
    ) -> Self {
        let mut controller = Self {
            config,
            services,
            roles,
            policies,
            limiters,
            extractors: Vec::new(),
            checkers: Vec::new(),
        };
        controller.register_extractor(|event| Some(Subject::bot(event.bot_id.clone())));
        controller
            .register_extractor(|event| event.user_id.clone().map(Subject::user));
        controller
            .register_extractor(|event| event.group_id.clone().map(Subject::group));
        controller.register_checker(ScopeChecker);
        controller.register_checker(EnabledChecker);
        controller.register_checker(RoleChecker);
        controller.register_checker(PolicyChecker);
        controller.register_checker(CooldownChecker);
        controller.register_checker(QuotaChecker);
        controller
    }

    /// Register an additional subject extractor.
    pub fn register_extractor<F>(&mut self, extractor: F)
    where
        F: Fn(&Event) -> Option<Subject> + Send + Sync + 'static,
    {
        self.extractors.push(Box::new(extractor));
    }

    /// Register an additional checker.
    pub fn register_checker<C: Checker + 'static>(&mut self, checker: C) {
        self.checkers.push(Arc::new(checker));
    }

    /// Derive the subject set for an event. Extractors that do not
    /// apply are skipped, not failed.
    pub fn extract_subjects(&self, event: &Event) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = self
            .extractors
            .iter()
            .filter_map(|extractor| extractor(event))
            .collect();
        subjects.sort();
        subjects.dedup();
        subjects
    }

    /// Run the full pipeline for the event targeting `handler_key`.
    ///
    /// Returns `Verdict::Proceed` when the handler may run, a rejection
    /// verdict for policy outcomes, and `Err` for checker faults, which
    /// the runtime should log and treat as terminating only this
    /// event's processing.
    pub async fn check(&self, handler_key: &str, event: &Event) -> Result<Verdict> {
        let service = self
            .services
            .service_for_handler(handler_key)
            .ok_or_else(|| {
                WardenError::Service(format!("no service bound for handler {}", handler_key))
            })?;
        let ability = self.services.ability_for_handler(handler_key);
        let subjects = self.extract_subjects(event);

        let ctx = CheckContext {
            event,
            service: &service,
            ability: ability.as_ref(),
            subjects: &subjects,
            config: &self.config,
            roles: &self.roles,
            policies: &self.policies,
            limiters: &self.limiters,
        };

        let outcomes = join_all(
            self.checkers
                .iter()
                .map(|checker| async { (checker.name(), checker.check(&ctx).await) }),
        )
        .await;

        let mut rejections = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Outcome::Pass | Outcome::Skip => {}
                Outcome::Reject { reason, prompt } => {
                    debug!(
                        checker = name,
                        service = %service.id,
                        reason = %reason,
                        "Service check rejected the event"
                    );
                    rejections.push(Rejection { reason, prompt });
                }
                Outcome::Fault(error) => {
                    error!(
                        checker = name,
                        service = %service.id,
                        error = %error,
                        "Unexpected error during service checks, run cancelled"
                    );
                    return Err(error);
                }
            }
        }

        if rejections.is_empty() {
            Ok(Verdict::Proceed)
        } else {
            Ok(Verdict::Rejected(rejections))
        }
    }

    /// Startup hook: reconcile roles, policies, limiters, and service
    /// overrides from the store. Failures propagate so the runtime can
    /// abort instead of running with stale state.
    pub async fn startup_sync(&self) -> Result<()> {
        futures::try_join!(
            self.roles.sync(),
            self.policies.sync(),
            self.limiters.sync(),
            self.services.sync(),
        )?;
        Ok(())
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn limiters(&self) -> &LimiterRegistry {
        &self.limiters
    }
}
