//! Runtime configuration for the Warden engine.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration supplied by the owning bot runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// User ids that always hold the superuser role, independent of
    /// any explicit assignment.
    #[serde(default)]
    pub superusers: HashSet<String>,

    /// Capability set granted when no policy applies to a subject.
    #[serde(default = "default_policy_allow")]
    pub default_policy_allow: HashSet<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            superusers: HashSet::new(),
            default_policy_allow: default_policy_allow(),
        }
    }
}

fn default_policy_allow() -> HashSet<String> {
    HashSet::from(["*".to_string()])
}

impl BotConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BotConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::WardenError::Config(e.to_string()))?;
        Ok(config)
    }
}
