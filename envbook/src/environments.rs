//! Environment registry.
//!
//! Built once at startup from the `environments` section of the configuration and shared
//! read-only for the lifetime of the process. Free-form environment names from the config are
//! normalized into plain identifiers ([`plain_identifier`]) which are used as `environment_id`
//! everywhere else, including the database and the Vault paths.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{EnvironmentConfig, SecretsEngineConfig};
use crate::types::EnvironmentId;

/// Lowercase, with every character that is not an ASCII letter or digit replaced by `_`.
pub fn plain_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub display_name: String,
    pub description: Option<String>,
    pub requires_secret_material: bool,
    #[serde(skip)]
    pub secrets_engines: Vec<SecretsEngineConfig>,
}

impl Environment {
    fn from_config(name: &str, config: &EnvironmentConfig) -> Self {
        let id = plain_identifier(name);
        Self {
            display_name: config.show_name.clone().unwrap_or_else(|| id.clone()),
            description: config.description.clone(),
            requires_secret_material: config
                .secrets_engines
                .iter()
                .any(|engine| engine.engine_type.requires_secret_material()),
            secrets_engines: config.secrets_engines.clone(),
            id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    environments: BTreeMap<EnvironmentId, Environment>,
}

impl Registry {
    pub fn load(config: &BTreeMap<String, EnvironmentConfig>) -> Self {
        let environments = config
            .iter()
            .map(|(name, env_config)| {
                let environment = Environment::from_config(name, env_config);
                (environment.id.clone(), environment)
            })
            .collect();
        Self { environments }
    }

    pub fn exists(&self, environment_id: &str) -> bool {
        self.environments.contains_key(environment_id)
    }

    pub fn get(&self, environment_id: &str) -> Option<&Environment> {
        self.environments.get(environment_id)
    }

    /// Unknown environments have no requirement.
    pub fn has_secret_requirement(&self, environment_id: &str) -> bool {
        self.get(environment_id).is_some_and(|e| e.requires_secret_material)
    }

    /// Falls back to the identifier itself for environments that no longer exist.
    pub fn display_name(&self, environment_id: &str) -> String {
        self.get(environment_id)
            .map(|e| e.display_name.clone())
            .unwrap_or_else(|| environment_id.to_string())
    }

    /// Environments ordered by identifier.
    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.environments.values()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}
