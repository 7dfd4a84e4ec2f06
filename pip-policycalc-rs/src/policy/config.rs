// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::resource::PolicyResource;

/// Errors that can occur while loading calculator configuration
#[derive(Debug, Error)]
pub enum PolicyConfigError {
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Failed to load environment: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Invalid policy configuration: {0}")]
    InvalidConfig(String),
}

/// Calculator configuration.
///
/// Loaded from the environment with the `PIP_` prefix, for example
/// `PIP_CALCULATE_ORIGINAL_ACTION=true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatorConfig {
    /// Recompute the "before" action instead of using the recorded one
    #[serde(default)]
    pub calculate_original_action: bool,
}

impl CalculatorConfig {
    /// Load configuration from `PIP_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, PolicyConfigError> {
        Ok(envy::prefixed("PIP_").from_env()?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// A namespace and its labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A service account and its labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Ordered policies of one tier.
pub type Tier = Vec<PolicyResource>;

/// A consistent snapshot of the resources used to calculate flow actions.
///
/// Tiers and the policies within them are in enforcement order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    #[serde(default)]
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccount>,
}

impl ResourceData {
    /// Parse and validate a resource snapshot from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyConfigError> {
        let data: ResourceData = serde_yaml::from_str(yaml)?;
        data.validate()?;
        Ok(data)
    }

    pub fn to_yaml(&self) -> Result<String, PolicyConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Namespaced policies must carry a namespace.
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        for policy in self.tiers.iter().flatten() {
            if let PolicyResource::NetworkPolicy(np) = policy {
                if np.metadata.namespace.as_deref().map_or(true, str::is_empty) {
                    return Err(PolicyConfigError::InvalidConfig(format!(
                        "NetworkPolicy '{}' has no namespace",
                        np.metadata.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total number of policies across all tiers.
    pub fn policy_count(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }
}
