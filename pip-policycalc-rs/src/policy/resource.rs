// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Calico v3 policy resources as consumed by the calculator.
//!
//! Only the fields that influence flow matching are modelled. Field names
//! follow the v3 API (camelCase) so snapshots can be loaded from YAML exports.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::action::Action;

/// Tier used when a policy does not name one.
pub const DEFAULT_TIER: &str = "default";

/// Prefix given to Kubernetes network policies after conversion to Calico.
pub const KNP_PREFIX: &str = "knp.default.";

// =============================================================================
// Rule Fields
// =============================================================================

/// Protocol given either by number or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Protocol {
    Number(u8),
    Name(String),
}

/// A port entry in a rule: a number, a `"min:max"` range, a numeric string
/// or a named port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Port {
    Number(u16),
    Name(String),
}

/// Parsed form of a [`Port`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    Range { min: u16, max: u16 },
    Named(String),
}

impl Port {
    /// Interpret the port entry. Strings that do not parse as numbers or
    /// ranges are treated as port names.
    pub fn spec(&self) -> PortSpec {
        match self {
            Port::Number(n) => PortSpec::Range { min: *n, max: *n },
            Port::Name(s) => {
                if let Some((min, max)) = s.split_once(':') {
                    if let (Ok(min), Ok(max)) = (min.trim().parse(), max.trim().parse()) {
                        return PortSpec::Range { min, max };
                    }
                } else if let Ok(n) = s.trim().parse() {
                    return PortSpec::Range { min: n, max: n };
                }
                PortSpec::Named(s.clone())
            }
        }
    }
}

/// ICMP type/code match criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpFields {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u8>,
}

/// HTTP path match criterion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// HTTP match criteria. Flow logs never carry HTTP data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<HttpPath>,
}

/// Service account match criteria: names, a selector, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountMatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}

/// Match criteria for the source or destination of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_nets: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace_selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_accounts: Option<ServiceAccountMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
}

impl EntityRule {
    /// Whether the entity selects endpoints in a way that is scoped to the
    /// policy namespace unless a namespace selector says otherwise.
    pub fn selects_endpoints(&self) -> bool {
        !self.selector.is_empty() || !self.not_selector.is_empty() || self.service_accounts.is_some()
    }
}

/// A single ingress or egress rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp: Option<IcmpFields>,
    #[serde(rename = "notICMP", default, skip_serializing_if = "Option::is_none")]
    pub not_icmp: Option<IcmpFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpMatch>,
    #[serde(default)]
    pub source: EntityRule,
    #[serde(default)]
    pub destination: EntityRule,
}

impl Rule {
    /// A rule with the given action and no match criteria.
    pub fn with_action(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }

    /// The rule action if it is one that affects enforcement.
    pub fn policy_action(&self) -> Option<Action> {
        match self.action.parse() {
            Ok(action @ (Action::Allow | Action::Deny | Action::Pass)) => Some(action),
            _ => None,
        }
    }
}

// =============================================================================
// Policy Resources
// =============================================================================

/// Direction a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyType {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<PolicyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<Rule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalNetworkPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace_selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<PolicyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<Rule>,
}

/// Namespaced Calico network policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NetworkPolicySpec,
}

/// Cluster-scoped Calico network policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalNetworkPolicy {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GlobalNetworkPolicySpec,
}

/// A policy resource in a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PolicyResource {
    NetworkPolicy(NetworkPolicy),
    GlobalNetworkPolicy(GlobalNetworkPolicy),
}

impl PolicyResource {
    pub fn name(&self) -> &str {
        match self {
            PolicyResource::NetworkPolicy(p) => &p.metadata.name,
            PolicyResource::GlobalNetworkPolicy(p) => &p.metadata.name,
        }
    }

    /// Namespace of a namespaced policy. Always `None` for global policies.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            PolicyResource::NetworkPolicy(p) => p.metadata.namespace.as_deref(),
            PolicyResource::GlobalNetworkPolicy(_) => None,
        }
    }

    pub fn tier(&self) -> &str {
        let tier = match self {
            PolicyResource::NetworkPolicy(p) => p.spec.tier.as_deref(),
            PolicyResource::GlobalNetworkPolicy(p) => p.spec.tier.as_deref(),
        };
        match tier {
            Some(t) if !t.is_empty() => t,
            _ => DEFAULT_TIER,
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            PolicyResource::NetworkPolicy(p) => &p.spec.selector,
            PolicyResource::GlobalNetworkPolicy(p) => &p.spec.selector,
        }
    }

    /// Namespace selector of a global policy. Empty for namespaced policies.
    pub fn namespace_selector(&self) -> &str {
        match self {
            PolicyResource::NetworkPolicy(_) => "",
            PolicyResource::GlobalNetworkPolicy(p) => &p.spec.namespace_selector,
        }
    }

    pub fn service_account_selector(&self) -> &str {
        match self {
            PolicyResource::NetworkPolicy(p) => &p.spec.service_account_selector,
            PolicyResource::GlobalNetworkPolicy(p) => &p.spec.service_account_selector,
        }
    }

    pub fn ingress(&self) -> &[Rule] {
        match self {
            PolicyResource::NetworkPolicy(p) => &p.spec.ingress,
            PolicyResource::GlobalNetworkPolicy(p) => &p.spec.ingress,
        }
    }

    pub fn egress(&self) -> &[Rule] {
        match self {
            PolicyResource::NetworkPolicy(p) => &p.spec.egress,
            PolicyResource::GlobalNetworkPolicy(p) => &p.spec.egress,
        }
    }

    /// Policy types, applying the API defaults when none are given: ingress
    /// always, egress only when egress rules are present.
    pub fn types(&self) -> Vec<PolicyType> {
        let types = match self {
            PolicyResource::NetworkPolicy(p) => &p.spec.types,
            PolicyResource::GlobalNetworkPolicy(p) => &p.spec.types,
        };
        if !types.is_empty() {
            return types.clone();
        }
        let mut types = vec![PolicyType::Ingress];
        if !self.egress().is_empty() {
            types.push(PolicyType::Egress);
        }
        types
    }

    pub fn applies_to(&self, policy_type: PolicyType) -> bool {
        self.types().contains(&policy_type)
    }

    pub fn resource_id(&self) -> ResourceId {
        match self {
            PolicyResource::NetworkPolicy(p) => ResourceId::network_policy(
                p.metadata.namespace.clone().unwrap_or_default(),
                p.metadata.name.clone(),
            ),
            PolicyResource::GlobalNetworkPolicy(p) => {
                ResourceId::global_network_policy(p.metadata.name.clone())
            }
        }
    }

    /// Name as written in flow-log policy hits: `tier.name` for global
    /// policies and `namespace/tier.name` for namespaced ones.
    pub fn flow_log_name(&self) -> String {
        let tier = self.tier();
        let name = self.name();
        let qualified = if name.starts_with(&format!("{tier}.")) {
            name.to_string()
        } else {
            format!("{tier}.{name}")
        };
        match self.namespace() {
            Some(ns) => format!("{ns}/{qualified}"),
            None => qualified,
        }
    }
}

// =============================================================================
// Resource Identity
// =============================================================================

/// Kind of a policy resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    NetworkPolicy,
    GlobalNetworkPolicy,
    KubernetesNetworkPolicy,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::NetworkPolicy => "NetworkPolicy",
            ResourceKind::GlobalNetworkPolicy => "GlobalNetworkPolicy",
            ResourceKind::KubernetesNetworkPolicy => "KubernetesNetworkPolicy",
        };
        f.write_str(s)
    }
}

/// Identity of a policy resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn network_policy(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::NetworkPolicy, namespace, name)
    }

    pub fn global_network_policy(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::GlobalNetworkPolicy, "", name)
    }

    pub fn kubernetes_network_policy(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::KubernetesNetworkPolicy, namespace, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Set of resources touched by the proposed change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifiedResources {
    ids: HashSet<ResourceId>,
}

impl ModifiedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a policy resource as modified.
    pub fn add(&mut self, resource: &PolicyResource) {
        self.add_id(resource.resource_id());
    }

    /// Mark a resource id as modified. A Kubernetes network policy also marks
    /// the Calico policy it is converted into.
    pub fn add_id(&mut self, id: ResourceId) {
        if id.kind == ResourceKind::KubernetesNetworkPolicy {
            self.ids.insert(ResourceId::network_policy(
                id.namespace.clone(),
                format!("{KNP_PREFIX}{}", id.name),
            ));
        }
        self.ids.insert(id);
    }

    pub fn is_modified(&self, id: &ResourceId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<ResourceId> for ModifiedResources {
    fn from_iter<T: IntoIterator<Item = ResourceId>>(iter: T) -> Self {
        let mut modified = ModifiedResources::new();
        for id in iter {
            modified.add_id(id);
        }
        modified
    }
}
