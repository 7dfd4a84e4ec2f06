// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Compiled rules and policies

use tracing::{debug, warn};

use crate::flow::types::Flow;
use crate::policy::action::{ActionFlag, MatchType};
use crate::policy::matcher::{EndpointMatcher, EndpointSide, FlowCache, FlowMatcher, MatcherFactory};
use crate::policy::resource::{EntityRule, PolicyResource, PolicyType, ResourceId, Rule};

/// Evaluate matchers in order. A False result short-circuits; an Uncertain
/// result lowers the running result but later matchers are still evaluated.
fn match_all(matchers: &[FlowMatcher], start: MatchType, flow: &Flow, cache: &mut FlowCache) -> MatchType {
    let mut result = start;
    for m in matchers {
        match m.evaluate(flow, cache) {
            MatchType::False => return MatchType::False,
            MatchType::Uncertain => result = MatchType::Uncertain,
            _ => {}
        }
    }
    result
}

/// Collects matchers for a rule or policy, tracking whether any of them can
/// only ever be uncertain.
#[derive(Default)]
struct MatcherList {
    matchers: Vec<FlowMatcher>,
    always_uncertain: bool,
}

impl MatcherList {
    fn push(&mut self, matcher: Option<FlowMatcher>) {
        match matcher {
            Some(FlowMatcher::AlwaysUncertain) => self.always_uncertain = true,
            Some(m) => self.matchers.push(m),
            None => {}
        }
    }

    fn push_endpoint(&mut self, side: EndpointSide, matcher: Option<EndpointMatcher>) {
        self.push(matcher.map(|m| m.on(side)));
    }
}

// =============================================================================
// Compiled Rule
// =============================================================================

/// A single rule compiled into an ordered list of flow matchers.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub action: ActionFlag,
    pub matchers: Vec<FlowMatcher>,
    /// Best result this rule can produce for any flow
    pub best_match: MatchType,
}

impl CompiledRule {
    /// Compile a rule. `namespace` is the namespace of a namespaced policy.
    pub fn from_api(mf: &mut MatcherFactory<'_>, rule: &Rule, namespace: Option<&str>) -> Self {
        let Some(action) = rule.policy_action() else {
            warn!(action = %rule.action, "Rule action has no effect on enforcement - rule is inert");
            return Self {
                action: ActionFlag::empty(),
                matchers: Vec::new(),
                best_match: MatchType::False,
            };
        };

        let mut list = MatcherList::default();
        list.push(mf.protocol(rule.protocol.as_ref()));
        list.push(mf.not_protocol(rule.not_protocol.as_ref()));
        list.push(mf.icmp(rule.icmp.as_ref()));
        list.push(mf.not_icmp(rule.not_icmp.as_ref()));
        list.push(mf.ip_version(rule.ip_version));
        list.push(mf.http(rule.http.as_ref()));
        compile_entity(mf, &mut list, EndpointSide::Source, &rule.source, namespace);
        compile_entity(mf, &mut list, EndpointSide::Destination, &rule.destination, namespace);

        Self {
            action: action.to_flag(),
            matchers: list.matchers,
            best_match: if list.always_uncertain {
                MatchType::Uncertain
            } else {
                MatchType::True
            },
        }
    }

    pub fn match_flow(&self, flow: &Flow, cache: &mut FlowCache) -> MatchType {
        if self.best_match == MatchType::False {
            return MatchType::False;
        }
        match_all(&self.matchers, self.best_match, flow, cache)
    }
}

fn compile_entity(
    mf: &mut MatcherFactory<'_>,
    list: &mut MatcherList,
    side: EndpointSide,
    entity: &EntityRule,
    namespace: Option<&str>,
) {
    list.push_endpoint(side, mf.nets(&entity.nets));
    list.push_endpoint(side, mf.not_nets(&entity.not_nets));
    list.push(mf.ports(side, &entity.ports));
    list.push(mf.not_ports(side, &entity.not_ports));
    list.push_endpoint(side, mf.domains(&entity.domains));

    // Endpoint selection in a namespaced policy is scoped to the policy
    // namespace unless a namespace selector is given.
    if !entity.namespace_selector.is_empty() {
        list.push_endpoint(side, mf.namespace_selector(&entity.namespace_selector));
    } else if let Some(ns) = namespace {
        if entity.selects_endpoints() {
            list.push_endpoint(side, mf.namespace(ns));
        }
    }

    list.push_endpoint(side, mf.selector(&entity.selector));
    list.push_endpoint(side, mf.not_selector(&entity.not_selector));
    list.push_endpoint(side, mf.service_accounts(entity.service_accounts.as_ref()));
}

// =============================================================================
// Compiled Policy
// =============================================================================

/// A policy compiled for one direction.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// Flow-log style name
    pub name: String,
    pub tier: String,
    pub resource_id: ResourceId,
    /// Whether the policy is touched by the proposed change
    pub modified: bool,
    pub applies: Vec<FlowMatcher>,
    pub rules: Vec<CompiledRule>,
}

impl CompiledPolicy {
    /// Compile the ingress or egress half of a policy. Returns `None` when the
    /// policy does not apply to that direction.
    pub fn from_api(
        mf: &mut MatcherFactory<'_>,
        policy: &PolicyResource,
        policy_type: PolicyType,
        modified: bool,
    ) -> Option<Self> {
        if !policy.applies_to(policy_type) {
            return None;
        }

        // Ingress policies select the destination, egress policies the source.
        let (side, rules) = match policy_type {
            PolicyType::Ingress => (EndpointSide::Destination, policy.ingress()),
            PolicyType::Egress => (EndpointSide::Source, policy.egress()),
        };
        let namespace = policy.namespace();

        let mut applies = MatcherList::default();
        if let Some(ns) = namespace {
            applies.push_endpoint(side, mf.namespace(ns));
        } else {
            applies.push_endpoint(side, mf.namespace_selector(policy.namespace_selector()));
        }
        applies.push_endpoint(side, mf.selector(policy.selector()));
        applies.push_endpoint(side, mf.service_account_selector(policy.service_account_selector()));

        let rules = rules
            .iter()
            .map(|r| CompiledRule::from_api(mf, r, namespace))
            .collect::<Vec<_>>();

        let name = policy.flow_log_name();
        debug!(policy = %name, direction = ?policy_type, rules = rules.len(), modified, "Compiled policy");
        Some(Self {
            name,
            tier: policy.tier().to_string(),
            resource_id: policy.resource_id(),
            modified,
            applies: applies.matchers,
            rules,
        })
    }

    /// Whether the policy selects the endpoint it is enforced on.
    pub fn applies(&self, flow: &Flow, cache: &mut FlowCache) -> MatchType {
        match_all(&self.applies, MatchType::True, flow, cache)
    }

    /// Walk the rules and collect the actions this policy may take.
    ///
    /// `af` holds the actions already possible from earlier policies in the
    /// tier; the walk stops once the combination is indeterminate. Returns the
    /// policy's own actions and whether evaluation should continue with the
    /// next policy in the tier (no rule matched exactly).
    pub fn action(&self, flow: &Flow, cache: &mut FlowCache, af: ActionFlag) -> (ActionFlag, bool) {
        let mut own = ActionFlag::empty();
        for (idx, rule) in self.rules.iter().enumerate() {
            match rule.match_flow(flow, cache) {
                MatchType::True => {
                    debug!(policy = %self.name, rule = idx, "Rule matched");
                    return (own | rule.action, false);
                }
                MatchType::Uncertain => {
                    own |= rule.action;
                    debug!(policy = %self.name, rule = idx, actions = ?own.to_action_strings(), "Rule uncertain");
                    if (af | own).indeterminate() {
                        return (own, false);
                    }
                }
                _ => {}
            }
        }
        (own, true)
    }
}
