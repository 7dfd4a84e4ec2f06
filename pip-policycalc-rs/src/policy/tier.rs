// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Tiered policy evaluation
//!
//! Tiers are evaluated in order. Within a tier, the first policy with an exactly
//! matching rule decides the tier. A tier in which some policy applied but no
//! rule matched ends in an implicit deny; a tier in which no policy applied
//! passes to the next tier. Running out of tiers is an implicit allow.
//!
//! Each policy that contributes to the result is recorded as a policy hit, in
//! the same form as flow logs record them.

use std::sync::Arc;

use tracing::{debug, info};

use crate::flow::types::{EndpointType, Flow, FlowEndpointData, ReporterType};
use crate::policy::action::{Action, ActionFlag, MatchType};
use crate::policy::compiled::CompiledPolicy;
use crate::policy::config::ResourceData;
use crate::policy::engine::{EndpointResponse, Response};
use crate::policy::handlers::{EndpointSelectorHandler, NamespaceHandler};
use crate::policy::hits::{profile_name, record, PolicyHit, END_OF_TIER_RULE_INDEX, PROFILE_TIER};
use crate::policy::matcher::{FlowCache, MatcherFactory};
use crate::policy::resource::{ModifiedResources, PolicyType};

// =============================================================================
// Compiled Tier
// =============================================================================

/// The ordered policies of one tier, for one direction.
#[derive(Debug, Clone, Default)]
pub struct CompiledTier {
    pub policies: Vec<Arc<CompiledPolicy>>,
}

impl CompiledTier {
    /// Possible actions of this tier. Hits of the policies that contributed
    /// are appended to `hits`.
    pub fn action(&self, flow: &Flow, cache: &mut FlowCache, hits: &mut Vec<PolicyHit>) -> ActionFlag {
        let mut af = ActionFlag::empty();
        let mut last_applied = None;

        for policy in &self.policies {
            // Uncertain applicability is treated as not applying.
            if policy.applies(flow, cache) != MatchType::True {
                continue;
            }
            last_applied = Some(policy);

            let (flags, next) = policy.action(flow, cache, af);
            record(hits, &policy.tier, &policy.name, flags, None);
            af |= flags;
            if af.indeterminate() || !next {
                debug!(policy = %policy.name, actions = ?af.to_action_strings(), "Tier decided");
                return af;
            }
        }

        match last_applied {
            Some(policy) => {
                debug!(policy = %policy.name, "No rule matched in tier - end of tier deny");
                record(
                    hits,
                    &policy.tier,
                    &policy.name,
                    ActionFlag::DENY,
                    Some(END_OF_TIER_RULE_INDEX),
                );
                af | ActionFlag::DENY
            }
            None => {
                debug!("No policy applied in tier - pass to next tier");
                af | ActionFlag::NEXT_TIER
            }
        }
    }
}

/// Ordered tiers for one direction.
#[derive(Debug, Clone, Default)]
pub struct CompiledTiers {
    pub tiers: Vec<CompiledTier>,
}

impl CompiledTiers {
    /// Possible actions at `endpoint` once every tier has been walked.
    ///
    /// Running out of tiers falls back to the endpoint's profile. The profile
    /// always allows; a workload endpoint records it as the hit of its
    /// namespace profile.
    pub fn action_flags(
        &self,
        flow: &Flow,
        endpoint: &FlowEndpointData,
        cache: &mut FlowCache,
        hits: &mut Vec<PolicyHit>,
    ) -> ActionFlag {
        let mut af = ActionFlag::empty();
        for (idx, tier) in self.tiers.iter().enumerate() {
            af |= tier.action(flow, cache, hits);
            if af.indeterminate() {
                debug!(tier = idx, "Indeterminate action from tier");
                return af;
            }
            if !af.contains(ActionFlag::NEXT_TIER) {
                return af;
            }
            af.remove(ActionFlag::NEXT_TIER);
        }

        debug!("Hit end of tiers - implicit allow");
        if endpoint.endpoint_type == EndpointType::Wep {
            let profile = profile_name(&endpoint.namespace);
            record(hits, PROFILE_TIER, &profile, ActionFlag::ALLOW, None);
        }
        af | ActionFlag::ALLOW
    }

    /// Calculate the response of `endpoint`, along with its policy hits.
    pub fn calculate(&self, flow: &Flow, endpoint: &FlowEndpointData, cache: &mut FlowCache) -> EndpointResponse {
        let mut policies = Vec::new();
        let action = self.action_flags(flow, endpoint, cache, &mut policies).to_action();
        EndpointResponse {
            include: true,
            action,
            policies,
        }
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

// =============================================================================
// Compiled Tiers and Policies
// =============================================================================

/// A fully compiled configuration, split by direction, along with the
/// policies touched by the proposed change.
#[derive(Debug, Clone, Default)]
pub struct CompiledTiersAndPolicies {
    pub ingress: CompiledTiers,
    pub egress: CompiledTiers,
    pub modified_ingress: Vec<Arc<CompiledPolicy>>,
    pub modified_egress: Vec<Arc<CompiledPolicy>>,
}

impl CompiledTiersAndPolicies {
    /// Compile a resource snapshot. Selector slots are allocated from the
    /// shared `selectors` handler.
    pub fn compile(
        data: &ResourceData,
        modified: &ModifiedResources,
        selectors: &mut EndpointSelectorHandler,
    ) -> Self {
        let mut namespaces = NamespaceHandler::new(&data.namespaces, &data.service_accounts);
        let mut mf = MatcherFactory::new(&mut namespaces, selectors);
        let mut compiled = Self::default();

        for (idx, tier) in data.tiers.iter().enumerate() {
            debug!(tier = idx, policies = tier.len(), "Compiling tier");
            let mut ingress = CompiledTier::default();
            let mut egress = CompiledTier::default();

            for policy in tier {
                let is_modified = modified.is_modified(&policy.resource_id());

                if let Some(p) = CompiledPolicy::from_api(&mut mf, policy, PolicyType::Ingress, is_modified) {
                    let p = Arc::new(p);
                    if is_modified {
                        compiled.modified_ingress.push(Arc::clone(&p));
                    }
                    ingress.policies.push(p);
                }
                if let Some(p) = CompiledPolicy::from_api(&mut mf, policy, PolicyType::Egress, is_modified) {
                    let p = Arc::new(p);
                    if is_modified {
                        compiled.modified_egress.push(Arc::clone(&p));
                    }
                    egress.policies.push(p);
                }
            }

            if !ingress.policies.is_empty() {
                compiled.ingress.tiers.push(ingress);
            }
            if !egress.policies.is_empty() {
                compiled.egress.tiers.push(egress);
            }
        }

        info!(
            ingress_tiers = compiled.ingress.len(),
            egress_tiers = compiled.egress.len(),
            modified_policies = compiled.modified_ingress.len() + compiled.modified_egress.len(),
            "Compiled policy configuration"
        );
        compiled
    }

    /// Whether the source is selected by a modified egress policy or the
    /// destination by a modified ingress policy.
    pub fn flow_selected_by_modified_policies(&self, flow: &Flow, cache: &mut FlowCache) -> bool {
        self.modified_egress
            .iter()
            .chain(self.modified_ingress.iter())
            .any(|p| p.applies(flow, cache) == MatchType::True)
    }

    /// Calculate the endpoint responses for a flow.
    ///
    /// The reporting endpoint decides which sides are evaluated. A
    /// source-reported denied flow has no destination record, so if the source
    /// would now let it through the destination is evaluated as well. A
    /// destination-reported flow that the source would now deny never reaches
    /// the destination.
    pub fn calculate(&self, flow: &Flow, cache: &mut FlowCache) -> Response {
        let mut response = Response::default();
        match flow.reporter {
            ReporterType::Source => {
                if !flow.source.is_calico_managed_endpoint() {
                    return response;
                }
                response.source = self.egress.calculate(flow, &flow.source, cache);
                let source = response.source.action;
                debug!(action = %source, "Calculated egress action");

                if flow.action == Action::Deny
                    && source != Action::Deny
                    && flow.destination.is_calico_managed_endpoint()
                {
                    response.destination = self.ingress.calculate(flow, &flow.destination, cache);
                    debug!(action = %response.destination.action, "Calculated ingress action for denied source flow");
                }
            }
            ReporterType::Destination => {
                if flow.source.is_calico_managed_endpoint() {
                    response.source = self.egress.calculate(flow, &flow.source, cache);
                    debug!(action = %response.source.action, "Calculated egress action");
                    if response.source.action == Action::Deny {
                        return response;
                    }
                }
                if flow.destination.is_calico_managed_endpoint() {
                    response.destination = self.ingress.calculate(flow, &flow.destination, cache);
                    debug!(action = %response.destination.action, "Calculated ingress action");
                }
            }
        }
        response
    }

    /// Combined action for a flow.
    pub fn action(&self, flow: &Flow, cache: &mut FlowCache) -> Action {
        self.calculate(flow, cache).action()
    }
}
