// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::flow::endpoint_cache::EndpointCache;
use crate::flow::types::{Flow, ReporterType};
use crate::policy::action::Action;
use crate::policy::config::{CalculatorConfig, PolicyConfigError, ResourceData};
use crate::policy::handlers::EndpointSelectorHandler;
use crate::policy::hits::{self, PolicyHit};
use crate::policy::matcher::FlowCache;
use crate::policy::resource::ModifiedResources;
use crate::policy::tier::CompiledTiersAndPolicies;

/// Calculated result at one endpoint of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResponse {
    /// Whether this endpoint contributes to the flow result
    pub include: bool,
    pub action: Action,
    /// Policies that contributed to the action, in evaluation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyHit>,
}

impl EndpointResponse {
    pub fn included(action: Action) -> Self {
        Self {
            include: true,
            action,
            policies: Vec::new(),
        }
    }
}

/// Calculated result for both endpoints of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub source: EndpointResponse,
    pub destination: EndpointResponse,
}

impl Response {
    /// The response implied by the recorded flow: the reporting endpoint with
    /// the recorded action and enforced policy hits.
    pub fn unchanged(flow: &Flow) -> Self {
        let reported = EndpointResponse {
            include: true,
            action: flow.action,
            policies: hits::recorded_hits(flow),
        };
        match flow.reporter {
            ReporterType::Source => Self {
                source: reported,
                ..Self::default()
            },
            ReporterType::Destination => Self {
                destination: reported,
                ..Self::default()
            },
        }
    }

    /// Combine the included endpoints: Deny if either denies, otherwise
    /// Indeterminate if either is, otherwise Allow.
    pub fn action(&self) -> Action {
        let actions: Vec<Action> = [&self.source, &self.destination]
            .iter()
            .filter(|r| r.include)
            .map(|r| r.action)
            .collect();

        if actions.is_empty() {
            Action::Unknown
        } else if actions.contains(&Action::Deny) {
            Action::Deny
        } else if actions.contains(&Action::Indeterminate) {
            Action::Indeterminate
        } else if actions.iter().all(|a| *a == Action::Allow) {
            Action::Allow
        } else {
            Action::Unknown
        }
    }
}

/// Calculates the action a flow receives before and after a proposed policy
/// change.
///
/// All compilation happens in [`PolicyCalculator::new`]. The calculator is
/// immutable afterwards and may be shared across threads, one flow per call.
#[derive(Debug)]
pub struct PolicyCalculator {
    config: CalculatorConfig,
    endpoints: EndpointCache,
    num_selectors: usize,
    before: CompiledTiersAndPolicies,
    after: CompiledTiersAndPolicies,
}

impl PolicyCalculator {
    /// Compile the before and after configurations. Both share a single
    /// selector handler, since endpoint labels are the same in both.
    pub fn new(
        config: CalculatorConfig,
        endpoints: EndpointCache,
        before: &ResourceData,
        after: &ResourceData,
        modified: &ModifiedResources,
    ) -> Self {
        let mut selectors = EndpointSelectorHandler::new();
        debug!("Compiling configuration before change");
        let before = CompiledTiersAndPolicies::compile(before, modified, &mut selectors);
        debug!("Compiling configuration after change");
        let after = CompiledTiersAndPolicies::compile(after, modified, &mut selectors);
        info!(
            selectors = selectors.num_selectors(),
            modified = modified.len(),
            cached_endpoints = endpoints.len(),
            "Policy calculator ready"
        );

        Self {
            config,
            endpoints,
            num_selectors: selectors.num_selectors(),
            before,
            after,
        }
    }

    /// Build a calculator from before/after resource snapshots in YAML.
    pub fn from_yaml(
        config: CalculatorConfig,
        before_yaml: &str,
        after_yaml: &str,
        modified: &ModifiedResources,
    ) -> Result<Self, PolicyConfigError> {
        let before = ResourceData::from_yaml(before_yaml)?;
        let after = ResourceData::from_yaml(after_yaml)?;
        Ok(Self::new(config, EndpointCache::new(), &before, &after, modified))
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    /// Number of distinct selector slots across both configurations.
    pub fn num_selectors(&self) -> usize {
        self.num_selectors
    }

    /// Calculate the before and after responses for a flow.
    ///
    /// Returns `processed = false` when the flow is not selected by any
    /// modified policy; both responses are then the recorded one.
    pub fn calculate(&self, flow: &Flow) -> (bool, Response, Response) {
        let flow = self.endpoints.augment(flow);
        let mut cache = FlowCache::new(self.num_selectors);

        debug!(
            reporter = ?flow.reporter,
            source = %flow.source.name,
            source_namespace = %flow.source.namespace,
            destination = %flow.destination.name,
            destination_namespace = %flow.destination.namespace,
            "Calculating flow"
        );

        // A flow without a recorded result cannot be vouched for by the
        // pre-filter and is always recalculated.
        if flow.action.is_concrete()
            && !self.before.flow_selected_by_modified_policies(&flow, &mut cache)
            && !self.after.flow_selected_by_modified_policies(&flow, &mut cache)
        {
            debug!("Flow unaffected by modified policies");
            let unchanged = Response::unchanged(&flow);
            return (false, unchanged.clone(), unchanged);
        }

        let before = if self.config.calculate_original_action {
            self.before.calculate(&flow, &mut cache)
        } else {
            self.recorded_before(&flow, &mut cache)
        };
        let after = self.after.calculate(&flow, &mut cache);

        debug!(before = %before.action(), after = %after.action(), "Calculated flow");
        (true, before, after)
    }

    /// The recorded response, with the reporting endpoint replaced by its
    /// calculated response when the flow log corroborates it: same action, and
    /// either no recorded policy hits or the same enforced ones.
    fn recorded_before(&self, flow: &Flow, cache: &mut FlowCache) -> Response {
        let mut response = Response::unchanged(flow);
        if !flow.action.is_concrete() {
            return response;
        }

        let calculated = self.before.calculate(flow, cache);
        let (recorded, calculated) = match flow.reporter {
            ReporterType::Source => (&mut response.source, calculated.source),
            ReporterType::Destination => (&mut response.destination, calculated.destination),
        };
        let corroborated = calculated.include
            && calculated.action == recorded.action
            && (recorded.policies.is_empty() || hits::same_enforced_hits(&recorded.policies, &calculated.policies));
        if corroborated {
            debug!(action = %calculated.action, "Calculated original action matches flow log");
            *recorded = calculated;
        }
        response
    }

    /// Calculate the combined before and after actions for a flow.
    pub fn action(&self, flow: &Flow) -> (bool, Action, Action) {
        let (processed, before, after) = self.calculate(flow);
        (processed, before.action(), after.action())
    }
}
