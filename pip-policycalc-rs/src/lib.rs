//! Policy Impact Preview - calculate the effect of a network policy change on
//! historical flows.
//!
//! This crate compiles tiered Calico policies into matchers and evaluates flow
//! log records against them, both under the current configuration and under a
//! proposed one. Flow logs only carry partial endpoint information, so every
//! match is three-valued (true, false or uncertain) and a flow may end up with
//! an indeterminate action.
//!
//! # Example
//!
//! ```rust
//! use pip_policycalc::{Action, CalculatorConfig, Flow, FlowEndpointData, ModifiedResources,
//!     PolicyCalculator, ReporterType, ResourceId};
//!
//! let after = r#"
//! tiers:
//!   - - kind: NetworkPolicy
//!       metadata:
//!         name: lockdown
//!         namespace: ns1
//!       spec:
//!         selector: all()
//!         types: [Ingress]
//! "#;
//!
//! let mut modified = ModifiedResources::new();
//! modified.add_id(ResourceId::network_policy("ns1", "lockdown"));
//!
//! let config = CalculatorConfig { calculate_original_action: true };
//! let calc = PolicyCalculator::from_yaml(config, "{}", after, &modified).unwrap();
//!
//! let flow = Flow::new(
//!     ReporterType::Destination,
//!     FlowEndpointData::workload("ns2", "client-*"),
//!     FlowEndpointData::workload("ns1", "server-*"),
//!     Action::Allow,
//! );
//!
//! let (processed, before, after) = calc.action(&flow);
//! assert!(processed);
//! assert_eq!(before, Action::Allow);
//! assert_eq!(after, Action::Deny);
//! ```

pub mod flow;
pub mod policy;

// Re-export commonly used types at the crate root
pub use flow::{EndpointCache, EndpointData, EndpointType, Flow, FlowEndpointData, NamedPort, ReporterType};
pub use policy::{
    Action, ActionFlag, CalculatorConfig, MatchType, ModifiedResources, PolicyCalculator,
    PolicyConfigError, PolicyHit, PolicyResource, ResourceData, ResourceId, Response, Selector,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Calculate the before and after action of a single flow from YAML snapshots.
///
/// This is a convenience function for simple use cases; compiling a
/// [`PolicyCalculator`] once is much cheaper when evaluating many flows.
///
/// # Example
///
/// ```rust
/// use pip_policycalc::{calculate_flow_action, Action, CalculatorConfig, Flow, ModifiedResources};
///
/// let flow = Flow::from_json(r#"{"reporter": "src", "source": {"type": "wep"}, "action": "allow"}"#).unwrap();
/// let (processed, before, after) =
///     calculate_flow_action(CalculatorConfig::default(), "{}", "{}", &ModifiedResources::new(), &flow)
///         .unwrap();
/// assert!(!processed);
/// assert_eq!(before, Action::Allow);
/// assert_eq!(after, Action::Allow);
/// ```
pub fn calculate_flow_action(
    config: CalculatorConfig,
    before_yaml: &str,
    after_yaml: &str,
    modified: &ModifiedResources,
    flow: &Flow,
) -> Result<(bool, Action, Action), PolicyConfigError> {
    let calc = PolicyCalculator::from_yaml(config, before_yaml, after_yaml, modified)?;
    Ok(calc.action(flow))
}
