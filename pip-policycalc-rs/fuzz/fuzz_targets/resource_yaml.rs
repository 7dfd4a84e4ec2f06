#![no_main]

use libfuzzer_sys::fuzz_target;
use pip_policycalc::{
    Action, CalculatorConfig, EndpointCache, Flow, FlowEndpointData, ModifiedResources,
    PolicyCalculator, ReporterType, ResourceData,
};

fuzz_target!(|data: &str| {
    // Arbitrary strings must only ever produce errors, never panics
    let Ok(resources) = ResourceData::from_yaml(data) else {
        return;
    };

    // Whatever loads must also compile and evaluate, with every policy marked
    // as modified so that no flow is skipped by the pre-filter.
    let modified: ModifiedResources = resources
        .tiers
        .iter()
        .flatten()
        .map(|policy| policy.resource_id())
        .collect();
    let config = CalculatorConfig {
        calculate_original_action: true,
    };
    let calc = PolicyCalculator::new(config, EndpointCache::new(), &resources, &resources, &modified);

    let labelled = Flow::new(
        ReporterType::Destination,
        FlowEndpointData::workload("ns2", "client-*").with_labels([("app", "client")]),
        FlowEndpointData::workload("ns1", "server-*")
            .with_labels([("app", "web")])
            .with_port(80),
        Action::Allow,
    )
    .with_proto(6);
    let unlabelled = Flow::new(
        ReporterType::Source,
        FlowEndpointData::workload("ns1", "client-*"),
        FlowEndpointData::workload("ns2", "server-*"),
        Action::Deny,
    );

    for flow in [&labelled, &unlabelled] {
        let (_, before, after) = calc.calculate(flow);
        let _ = (before.action(), after.action());
    }
});
