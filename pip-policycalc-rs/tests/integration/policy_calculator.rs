use pip_policycalc::flow::{EndpointCache, EndpointData, EndpointType, Flow, FlowEndpointData, NamedPort, ReporterType};
use pip_policycalc::flow::types::PROTO_TCP;
use pip_policycalc::policy::{
    Action, CalculatorConfig, ModifiedResources, PolicyCalculator, PolicyHit, ResourceData, ResourceId,
};

const NAMESPACES: &str = r#"
namespaces:
  - name: ns1
    labels:
      name: ns1
  - name: ns2
    labels:
      name: ns2
"#;

/// Selects everything in ns1 for ingress and egress, with no rules.
const NS1_NO_RULES: &str = r#"
  - kind: NetworkPolicy
    metadata:
      name: tier3.policy1
      namespace: ns1
    spec:
      tier: tier3
      selector: all()
      types: [Ingress, Egress]
"#;

const NS1_ALLOW_INGRESS: &str = r#"
  - kind: NetworkPolicy
    metadata:
      name: tier3.policy2
      namespace: ns1
    spec:
      tier: tier3
      selector: all()
      types: [Ingress]
      ingress:
        - action: Allow
"#;

const MULTI_TIER: &str = r#"
tiers:
  - - kind: GlobalNetworkPolicy
      metadata:
        name: tier1.red
      spec:
        tier: tier1
        selector: color == 'red'
        types: [Ingress, Egress]
        ingress:
          - action: Allow
        egress:
          - action: Allow
    - kind: GlobalNetworkPolicy
      metadata:
        name: tier1.blue
      spec:
        tier: tier1
        selector: color == 'blue'
        types: [Ingress, Egress]
        ingress:
          - action: Deny
        egress:
          - action: Deny
  - - kind: NetworkPolicy
      metadata:
        name: tier2.purple
        namespace: ns1
      spec:
        tier: tier2
        selector: color == 'purple'
        types: [Ingress, Egress]
        ingress:
          - action: Deny
        egress:
          - action: Pass
  - - kind: GlobalNetworkPolicy
      metadata:
        name: tier3.pass
      spec:
        tier: tier3
        selector: all()
        types: [Ingress, Egress]
        ingress:
          - action: Pass
        egress:
          - action: Pass
"#;

fn resources(tiers: &[&str]) -> ResourceData {
    let mut data = ResourceData::from_yaml(NAMESPACES).unwrap();
    data.tiers = tiers
        .iter()
        .map(|tier| serde_yaml::from_str(tier).unwrap())
        .collect();
    data
}

fn modified(ids: &[ResourceId]) -> ModifiedResources {
    ids.iter().cloned().collect()
}

fn wep(namespace: &str, labels: &[(&str, &str)]) -> FlowEndpointData {
    FlowEndpointData::workload(namespace, "pod-*").with_labels(labels.iter().copied())
}

fn unknown_endpoint() -> FlowEndpointData {
    FlowEndpointData::default()
}

fn config(calculate_original_action: bool) -> CalculatorConfig {
    CalculatorConfig {
        calculate_original_action,
    }
}

#[test]
fn test_resources_fixture_builds_tiers() {
    let data = resources(&[NS1_NO_RULES, NS1_ALLOW_INGRESS]);
    assert_eq!(data.tiers.len(), 2);
    assert_eq!(data.namespaces.len(), 2);
    assert!(resources(&[]).tiers.is_empty());
}

#[test]
fn test_no_policy_to_ns1_drop_all() {
    let before = resources(&[]);
    let after = resources(&[NS1_NO_RULES]);
    let calc = PolicyCalculator::new(
        config(true),
        EndpointCache::new(),
        &before,
        &after,
        &modified(&[ResourceId::network_policy("ns1", "tier3.policy1")]),
    );

    // Flow entirely in ns2 is unaffected
    let flow = Flow::new(ReporterType::Source, wep("ns2", &[]), wep("ns2", &[]), Action::Allow);
    let (processed, before, after) = calc.calculate(&flow);
    assert!(!processed);
    assert_eq!(before.source.action, Action::Allow);
    assert_eq!(after.source.action, Action::Allow);

    // Source in ns1 is recalculated
    let flow = Flow::new(ReporterType::Source, wep("ns1", &[]), unknown_endpoint(), Action::Deny);
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.source.action, Action::Allow);
    assert_eq!(after.source.action, Action::Deny);

    // Destination in ns1 is recalculated
    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns1", &[]), Action::Allow);
    let (processed, before, after) = calc.action(&flow);
    assert!(processed);
    assert_eq!(before, Action::Allow);
    assert_eq!(after, Action::Deny);
}

#[test]
fn test_end_of_tier_drop_then_ingress_allow() {
    let before = resources(&[NS1_NO_RULES]);
    let mut tier = String::from(NS1_NO_RULES);
    tier.push_str(NS1_ALLOW_INGRESS);
    let after = resources(&[&tier]);
    let calc = PolicyCalculator::new(
        config(true),
        EndpointCache::new(),
        &before,
        &after,
        &modified(&[ResourceId::network_policy("ns1", "tier3.policy2")]),
    );

    // Only the ingress of ns1 changes
    let mut flow = Flow::new(ReporterType::Source, wep("ns1", &[]), wep("ns2", &[]), Action::Allow);
    let (processed, _, _) = calc.calculate(&flow);
    assert!(!processed);
    flow.reporter = ReporterType::Destination;
    let (processed, before, after) = calc.calculate(&flow);
    assert!(!processed);
    assert_eq!(before.destination.action, Action::Allow);
    assert_eq!(after.destination.action, Action::Allow);

    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns1", &[]), Action::Allow);
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.destination.action, Action::Deny);
    assert_eq!(after.destination.action, Action::Allow);
}

fn multi_tier_calculator() -> PolicyCalculator {
    let before = resources(&[]);
    let after = ResourceData::from_yaml(&format!("{NAMESPACES}{MULTI_TIER}")).unwrap();
    let modified = modified(&[
        ResourceId::global_network_policy("tier1.red"),
        ResourceId::global_network_policy("tier1.blue"),
        ResourceId::network_policy("ns1", "tier2.purple"),
        ResourceId::global_network_policy("tier3.pass"),
    ]);
    PolicyCalculator::new(config(false), EndpointCache::new(), &before, &after, &modified)
}

#[test]
fn test_multi_tier_red_to_red_is_allowed() {
    let calc = multi_tier_calculator();
    let mut flow = Flow::new(
        ReporterType::Source,
        wep("ns2", &[("color", "red")]),
        wep("ns1", &[("color", "red")]),
        Action::Deny,
    );
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.source.action, Action::Deny);
    assert_eq!(after.source.action, Action::Allow);
    // The source now allows a previously denied flow, so the destination is
    // calculated too.
    assert!(after.destination.include);
    assert_eq!(after.destination.action, Action::Allow);

    flow.reporter = ReporterType::Destination;
    let (_, before, after) = calc.calculate(&flow);
    assert_eq!(before.destination.action, Action::Deny);
    assert_eq!(after.destination.action, Action::Allow);
    assert_eq!(after.action(), Action::Allow);
}

#[test]
fn test_multi_tier_red_to_blue_depends_on_reporter() {
    let calc = multi_tier_calculator();
    let mut flow = Flow::new(
        ReporterType::Source,
        wep("ns2", &[("color", "red")]),
        wep("ns1", &[("color", "blue")]),
        Action::Allow,
    );
    let (processed, before, after) = calc.action(&flow);
    assert!(processed);
    assert_eq!(before, Action::Allow);
    assert_eq!(after, Action::Allow);

    flow.reporter = ReporterType::Destination;
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.destination.action, Action::Allow);
    assert_eq!(after.destination.action, Action::Deny);
    assert_eq!(after.action(), Action::Deny);
}

#[test]
fn test_multi_tier_blue_to_red_is_denied_at_source() {
    let calc = multi_tier_calculator();
    let mut flow = Flow::new(
        ReporterType::Source,
        wep("ns2", &[("color", "blue")]),
        wep("ns1", &[("color", "red")]),
        Action::Allow,
    );
    let (_, before, after) = calc.calculate(&flow);
    assert_eq!(before.source.action, Action::Allow);
    assert_eq!(after.source.action, Action::Deny);

    // The flow would never reach the destination
    flow.reporter = ReporterType::Destination;
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.destination.action, Action::Allow);
    assert!(!after.destination.include);
    assert_eq!(after.destination.action, Action::Unset);
    assert_eq!(after.action(), Action::Deny);
}

#[test]
fn test_multi_tier_purple() {
    let calc = multi_tier_calculator();

    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[("color", "purple")]),
        Action::Allow,
    );
    let (processed, before, after) = calc.action(&flow);
    assert!(processed);
    assert_eq!(before, Action::Allow);
    assert_eq!(after, Action::Deny);

    // Purple egress outside ns1 falls through every tier
    let flow = Flow::new(
        ReporterType::Source,
        wep("ns2", &[("color", "purple")]),
        unknown_endpoint(),
        Action::Deny,
    );
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.source.action, Action::Deny);
    assert_eq!(after.source.action, Action::Allow);
    assert!(!after.destination.include);
}

#[test]
fn test_unlabelled_endpoint_skips_uncertain_policies() {
    let calc = multi_tier_calculator();
    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        FlowEndpointData::workload("ns1", "pod-*"),
        Action::Allow,
    );
    // Tier one policies are uncertain for unlabelled endpoints and are skipped,
    // the purple policy is skipped, and tier three passes.
    let (_, _, after) = calc.action(&flow);
    assert_eq!(after, Action::Allow);
}

#[test]
fn test_multi_tier_purple_destination_with_unlabelled_source() {
    let calc = multi_tier_calculator();
    let mut flow = Flow::new(
        ReporterType::Destination,
        FlowEndpointData::workload("ns2", "client-*"),
        wep("ns1", &[("color", "purple")]),
        Action::Allow,
    );

    // The purple ingress policy denies at the destination
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.destination.action, Action::Allow);
    assert_eq!(after.source.action, Action::Allow);
    assert_eq!(after.destination.action, Action::Deny);
    assert_eq!(after.action(), Action::Deny);

    // Reported by the source, only egress is evaluated. The colour policies are
    // uncertain and skipped, the purple policy is for ns1 only and tier three
    // passes, leaving the end-of-tiers allow.
    flow.reporter = ReporterType::Source;
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.source.action, Action::Allow);
    assert_eq!(after.source.action, Action::Allow);
    assert!(!after.destination.include);
    assert_eq!(after.action(), Action::Allow);
}

#[test]
fn test_malformed_policy_selector_applies_unconstrained() {
    let after = resources(&[r#"
  - kind: NetworkPolicy
    metadata:
      name: tier3.broken
      namespace: ns1
    spec:
      tier: tier3
      selector: "color == "
      types: [Ingress]
"#]);
    let calc = PolicyCalculator::new(
        config(true),
        EndpointCache::new(),
        &resources(&[]),
        &after,
        &modified(&[ResourceId::network_policy("ns1", "tier3.broken")]),
    );

    // Applies to every endpoint of its namespace, so the empty policy denies
    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[("color", "green")]),
        Action::Allow,
    );
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Deny));
    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        FlowEndpointData::workload("ns1", "pod-*"),
        Action::Allow,
    );
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Deny));

    // The namespace still bounds the policy
    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns2", &[]), Action::Allow);
    assert_eq!(calc.action(&flow), (false, Action::Allow, Action::Allow));
}

#[test]
fn test_malformed_rule_cidr_is_unconstrained() {
    let tier = |nets: &str| {
        format!(
            r#"
  - kind: GlobalNetworkPolicy
    metadata:
      name: tier3.nets
    spec:
      tier: tier3
      selector: all()
      types: [Ingress]
      ingress:
        - action: Deny
          source:
            nets: [{nets}]
        - action: Allow
"#
        )
    };
    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint().with_ip("192.168.0.1".parse().unwrap()),
        wep("ns1", &[]),
        Action::Allow,
    );
    let modified = modified(&[ResourceId::global_network_policy("tier3.nets")]);

    let valid = resources(&[&tier("10.0.0.0/8")]);
    let calc = PolicyCalculator::new(config(true), EndpointCache::new(), &resources(&[]), &valid, &modified);
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Allow));

    // The deny rule loses its nets constraint and matches every source
    let broken = resources(&[&tier("not-a-cidr")]);
    let calc = PolicyCalculator::new(config(true), EndpointCache::new(), &resources(&[]), &broken, &modified);
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Deny));
}

#[test]
fn test_deeply_nested_selector_degrades_without_crashing() {
    let selector = format!("{}has(color)", "!".repeat(200_000));
    let after = resources(&[&format!(
        r#"
  - kind: NetworkPolicy
    metadata:
      name: tier3.deep
      namespace: ns1
    spec:
      tier: tier3
      selector: "{selector}"
      types: [Ingress]
"#
    )]);
    let calc = PolicyCalculator::new(
        config(true),
        EndpointCache::new(),
        &resources(&[]),
        &after,
        &modified(&[ResourceId::network_policy("ns1", "tier3.deep")]),
    );
    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[("color", "red")]),
        Action::Allow,
    );
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Deny));
}

fn hit_strings(policies: &[PolicyHit]) -> Vec<String> {
    policies.iter().map(|h| h.to_string()).collect()
}

#[test]
fn test_policy_hits_in_calculated_responses() {
    let calc = multi_tier_calculator();
    let flow = Flow::new(
        ReporterType::Destination,
        wep("ns2", &[("color", "red")]),
        wep("ns1", &[("color", "blue")]),
        Action::Allow,
    );
    let (_, _, after) = calc.calculate(&flow);
    assert_eq!(hit_strings(&after.source.policies), ["0|tier1|tier1.red|allow|-"]);
    assert_eq!(hit_strings(&after.destination.policies), ["0|tier1|tier1.blue|deny|-"]);

    // Green falls through every tier to the namespace profile
    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[("color", "green")]),
        Action::Allow,
    );
    let (_, _, after) = calc.calculate(&flow);
    assert_eq!(
        hit_strings(&after.destination.policies),
        [
            "0|tier3|tier3.pass|pass|-",
            "1|__PROFILE__|__PROFILE__.kns.ns1|allow|-",
        ]
    );

    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[("color", "purple")]),
        Action::Allow,
    );
    let (_, _, after) = calc.calculate(&flow);
    assert_eq!(hit_strings(&after.destination.policies), ["0|tier2|ns1/tier2.purple|deny|-"]);
}

#[test]
fn test_recorded_policy_hits_in_before_response() {
    let before = resources(&[NS1_NO_RULES]);
    let after = resources(&[]);
    let calc = PolicyCalculator::new(
        config(false),
        EndpointCache::new(),
        &before,
        &after,
        &modified(&[ResourceId::network_policy("ns1", "tier3.policy1")]),
    );

    // The flow log names a different policy: the recorded hits are kept,
    // without the staged one.
    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns1", &[]), Action::Deny)
        .with_policies([
            "1|tier3|ns1/tier3.staged:audit|allow|0",
            "0|tier3|ns1/tier3.policy0|deny|2",
        ]);
    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);
    assert_eq!(before.destination.action, Action::Deny);
    assert_eq!(hit_strings(&before.destination.policies), ["0|tier3|ns1/tier3.policy0|deny|2"]);
    assert_eq!(after.destination.action, Action::Allow);
    assert_eq!(
        hit_strings(&after.destination.policies),
        ["0|__PROFILE__|__PROFILE__.kns.ns1|allow|-"]
    );

    // The flow log agrees with the calculation: calculated hits are used
    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns1", &[]), Action::Deny)
        .with_policies(["0|tier3|ns1/tier3.policy1|deny|-1"]);
    let (_, before, _) = calc.calculate(&flow);
    assert_eq!(hit_strings(&before.destination.policies), ["0|tier3|ns1/tier3.policy1|deny|-1"]);
    assert!(before.destination.policies[0].is_end_of_tier_deny());
}

const CACHED_MATCH: &str = r#"
  - kind: GlobalNetworkPolicy
    metadata:
      name: tier3.policymatchcached
    spec:
      tier: tier3
      selector: cached == 'true'
      types: [Ingress, Egress]
      ingress:
        - action: Allow
          source:
            selector: source == 'true'
            serviceAccounts:
              names: [sa-source]
            ports: [source-port]
          destination:
            selector: destination == 'true'
            ports: [destination-port]
      egress:
        - action: Allow
          source:
            selector: source == 'true'
            serviceAccounts:
              names: [sa-source]
            ports: [source-port]
          destination:
            selector: destination == 'true'
            ports: [destination-port]
"#;

const CACHED_DENY_ALL: &str = r#"
  - kind: GlobalNetworkPolicy
    metadata:
      name: tier3.policymatchcached.denyall
    spec:
      tier: tier3
      selector: all()
      types: [Ingress, Egress]
      ingress:
        - action: Deny
      egress:
        - action: Deny
"#;

fn endpoint_cache() -> EndpointCache {
    let mut cache = EndpointCache::new();
    cache.add(
        "ns1",
        "pod1-*",
        EndpointData {
            labels: [("cached", "true"), ("source", "true"), ("destination", "false")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            service_account: Some("sa-source".to_string()),
            named_ports: vec![NamedPort {
                name: "source-port".to_string(),
                protocol: PROTO_TCP,
                port: 10,
            }],
        },
    );
    cache.add(
        "",
        "hostendpoint",
        EndpointData {
            labels: [("cached", "true"), ("source", "false"), ("destination", "true")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            service_account: None,
            named_ports: vec![NamedPort {
                name: "destination-port".to_string(),
                protocol: PROTO_TCP,
                port: 11,
            }],
        },
    );
    cache
}

#[test]
fn test_endpoint_data_filled_in_from_cache() {
    let before_data = resources(&[CACHED_DENY_ALL]);
    let mut tier = String::from(CACHED_MATCH);
    tier.push_str(CACHED_DENY_ALL);
    let after_data = resources(&[&tier]);
    let modified = modified(&[ResourceId::global_network_policy("tier3.policymatchcached")]);
    let calc = PolicyCalculator::new(config(false), endpoint_cache(), &before_data, &after_data, &modified);

    let flow = Flow::new(
        ReporterType::Source,
        FlowEndpointData::workload("ns1", "pod1-*").with_port(10),
        FlowEndpointData::host("hostendpoint").with_port(11),
        Action::Deny,
    )
    .with_proto(PROTO_TCP);

    let (processed, before, after) = calc.calculate(&flow);
    assert!(processed);

    assert_eq!(before.source.action, Action::Deny);
    assert!(before.source.include);
    assert!(!before.destination.include);

    assert_eq!(after.source.action, Action::Allow);
    assert!(after.source.include);
    // Added because the source no longer denies the flow
    assert_eq!(after.destination.action, Action::Allow);
    assert!(after.destination.include);

    // Without cached labels the modified policy never applies
    let calc = PolicyCalculator::new(config(false), EndpointCache::new(), &before_data, &after_data, &modified);
    let (_, _, after) = calc.calculate(&flow);
    assert_eq!(after.source.action, Action::Deny);
}

#[test]
fn test_service_account_selector_matching_nothing() {
    let yaml = format!(
        r#"{NAMESPACES}
serviceAccounts:
  - name: sa1
    namespace: ns1
    labels:
      role: web
tiers:
  - - kind: GlobalNetworkPolicy
      metadata:
        name: db-only
      spec:
        selector: all()
        types: [Ingress]
        ingress:
          - action: Allow
            source:
              serviceAccounts:
                selector: role == 'db'
"#
    );
    let after = ResourceData::from_yaml(&yaml).unwrap();
    let calc = PolicyCalculator::new(
        config(true),
        EndpointCache::new(),
        &resources(&[]),
        &after,
        &modified(&[ResourceId::global_network_policy("db-only")]),
    );

    // The source service account is unknown, but no account can match.
    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns1", &[]), Action::Allow);
    let (_, before, after) = calc.action(&flow);
    assert_eq!(before, Action::Allow);
    assert_eq!(after, Action::Deny);
}

#[test]
fn test_named_port_without_endpoint_data_is_indeterminate() {
    let yaml = format!(
        r#"{NAMESPACES}
tiers:
  - - kind: GlobalNetworkPolicy
      metadata:
        name: web
      spec:
        selector: all()
        types: [Ingress]
        ingress:
          - action: Allow
            destination:
              ports: [80, http-alt]
"#
    );
    let after = ResourceData::from_yaml(&yaml).unwrap();
    let calc = PolicyCalculator::new(
        config(true),
        EndpointCache::new(),
        &resources(&[]),
        &after,
        &modified(&[ResourceId::global_network_policy("web")]),
    );

    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[]).with_port(8080),
        Action::Allow,
    )
    .with_proto(PROTO_TCP);
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Indeterminate));

    let flow = Flow::new(
        ReporterType::Destination,
        unknown_endpoint(),
        wep("ns1", &[]).with_port(80),
        Action::Allow,
    );
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Allow));
}

#[test]
fn test_calculation_is_idempotent() {
    let calc = multi_tier_calculator();
    let flow = Flow::new(
        ReporterType::Destination,
        wep("ns2", &[("color", "red")]),
        wep("ns1", &[("color", "blue")]),
        Action::Allow,
    );
    let first = calc.calculate(&flow);
    let second = calc.calculate(&flow);
    assert_eq!(first, second);
}

#[test]
fn test_concurrent_calculation() {
    let calc = multi_tier_calculator();
    let colors = ["red", "blue", "purple", "green"];
    let flows: Vec<Flow> = colors
        .iter()
        .flat_map(|src| colors.iter().map(move |dst| (*src, *dst)))
        .map(|(src, dst)| {
            Flow::new(
                ReporterType::Destination,
                wep("ns2", &[("color", src)]),
                wep("ns1", &[("color", dst)]),
                Action::Allow,
            )
        })
        .collect();

    let expected: Vec<_> = flows.iter().map(|f| calc.action(f)).collect();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| flows.iter().map(|f| calc.action(f)).collect::<Vec<_>>())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

#[test]
fn test_knp_modification_marks_converted_policy() {
    let after = ResourceData::from_yaml(&format!(
        r#"{NAMESPACES}
tiers:
  - - kind: NetworkPolicy
      metadata:
        name: knp.default.web
        namespace: ns1
      spec:
        selector: all()
        types: [Ingress]
"#
    ))
    .unwrap();
    let mut modified = ModifiedResources::new();
    modified.add_id(ResourceId::kubernetes_network_policy("ns1", "web"));

    let calc = PolicyCalculator::new(config(true), EndpointCache::new(), &resources(&[]), &after, &modified);
    let flow = Flow::new(ReporterType::Destination, unknown_endpoint(), wep("ns1", &[]), Action::Allow);
    assert_eq!(calc.action(&flow), (true, Action::Allow, Action::Deny));
}

#[test]
fn test_network_endpoints_are_not_evaluated() {
    let calc = multi_tier_calculator();
    let flow = Flow::new(
        ReporterType::Source,
        FlowEndpointData::new(EndpointType::Net),
        wep("ns1", &[("color", "blue")]),
        Action::Unset,
    );
    let (processed, _, after) = calc.calculate(&flow);
    assert!(processed);
    assert!(!after.source.include);
    assert!(!after.destination.include);
    assert_eq!(after.action(), Action::Unknown);
}
