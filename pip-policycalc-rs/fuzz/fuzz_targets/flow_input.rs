#![no_main]

use std::collections::BTreeMap;
use std::net::IpAddr;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pip_policycalc::{
    Action, CalculatorConfig, EndpointType, Flow, FlowEndpointData, ModifiedResources, NamedPort,
    PolicyCalculator, ReporterType, ResourceId,
};

const AFTER: &str = r#"
namespaces:
  - name: ns1
    labels:
      team: a
serviceAccounts:
  - name: sa1
    namespace: ns1
    labels:
      role: web
tiers:
  - - kind: NetworkPolicy
      metadata:
        name: tier1.web
        namespace: ns1
      spec:
        tier: tier1
        selector: app == 'web'
        types: [Ingress, Egress]
        ingress:
          - action: Allow
            protocol: TCP
            source:
              nets: [10.0.0.0/8, 'fd00::/8']
              serviceAccounts:
                selector: role == 'web'
            destination:
              ports: [80, '8000:8100', http]
          - action: Pass
            notProtocol: UDP
            icmp:
              type: 3
        egress:
          - action: Deny
            destination:
              notSelector: has(app)
              namespaceSelector: team == 'a'
  - - kind: GlobalNetworkPolicy
      metadata:
        name: default-deny
      spec:
        selector: all()
        types: [Ingress, Egress]
"#;

#[derive(Arbitrary, Debug)]
struct FuzzEndpoint {
    kind: u8,
    name: String,
    namespace: String,
    labels: Option<Vec<(String, String)>>,
    ip: Option<IpAddr>,
    port: Option<u16>,
    service_account: Option<String>,
    named_ports: Option<Vec<(String, u8, u16)>>,
}

#[derive(Arbitrary, Debug)]
struct FuzzFlow {
    source_reported: bool,
    source: FuzzEndpoint,
    destination: FuzzEndpoint,
    action: u8,
    proto: Option<u8>,
    ip_version: Option<u8>,
}

impl From<FuzzEndpoint> for FlowEndpointData {
    fn from(ep: FuzzEndpoint) -> Self {
        let endpoint_type = match ep.kind % 5 {
            0 => EndpointType::Wep,
            1 => EndpointType::Hep,
            2 => EndpointType::Ns,
            3 => EndpointType::Net,
            _ => EndpointType::Invalid,
        };
        FlowEndpointData {
            endpoint_type,
            name: ep.name,
            namespace: ep.namespace,
            labels: ep.labels.map(|l| l.into_iter().collect::<BTreeMap<_, _>>()),
            ip: ep.ip,
            port: ep.port,
            service_account: ep.service_account,
            named_ports: ep.named_ports.map(|ports| {
                ports
                    .into_iter()
                    .map(|(name, protocol, port)| NamedPort { name, protocol, port })
                    .collect()
            }),
        }
    }
}

fuzz_target!(|input: FuzzFlow| {
    let mut modified = ModifiedResources::new();
    modified.add_id(ResourceId::network_policy("ns1", "tier1.web"));
    let config = CalculatorConfig {
        calculate_original_action: true,
    };
    let calc = PolicyCalculator::from_yaml(config, "{}", AFTER, &modified).expect("Valid YAML");

    let reporter = if input.source_reported {
        ReporterType::Source
    } else {
        ReporterType::Destination
    };
    let action = match input.action % 4 {
        0 => Action::Allow,
        1 => Action::Deny,
        2 => Action::Unknown,
        _ => Action::Unset,
    };
    let mut flow = Flow::new(reporter, input.source.into(), input.destination.into(), action);
    flow.proto = input.proto;
    flow.ip_version = input.ip_version;

    // Must never panic, whatever the flow contents
    let (_, before, after) = calc.calculate(&flow);
    let _ = (before.action(), after.action());
});
