// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Flow and endpoint matchers
//!
//! Every field of a rule or policy is compiled into a matcher that returns a
//! [`MatchType`]. A field that places no constraint on the flow compiles to
//! `None`. A field that can never be evaluated from flow-log data compiles to
//! the `AlwaysUncertain` variant, which lets rule compilation lower the best
//! possible match without ever invoking it.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::warn;

use crate::flow::types::{is_icmp, protocol_number, Flow, FlowEndpointData};
use crate::policy::action::MatchType;
use crate::policy::handlers::{EndpointSelectorHandler, NamespaceHandler};
use crate::policy::resource::{HttpMatch, IcmpFields, Port, PortSpec, Protocol, ServiceAccountMatch};

// =============================================================================
// Per-flow Cache
// =============================================================================

/// Selector results for one endpoint, indexed by selector slot.
pub type SelectorCache = [MatchType];

/// Per-evaluation cache of selector results for both endpoints of a flow.
///
/// A fresh cache is created for every flow evaluation and owned exclusively
/// by that evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowCache {
    pub source: Vec<MatchType>,
    pub destination: Vec<MatchType>,
}

impl FlowCache {
    /// Create a cache with room for `num_selectors` selector slots per endpoint.
    pub fn new(num_selectors: usize) -> Self {
        Self {
            source: vec![MatchType::Unknown; num_selectors],
            destination: vec![MatchType::Unknown; num_selectors],
        }
    }
}

// =============================================================================
// Matchers
// =============================================================================

pub type FlowMatchFn = dyn Fn(&Flow, &mut FlowCache) -> MatchType + Send + Sync;
pub type EndpointMatchFn = dyn Fn(&FlowEndpointData, &mut SelectorCache) -> MatchType + Send + Sync;

/// Matcher evaluated against a whole flow.
#[derive(Clone)]
pub enum FlowMatcher {
    Eval(Arc<FlowMatchFn>),
    /// The criterion can never be decided from flow-log data
    AlwaysUncertain,
}

/// Matcher evaluated against one endpoint of a flow.
#[derive(Clone)]
pub enum EndpointMatcher {
    Eval(Arc<EndpointMatchFn>),
    /// The criterion can never be decided from flow-log data
    AlwaysUncertain,
}

impl FlowMatcher {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Flow, &mut FlowCache) -> MatchType + Send + Sync + 'static,
    {
        FlowMatcher::Eval(Arc::new(f))
    }

    pub fn is_always_uncertain(&self) -> bool {
        matches!(self, FlowMatcher::AlwaysUncertain)
    }

    pub fn evaluate(&self, flow: &Flow, cache: &mut FlowCache) -> MatchType {
        match self {
            FlowMatcher::Eval(f) => f(flow, cache),
            FlowMatcher::AlwaysUncertain => MatchType::Uncertain,
        }
    }

    /// Invert the matcher: True and False swap, Uncertain is unchanged.
    pub fn not(self) -> Self {
        match self {
            FlowMatcher::Eval(f) => FlowMatcher::new(move |flow, cache| f(flow, cache).not()),
            FlowMatcher::AlwaysUncertain => FlowMatcher::AlwaysUncertain,
        }
    }
}

impl EndpointMatcher {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FlowEndpointData, &mut SelectorCache) -> MatchType + Send + Sync + 'static,
    {
        EndpointMatcher::Eval(Arc::new(f))
    }

    /// A matcher that always returns the given result.
    pub fn constant(mt: MatchType) -> Self {
        EndpointMatcher::new(move |_, _| mt)
    }

    pub fn is_always_uncertain(&self) -> bool {
        matches!(self, EndpointMatcher::AlwaysUncertain)
    }

    pub fn evaluate(&self, ep: &FlowEndpointData, cache: &mut SelectorCache) -> MatchType {
        match self {
            EndpointMatcher::Eval(f) => f(ep, cache),
            EndpointMatcher::AlwaysUncertain => MatchType::Uncertain,
        }
    }

    /// Invert the matcher: True and False swap, Uncertain is unchanged.
    pub fn not(self) -> Self {
        match self {
            EndpointMatcher::Eval(f) => EndpointMatcher::new(move |ep, cache| f(ep, cache).not()),
            EndpointMatcher::AlwaysUncertain => EndpointMatcher::AlwaysUncertain,
        }
    }

    /// Lift into a flow matcher evaluated against the source endpoint.
    pub fn src(self) -> FlowMatcher {
        match self {
            EndpointMatcher::Eval(f) => {
                FlowMatcher::new(move |flow, cache| f(&flow.source, &mut cache.source))
            }
            EndpointMatcher::AlwaysUncertain => FlowMatcher::AlwaysUncertain,
        }
    }

    /// Lift into a flow matcher evaluated against the destination endpoint.
    pub fn dst(self) -> FlowMatcher {
        match self {
            EndpointMatcher::Eval(f) => {
                FlowMatcher::new(move |flow, cache| f(&flow.destination, &mut cache.destination))
            }
            EndpointMatcher::AlwaysUncertain => FlowMatcher::AlwaysUncertain,
        }
    }

    /// Lift into a flow matcher evaluated against the given endpoint.
    pub fn on(self, side: EndpointSide) -> FlowMatcher {
        match side {
            EndpointSide::Source => self.src(),
            EndpointSide::Destination => self.dst(),
        }
    }
}

impl fmt::Debug for FlowMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowMatcher::Eval(_) => f.write_str("FlowMatcher::Eval"),
            FlowMatcher::AlwaysUncertain => f.write_str("FlowMatcher::AlwaysUncertain"),
        }
    }
}

impl fmt::Debug for EndpointMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointMatcher::Eval(_) => f.write_str("EndpointMatcher::Eval"),
            EndpointMatcher::AlwaysUncertain => f.write_str("EndpointMatcher::AlwaysUncertain"),
        }
    }
}

/// Which endpoint of a flow a criterion refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointSide {
    Source,
    Destination,
}

impl EndpointSide {
    pub fn endpoint<'a>(&self, flow: &'a Flow) -> &'a FlowEndpointData {
        match self {
            EndpointSide::Source => &flow.source,
            EndpointSide::Destination => &flow.destination,
        }
    }
}

// =============================================================================
// Matcher Factory
// =============================================================================

/// Builds matchers for rule and policy fields.
///
/// Selector matchers are shared through the [`EndpointSelectorHandler`] so that
/// every distinct selector string owns exactly one cache slot.
pub struct MatcherFactory<'a> {
    namespaces: &'a mut NamespaceHandler,
    selectors: &'a mut EndpointSelectorHandler,
}

impl<'a> MatcherFactory<'a> {
    pub fn new(namespaces: &'a mut NamespaceHandler, selectors: &'a mut EndpointSelectorHandler) -> Self {
        Self {
            namespaces,
            selectors,
        }
    }

    pub fn protocol(&self, protocol: Option<&Protocol>) -> Option<FlowMatcher> {
        let proto = resolve_protocol(protocol?)?;
        Some(FlowMatcher::new(move |flow, _| match flow.proto {
            Some(p) => MatchType::from_bool(p == proto),
            None => MatchType::Uncertain,
        }))
    }

    pub fn not_protocol(&self, protocol: Option<&Protocol>) -> Option<FlowMatcher> {
        self.protocol(protocol).map(FlowMatcher::not)
    }

    pub fn ip_version(&self, version: Option<u8>) -> Option<FlowMatcher> {
        let version = version?;
        Some(FlowMatcher::new(move |flow, _| match flow.ip_version {
            Some(v) => MatchType::from_bool(v == version),
            None => MatchType::Uncertain,
        }))
    }

    /// ICMP type and code are never present in flow logs, so an ICMP flow can
    /// only be Uncertain. A non-ICMP flow never matches.
    pub fn icmp(&self, icmp: Option<&IcmpFields>) -> Option<FlowMatcher> {
        let icmp = icmp?;
        if icmp.icmp_type.is_none() && icmp.code.is_none() {
            return None;
        }
        Some(FlowMatcher::new(|flow, _| match flow.proto {
            Some(p) if !is_icmp(p) => MatchType::False,
            _ => MatchType::Uncertain,
        }))
    }

    pub fn not_icmp(&self, icmp: Option<&IcmpFields>) -> Option<FlowMatcher> {
        self.icmp(icmp).map(FlowMatcher::not)
    }

    pub fn http(&self, http: Option<&HttpMatch>) -> Option<FlowMatcher> {
        let http = http?;
        if http.methods.is_empty() && http.paths.is_empty() {
            return None;
        }
        Some(FlowMatcher::AlwaysUncertain)
    }

    pub fn nets(&self, nets: &[String]) -> Option<EndpointMatcher> {
        if nets.is_empty() {
            return None;
        }
        let mut parsed = Vec::with_capacity(nets.len());
        for net in nets {
            match parse_net(net) {
                Some(n) => parsed.push(n),
                None => {
                    warn!(net = %net, "Invalid CIDR in rule - ignoring nets match");
                    return None;
                }
            }
        }
        Some(EndpointMatcher::new(move |ep, _| match ep.ip {
            Some(ip) => MatchType::from_bool(parsed.iter().any(|n| n.contains(&ip))),
            None => MatchType::Uncertain,
        }))
    }

    pub fn not_nets(&self, nets: &[String]) -> Option<EndpointMatcher> {
        self.nets(nets).map(EndpointMatcher::not)
    }

    /// Match the port of one endpoint. A named port only matches when the
    /// endpoint declares it with the flow port and protocol; otherwise a named
    /// entry can only make the result Uncertain.
    pub fn ports(&self, side: EndpointSide, ports: &[Port]) -> Option<FlowMatcher> {
        if ports.is_empty() {
            return None;
        }
        let mut ranges = Vec::new();
        let mut names = Vec::new();
        for port in ports {
            match port.spec() {
                PortSpec::Range { min, max } => ranges.push((min, max)),
                PortSpec::Named(name) => names.push(name),
            }
        }

        Some(FlowMatcher::new(move |flow, _| {
            let ep = side.endpoint(flow);
            let Some(port) = ep.port else {
                return MatchType::Uncertain;
            };
            if ranges.iter().any(|(min, max)| (*min..=*max).contains(&port)) {
                return MatchType::True;
            }
            if names.is_empty() {
                return MatchType::False;
            }
            if let (Some(named_ports), Some(proto)) = (&ep.named_ports, flow.proto) {
                let resolved = named_ports.iter().any(|np| {
                    np.port == port && np.protocol == proto && names.contains(&np.name)
                });
                if resolved {
                    return MatchType::True;
                }
            }
            MatchType::Uncertain
        }))
    }

    pub fn not_ports(&self, side: EndpointSide, ports: &[Port]) -> Option<FlowMatcher> {
        self.ports(side, ports).map(FlowMatcher::not)
    }

    pub fn domains(&self, domains: &[String]) -> Option<EndpointMatcher> {
        if domains.is_empty() {
            return None;
        }
        Some(EndpointMatcher::AlwaysUncertain)
    }

    pub fn selector(&mut self, selector: &str) -> Option<EndpointMatcher> {
        self.selectors.get_selector_endpoint_matcher(selector)
    }

    pub fn not_selector(&mut self, selector: &str) -> Option<EndpointMatcher> {
        self.selector(selector).map(EndpointMatcher::not)
    }

    pub fn namespace_selector(&mut self, selector: &str) -> Option<EndpointMatcher> {
        self.namespaces.get_namespace_selector_endpoint_matcher(selector)
    }

    /// Exact namespace match.
    pub fn namespace(&self, namespace: &str) -> Option<EndpointMatcher> {
        let namespace = namespace.to_string();
        Some(EndpointMatcher::new(move |ep, _| {
            MatchType::from_bool(ep.namespace == namespace)
        }))
    }

    pub fn service_accounts(&mut self, sa: Option<&ServiceAccountMatch>) -> Option<EndpointMatcher> {
        let sa = sa?;
        self.namespaces
            .get_service_account_endpoint_matcher(&sa.names, &sa.selector)
    }

    pub fn service_account_selector(&mut self, selector: &str) -> Option<EndpointMatcher> {
        self.namespaces
            .get_service_account_endpoint_matcher(&[], selector)
    }
}

fn resolve_protocol(protocol: &Protocol) -> Option<u8> {
    match protocol {
        Protocol::Number(n) => Some(*n),
        Protocol::Name(name) => {
            let proto = protocol_number(name).or_else(|| name.parse().ok());
            if proto.is_none() {
                warn!(protocol = %name, "Unknown protocol in rule - ignoring protocol match");
            }
            proto
        }
    }
}

fn parse_net(net: &str) -> Option<IpNet> {
    if let Ok(n) = net.parse::<IpNet>() {
        return Some(n);
    }
    let ip = net.parse::<IpAddr>().ok()?;
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNet::new(ip, prefix).ok()
}
