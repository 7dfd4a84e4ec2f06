// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Flow log record types
//!
//! A [`Flow`] is the summarized record of a historical connection. Endpoint
//! data is partial: labels, IPs, ports and service accounts may all be
//! missing, which the calculator models as uncertainty rather than an error.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::policy::action::Action;

// =============================================================================
// Protocols
// =============================================================================

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMPV6: u8 = 58;
pub const PROTO_SCTP: u8 = 132;
pub const PROTO_UDPLITE: u8 = 136;

/// Look up a protocol number by name (case-insensitive).
pub fn protocol_number(name: &str) -> Option<u8> {
    match name.to_ascii_lowercase().as_str() {
        "icmp" => Some(PROTO_ICMP),
        "tcp" => Some(PROTO_TCP),
        "udp" => Some(PROTO_UDP),
        "icmpv6" => Some(PROTO_ICMPV6),
        "sctp" => Some(PROTO_SCTP),
        "udplite" => Some(PROTO_UDPLITE),
        _ => None,
    }
}

/// Whether the protocol number is ICMP or ICMPv6.
pub fn is_icmp(proto: u8) -> bool {
    proto == PROTO_ICMP || proto == PROTO_ICMPV6
}

// =============================================================================
// Endpoint and Reporter Types
// =============================================================================

/// Kind of endpoint at either end of a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointType {
    /// Endpoint type was not recorded
    #[default]
    #[serde(rename = "")]
    Invalid,
    /// Workload endpoint (pod)
    #[serde(rename = "wep")]
    Wep,
    /// Host endpoint
    #[serde(rename = "hep")]
    Hep,
    /// Network set
    #[serde(rename = "ns")]
    Ns,
    /// Arbitrary network outside the cluster
    #[serde(rename = "net")]
    Net,
}

/// Which end of the connection reported the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReporterType {
    #[serde(rename = "src")]
    Source,
    #[serde(rename = "dst")]
    Destination,
}

/// A named port declared on an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub protocol: u8,
    pub port: u16,
}

// =============================================================================
// Flow Endpoint Data
// =============================================================================

/// Endpoint information recorded for one side of a flow.
///
/// `None` means the value was not recorded. For labels this is distinct from
/// an empty map, which means the endpoint is known to carry no labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEndpointData {
    #[serde(rename = "type", default)]
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub named_ports: Option<Vec<NamedPort>>,
}

impl FlowEndpointData {
    /// Create endpoint data of the given type.
    pub fn new(endpoint_type: EndpointType) -> Self {
        Self {
            endpoint_type,
            ..Self::default()
        }
    }

    /// A workload endpoint in the given namespace.
    pub fn workload(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            endpoint_type: EndpointType::Wep,
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// A host endpoint.
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            endpoint_type: EndpointType::Hep,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the (known) labels.
    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels = Some(
            labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_service_account(mut self, service_account: impl Into<String>) -> Self {
        self.service_account = Some(service_account.into());
        self
    }

    pub fn with_named_ports(mut self, named_ports: Vec<NamedPort>) -> Self {
        self.named_ports = Some(named_ports);
        self
    }

    /// Whether policy is enforced on this endpoint by Calico.
    pub fn is_calico_managed_endpoint(&self) -> bool {
        matches!(self.endpoint_type, EndpointType::Wep | EndpointType::Hep)
    }
}

// =============================================================================
// Flow
// =============================================================================

/// A single historical flow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub reporter: ReporterType,
    #[serde(default)]
    pub source: FlowEndpointData,
    #[serde(default)]
    pub destination: FlowEndpointData,
    /// The action recorded by the reporter
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub proto: Option<u8>,
    #[serde(default)]
    pub ip_version: Option<u8>,
    /// Policy hits recorded in the flow log, in flow-log string form
    #[serde(default)]
    pub policies: Vec<String>,
}

impl Flow {
    /// Create a flow with the given reporter and recorded action.
    pub fn new(
        reporter: ReporterType,
        source: FlowEndpointData,
        destination: FlowEndpointData,
        action: Action,
    ) -> Self {
        Self {
            reporter,
            source,
            destination,
            action,
            proto: None,
            ip_version: None,
            policies: Vec::new(),
        }
    }

    pub fn with_proto(mut self, proto: u8) -> Self {
        self.proto = Some(proto);
        self
    }

    pub fn with_ip_version(mut self, ip_version: u8) -> Self {
        self.ip_version = Some(ip_version);
        self
    }

    /// Set the recorded policy hits (`index|tier|name|action|rule`).
    pub fn with_policies<S: Into<String>>(mut self, policies: impl IntoIterator<Item = S>) -> Self {
        self.policies = policies.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a flow from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
