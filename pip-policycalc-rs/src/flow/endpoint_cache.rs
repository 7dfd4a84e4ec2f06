// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Endpoint cache used to fill in data missing from flow logs.
//!
//! Flow logs are written by the dataplane and frequently omit labels, service
//! accounts or named ports. The cache is populated from the current datastore
//! snapshot and keyed by the aggregated endpoint name that appears in the flow
//! log (for example `nginx-*` for pods created from the same generate name).

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::flow::types::{Flow, FlowEndpointData, NamedPort};

/// Cached datastore information for a single aggregated endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointData {
    pub labels: BTreeMap<String, String>,
    pub service_account: Option<String>,
    pub named_ports: Vec<NamedPort>,
}

/// Endpoint data keyed by namespace and aggregated name.
#[derive(Debug, Clone, Default)]
pub struct EndpointCache {
    endpoints: HashMap<(String, String), EndpointData>,
}

/// Return the name under which an endpoint is aggregated in flow logs.
///
/// Endpoints created from a generate name are aggregated as `<generate-name>*`,
/// anything else keeps its full name.
pub fn aggregated_name(name: &str, generate_name: Option<&str>) -> String {
    match generate_name {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}*"),
        _ => name.to_string(),
    }
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an endpoint. Host endpoints use an empty namespace.
    pub fn add(&mut self, namespace: impl Into<String>, name: impl Into<String>, data: EndpointData) {
        self.endpoints.insert((namespace.into(), name.into()), data);
    }

    /// Remove an endpoint, returning its cached data.
    pub fn remove(&mut self, namespace: &str, name: &str) -> Option<EndpointData> {
        self.endpoints
            .remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&EndpointData> {
        self.endpoints
            .get(&(namespace.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Fill in missing Calico endpoint data from the cache.
    ///
    /// The input flow is borrowed unchanged when neither endpoint needs
    /// augmenting.
    pub fn augment<'a>(&self, flow: &'a Flow) -> Cow<'a, Flow> {
        let source = self.augmented_endpoint(&flow.source);
        let destination = self.augmented_endpoint(&flow.destination);
        if source.is_none() && destination.is_none() {
            return Cow::Borrowed(flow);
        }

        let mut augmented = flow.clone();
        if let Some(source) = source {
            debug!(name = %flow.source.name, "Augmented source endpoint from cache");
            augmented.source = source;
        }
        if let Some(destination) = destination {
            debug!(name = %flow.destination.name, "Augmented destination endpoint from cache");
            augmented.destination = destination;
        }
        Cow::Owned(augmented)
    }

    fn augmented_endpoint(&self, ep: &FlowEndpointData) -> Option<FlowEndpointData> {
        if !ep.is_calico_managed_endpoint() {
            return None;
        }
        let cached = self.get(&ep.namespace, &ep.name)?;

        let missing_labels = ep.labels.as_ref().map_or(true, |l| l.is_empty());
        let missing_sa = ep.service_account.is_none() && cached.service_account.is_some();
        let missing_ports = ep.named_ports.is_none();
        if !missing_labels && !missing_sa && !missing_ports {
            return None;
        }

        let mut ep = ep.clone();
        if missing_labels {
            ep.labels = Some(cached.labels.clone());
        }
        if missing_sa {
            ep.service_account = cached.service_account.clone();
        }
        if missing_ports {
            ep.named_ports = Some(cached.named_ports.clone());
        }
        Some(ep)
    }
}
