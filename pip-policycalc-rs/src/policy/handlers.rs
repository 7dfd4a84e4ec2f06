// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Selector and namespace handlers
//!
//! Both handlers are only mutated while compiling. Once compilation is done
//! they are frozen and the matchers they produced are shared read-only
//! across concurrent flow evaluations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::policy::action::MatchType;
use crate::policy::config::{Namespace, ServiceAccount};
use crate::policy::matcher::EndpointMatcher;
use crate::policy::selector::Selector;

// =============================================================================
// Endpoint Selector Handler
// =============================================================================

/// Assigns a cache slot to every distinct endpoint selector and hands out a
/// single memoizing matcher per selector.
#[derive(Debug, Default)]
pub struct EndpointSelectorHandler {
    matchers: HashMap<String, Option<EndpointMatcher>>,
    num_slots: usize,
}

impl EndpointSelectorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of selector slots allocated so far.
    pub fn num_selectors(&self) -> usize {
        self.num_slots
    }

    /// Return the matcher for a selector, creating it on first use.
    ///
    /// An empty selector places no constraint and returns `None`, as does a
    /// selector that fails to parse.
    pub fn get_selector_endpoint_matcher(&mut self, selector: &str) -> Option<EndpointMatcher> {
        let key = selector.trim();
        if key.is_empty() {
            return None;
        }
        if let Some(m) = self.matchers.get(key) {
            return m.clone();
        }

        let matcher = match Selector::parse(key) {
            Ok(sel) if sel.is_all() => Some(EndpointMatcher::constant(MatchType::True)),
            Ok(sel) => {
                let slot = self.num_slots;
                self.num_slots += 1;
                debug!(selector = %sel, slot, "Allocated selector slot");
                Some(EndpointMatcher::new(move |ep, cache| {
                    let Some(labels) = &ep.labels else {
                        return MatchType::Uncertain;
                    };
                    match cache.get_mut(slot) {
                        Some(cached) if *cached != MatchType::Unknown => *cached,
                        Some(cached) => {
                            *cached = MatchType::from_bool(sel.evaluate(labels));
                            *cached
                        }
                        None => MatchType::from_bool(sel.evaluate(labels)),
                    }
                }))
            }
            Err(e) => {
                warn!(selector = %key, error = %e, "Invalid selector - treating as unconstrained");
                None
            }
        };

        self.matchers.insert(key.to_string(), matcher.clone());
        matcher
    }
}

// =============================================================================
// Namespace Handler
// =============================================================================

/// Precomputes namespace and service account membership for namespace and
/// service account selectors.
#[derive(Debug, Default)]
pub struct NamespaceHandler {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    service_accounts: Vec<ServiceAccount>,
    namespace_matchers: HashMap<String, Option<EndpointMatcher>>,
    service_account_matchers: HashMap<String, Option<EndpointMatcher>>,
}

impl NamespaceHandler {
    pub fn new(namespaces: &[Namespace], service_accounts: &[ServiceAccount]) -> Self {
        Self {
            namespaces: namespaces
                .iter()
                .map(|ns| (ns.name.clone(), ns.labels.clone()))
                .collect(),
            service_accounts: service_accounts.to_vec(),
            namespace_matchers: HashMap::new(),
            service_account_matchers: HashMap::new(),
        }
    }

    /// Return a matcher that checks whether an endpoint lives in one of the
    /// namespaces selected by `selector`.
    pub fn get_namespace_selector_endpoint_matcher(&mut self, selector: &str) -> Option<EndpointMatcher> {
        let key = selector.trim();
        if key.is_empty() {
            return None;
        }
        if let Some(m) = self.namespace_matchers.get(key) {
            return m.clone();
        }

        let matcher = match Selector::parse(key) {
            Ok(sel) => {
                let names: HashSet<String> = self
                    .namespaces
                    .iter()
                    .filter(|(_, labels)| sel.evaluate(labels))
                    .map(|(name, _)| name.clone())
                    .collect();
                debug!(selector = %sel, matched = names.len(), "Compiled namespace selector");
                Some(EndpointMatcher::new(move |ep, _| {
                    MatchType::from_bool(names.contains(&ep.namespace))
                }))
            }
            Err(e) => {
                warn!(selector = %key, error = %e, "Invalid namespace selector - treating as unconstrained");
                None
            }
        };

        self.namespace_matchers.insert(key.to_string(), matcher.clone());
        matcher
    }

    /// Return a matcher for service account names and/or a service account
    /// selector. When both are given an account must satisfy both.
    pub fn get_service_account_endpoint_matcher(
        &mut self,
        names: &[String],
        selector: &str,
    ) -> Option<EndpointMatcher> {
        let selector = selector.trim();
        if names.is_empty() && selector.is_empty() {
            return None;
        }
        let mut sorted_names = names.to_vec();
        sorted_names.sort();
        sorted_names.dedup();
        let key = format!("{selector}|{}", sorted_names.join(","));
        if let Some(m) = self.service_account_matchers.get(&key) {
            return m.clone();
        }

        let matcher = self.build_service_account_matcher(sorted_names, selector);
        self.service_account_matchers.insert(key, matcher.clone());
        matcher
    }

    fn build_service_account_matcher(&self, names: Vec<String>, selector: &str) -> Option<EndpointMatcher> {
        let parsed = if selector.is_empty() {
            None
        } else {
            match Selector::parse(selector) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    warn!(selector = %selector, error = %e, "Invalid service account selector - ignoring");
                    None
                }
            }
        };

        let Some(sel) = parsed else {
            if names.is_empty() {
                return None;
            }
            let names: Arc<HashSet<String>> = Arc::new(names.into_iter().collect());
            return Some(EndpointMatcher::new(move |ep, _| match &ep.service_account {
                Some(sa) => MatchType::from_bool(names.contains(sa)),
                None => MatchType::Uncertain,
            }));
        };

        let accounts: HashSet<(String, String)> = self
            .service_accounts
            .iter()
            .filter(|sa| names.is_empty() || names.contains(&sa.name))
            .filter(|sa| sel.evaluate(&sa.labels))
            .map(|sa| (sa.namespace.clone(), sa.name.clone()))
            .collect();
        debug!(selector = %sel, matched = accounts.len(), "Compiled service account selector");

        if accounts.is_empty() {
            return Some(EndpointMatcher::constant(MatchType::False));
        }
        Some(EndpointMatcher::new(move |ep, _| match &ep.service_account {
            Some(sa) => MatchType::from_bool(accounts.contains(&(ep.namespace.clone(), sa.clone()))),
            None => MatchType::Uncertain,
        }))
    }
}
