// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
pub mod action;
pub mod compiled;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod hits;
pub mod matcher;
pub mod resource;
pub mod selector;
pub mod tier;

pub use action::{Action, ActionFlag, MatchType};
pub use compiled::{CompiledPolicy, CompiledRule};
pub use config::{CalculatorConfig, Namespace, PolicyConfigError, ResourceData, ServiceAccount};
pub use engine::{EndpointResponse, PolicyCalculator, Response};
pub use handlers::{EndpointSelectorHandler, NamespaceHandler};
pub use hits::{PolicyHit, PolicyHitError};
pub use matcher::{EndpointMatcher, FlowCache, FlowMatcher, MatcherFactory};
pub use resource::{ModifiedResources, PolicyResource, ResourceId, ResourceKind};
pub use selector::{Selector, SelectorError};
pub use tier::{CompiledTier, CompiledTiers, CompiledTiersAndPolicies};
