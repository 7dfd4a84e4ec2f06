// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
pub mod endpoint_cache;
pub mod types;

pub use endpoint_cache::{EndpointCache, EndpointData};
pub use types::{
    protocol_number, EndpointType, Flow, FlowEndpointData, NamedPort, ReporterType,
};
