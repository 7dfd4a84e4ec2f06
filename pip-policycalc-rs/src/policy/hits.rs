// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Policy hits
//!
//! A policy hit names a policy that contributed to the action of a flow at one
//! endpoint. Flow logs record them as `index|tier|name|action|rule`, where the
//! rule index is `-` when unknown and may be missing altogether in older logs.
//! Hits of one policy share an index; the index advances whenever the next hit
//! belongs to a different policy.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::flow::types::Flow;
use crate::policy::action::{Action, ActionFlag};

/// Tier of the namespace profile that applies once all tiers are exhausted.
pub const PROFILE_TIER: &str = "__PROFILE__";

/// Rule index recorded for the implicit deny at the end of a tier.
pub const END_OF_TIER_RULE_INDEX: i32 = -1;

/// Marker carried in the name of a staged policy.
const STAGED_MARKER: &str = "staged:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyHitError {
    #[error("Policy hit '{0}' must have 4 or 5 fields")]
    FieldCount(String),

    #[error("Invalid match index '{0}'")]
    InvalidIndex(String),

    #[error("Invalid policy hit action '{0}'")]
    InvalidAction(String),

    #[error("Invalid rule index '{0}'")]
    InvalidRuleIndex(String),
}

/// One policy hit of a flow endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyHit {
    /// Match index, shared by hits of the same policy
    pub index: usize,
    pub tier: String,
    /// Flow-log name of the policy (`ns/tier.name`, `tier.name` or a profile)
    pub name: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<i32>,
}

impl PolicyHit {
    pub fn is_staged(&self) -> bool {
        self.name.contains(STAGED_MARKER)
    }

    pub fn is_profile(&self) -> bool {
        self.tier == PROFILE_TIER
    }

    pub fn is_end_of_tier_deny(&self) -> bool {
        self.action == Action::Deny && self.rule_index == Some(END_OF_TIER_RULE_INDEX)
    }
}

impl FromStr for PolicyHit {
    type Err = PolicyHitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('|').collect();
        if fields.len() != 4 && fields.len() != 5 {
            return Err(PolicyHitError::FieldCount(s.to_string()));
        }

        let index = fields[0]
            .parse::<usize>()
            .map_err(|_| PolicyHitError::InvalidIndex(fields[0].to_string()))?;
        let action = match fields[3].parse::<Action>() {
            Ok(action @ (Action::Allow | Action::Deny | Action::Pass)) => action,
            _ => return Err(PolicyHitError::InvalidAction(fields[3].to_string())),
        };
        let rule_index = match fields.get(4) {
            None | Some(&"-") => None,
            Some(idx) => Some(
                idx.parse::<i32>()
                    .map_err(|_| PolicyHitError::InvalidRuleIndex(idx.to_string()))?,
            ),
        };

        Ok(Self {
            index,
            tier: fields[1].to_string(),
            name: fields[2].to_string(),
            action,
            rule_index,
        })
    }
}

impl fmt::Display for PolicyHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|{}|", self.index, self.tier, self.name, self.action)?;
        match self.rule_index {
            Some(idx) => write!(f, "{idx}"),
            None => f.write_str("-"),
        }
    }
}

/// Flow-log name of the profile of a namespace.
pub fn profile_name(namespace: &str) -> String {
    format!("{PROFILE_TIER}.kns.{namespace}")
}

/// Append one hit per action in `flags` for the given policy.
pub fn record(hits: &mut Vec<PolicyHit>, tier: &str, name: &str, flags: ActionFlag, rule_index: Option<i32>) {
    let index = match hits.last() {
        Some(last) if last.tier == tier && last.name == name => last.index,
        Some(last) => last.index + 1,
        None => 0,
    };
    let actions = [
        (ActionFlag::ALLOW, Action::Allow),
        (ActionFlag::DENY, Action::Deny),
        (ActionFlag::NEXT_TIER, Action::Pass),
    ];
    for (flag, action) in actions {
        if flags.contains(flag) {
            hits.push(PolicyHit {
                index,
                tier: tier.to_string(),
                name: name.to_string(),
                action,
                rule_index,
            });
        }
    }
}

/// Enforced policy hits recorded in a flow log, ordered by match index.
/// Entries that cannot be parsed are skipped.
pub fn recorded_hits(flow: &Flow) -> Vec<PolicyHit> {
    let mut hits: Vec<PolicyHit> = flow
        .policies
        .iter()
        .filter_map(|s| match s.parse::<PolicyHit>() {
            Ok(hit) => Some(hit),
            Err(e) => {
                warn!(policy = %s, error = %e, "Ignoring unparseable policy hit");
                None
            }
        })
        .filter(|hit| !hit.is_staged())
        .collect();
    hits.sort_by_key(|hit| hit.index);
    hits
}

/// Whether two hit lists name the same enforced policies and actions,
/// ignoring order, duplicates, match and rule indices, and staged policies.
/// The end-of-tier deny stays distinct from a deny rule.
pub fn same_enforced_hits(a: &[PolicyHit], b: &[PolicyHit]) -> bool {
    fn keys(hits: &[PolicyHit]) -> HashSet<(&str, &str, Action, bool)> {
        hits.iter()
            .filter(|hit| !hit.is_staged())
            .map(|hit| (hit.tier.as_str(), hit.name.as_str(), hit.action, hit.is_end_of_tier_deny()))
            .collect()
    }
    keys(a) == keys(b)
}
