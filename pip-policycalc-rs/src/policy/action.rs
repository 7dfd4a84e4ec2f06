// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Actions, action flags and three-valued match results.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// =============================================================================
// Action
// =============================================================================

/// Enforcement action recorded in a flow log or calculated for a flow.
///
/// `Pass` only ever appears as a rule action; a flow-level result is always
/// `Allow`, `Deny` or `Indeterminate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// No action recorded or calculated
    #[default]
    #[serde(rename = "")]
    Unset,
    /// The recorded action could not be interpreted
    Unknown,
    Allow,
    Deny,
    Pass,
    /// Both allow and deny remain possible with the information available
    Indeterminate,
}

/// Parses an action string as found in flow logs (case-insensitive).
/// Unrecognised strings become `Action::Unknown`.
impl FromStr for Action {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "" => Action::Unset,
            "allow" => Action::Allow,
            "deny" => Action::Deny,
            "pass" => Action::Pass,
            "indeterminate" => Action::Indeterminate,
            _ => Action::Unknown,
        })
    }
}

impl Action {
    /// Whether this is a concrete flow-level result.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Action::Allow | Action::Deny)
    }

    /// The flag equivalent of this action, empty for non-policy actions.
    pub fn to_flag(self) -> ActionFlag {
        match self {
            Action::Allow => ActionFlag::ALLOW,
            Action::Deny => ActionFlag::DENY,
            Action::Pass => ActionFlag::NEXT_TIER,
            Action::Indeterminate => ActionFlag::ALLOW | ActionFlag::DENY,
            Action::Unset | Action::Unknown => ActionFlag::empty(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Unset => "unset",
            Action::Unknown => "unknown",
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Pass => "pass",
            Action::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Action Flags
// =============================================================================

bitflags! {
    /// Set of actions that remain possible for a flow while walking rules,
    /// policies and tiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActionFlag: u8 {
        const ALLOW = 1 << 0;
        const DENY = 1 << 1;
        /// Pass to the next tier (explicit pass rule, or no policy in the tier applied)
        const NEXT_TIER = 1 << 2;

        /// Every flag a policy rule can contribute.
        const ALL_POLICY_ACTIONS = Self::ALLOW.bits() | Self::DENY.bits() | Self::NEXT_TIER.bits();
    }
}

impl Default for ActionFlag {
    fn default() -> Self {
        ActionFlag::empty()
    }
}

impl ActionFlag {
    /// Both allow and deny are possible outcomes.
    pub fn indeterminate(self) -> bool {
        self.contains(ActionFlag::ALLOW | ActionFlag::DENY)
    }

    /// Collapse the flag set into a single action.
    ///
    /// Deny takes precedence over a pending pass since the deny path is already
    /// terminal; an allow that still has a pending pass stays an allow.
    pub fn to_action(self) -> Action {
        if self.indeterminate() {
            Action::Indeterminate
        } else if self.contains(ActionFlag::DENY) {
            Action::Deny
        } else if self.contains(ActionFlag::ALLOW) {
            Action::Allow
        } else if self.contains(ActionFlag::NEXT_TIER) {
            Action::Pass
        } else {
            Action::Unknown
        }
    }

    /// Action names for every policy action bit that is set, used for logging.
    pub fn to_action_strings(self) -> Vec<&'static str> {
        let mut actions = Vec::new();
        if self.contains(ActionFlag::ALLOW) {
            actions.push("allow");
        }
        if self.contains(ActionFlag::DENY) {
            actions.push("deny");
        }
        if self.contains(ActionFlag::NEXT_TIER) {
            actions.push("pass");
        }
        actions
    }
}

// =============================================================================
// Match Type
// =============================================================================

/// Three-valued result of matching a flow against a matcher.
///
/// `Unknown` is the zero value; it marks a selector slot that has not been
/// evaluated yet for the current flow and is never returned by a matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MatchType {
    #[default]
    Unknown,
    True,
    False,
    Uncertain,
}

impl MatchType {
    /// Convert a definite boolean into a match result.
    pub fn from_bool(b: bool) -> Self {
        if b {
            MatchType::True
        } else {
            MatchType::False
        }
    }

    /// Swap True and False; Uncertain (and Unknown) are unchanged.
    pub fn not(self) -> Self {
        match self {
            MatchType::True => MatchType::False,
            MatchType::False => MatchType::True,
            other => other,
        }
    }

    /// Combine two results of an AND: False wins, then Uncertain, then True.
    pub fn and(self, other: MatchType) -> Self {
        match (self, other) {
            (MatchType::False, _) | (_, MatchType::False) => MatchType::False,
            (MatchType::Uncertain, _) | (_, MatchType::Uncertain) => MatchType::Uncertain,
            (MatchType::Unknown, o) | (o, MatchType::Unknown) => o,
            _ => MatchType::True,
        }
    }
}
