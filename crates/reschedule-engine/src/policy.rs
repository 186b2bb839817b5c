//! Per-event AI-scheduling permissions.
//!
//! A policy decides whether the planner may move an event at all, how much of
//! the event's content may surface in explanations, and whether a third-party
//! approver has to sign off on a move.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Whether and how an automated scheduler may alter the event's time.
///
/// Deserialization rejects unknown values, so malformed policies fail at the
/// ingestion boundary instead of being defaulted inside the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// Never moved.
    Locked,
    /// Moved freely.
    Flexible,
    /// Moved only with the approver's decision.
    Negotiable,
    /// Never moved; content is private.
    Sensitive,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Flexible => "flexible",
            Self::Negotiable => "negotiable",
            Self::Sensitive => "sensitive",
        }
    }

    /// Locked and sensitive events are never rescheduled.
    pub fn is_movable(&self) -> bool {
        matches!(self, Self::Flexible | Self::Negotiable)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(Self::Locked),
            "flexible" => Ok(Self::Flexible),
            "negotiable" => Ok(Self::Negotiable),
            "sensitive" => Ok(Self::Sensitive),
            other => Err(EngineError::UnknownLockState(other.to_string())),
        }
    }
}

/// How much event detail may be exposed in rationale and approval requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSharing {
    None,
    #[default]
    Minimal,
    Full,
}

/// Third party whose decision is required for negotiable events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Approver {
    /// True when at least one contact channel is present.
    pub fn is_reachable(&self) -> bool {
        [&self.email, &self.phone]
            .iter()
            .any(|c| c.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Scheduling permissions attached 1:1 to a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPolicy {
    pub lock_state: LockState,
    /// No outbound message or invite without explicit user action.
    #[serde(default)]
    pub requires_user_confirmation_before_sending_requests: bool,
    #[serde(default)]
    pub content_sharing: ContentSharing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<Approver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_shift_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_shift_days: Option<u32>,
}

impl EventPolicy {
    /// A policy with the given lock state and every other field defaulted.
    pub fn new(lock_state: LockState) -> Self {
        Self {
            lock_state,
            requires_user_confirmation_before_sending_requests: false,
            content_sharing: ContentSharing::default(),
            approver: None,
            max_shift_minutes: None,
            max_shift_days: None,
        }
    }

    /// Proposals for negotiable events must be decided by the approver.
    pub fn requires_approver(&self) -> bool {
        self.lock_state == LockState::Negotiable
    }

    /// Tightest shift bound in minutes, if any bound is set.
    pub fn max_shift_bound_minutes(&self) -> Option<i64> {
        let minutes = self.max_shift_minutes.map(i64::from);
        let days = self.max_shift_days.map(|d| i64::from(d) * 24 * 60);
        match (minutes, days) {
            (Some(m), Some(d)) => Some(m.min(d)),
            (m, d) => m.or(d),
        }
    }
}
