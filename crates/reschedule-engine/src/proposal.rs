//! Proposal lifecycle state machine.
//!
//! ```text
//! draft -> sent -> approved -> applied
//!               -> rejected
//!               -> expired
//! ```
//!
//! The engine is the sole writer of `status`. Approval only records intent;
//! writing the chosen slot back to the calendar is the separate `applied` step.
//! Invariant: `chosen_option_index` is set iff status is approved or applied.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::event::CalendarEvent;
use crate::planner::PlannedReschedule;
use crate::policy::Approver;
use crate::window::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
    Applied,
    Expired,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Applied => "applied",
            Self::Expired => "expired",
        }
    }

    /// Draft and sent proposals still block a new proposal for the same event.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Draft | Self::Sent)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Applied | Self::Expired)
    }

    /// Whether `chosen_option_index` must be populated in this state.
    pub fn carries_choice(&self) -> bool {
        matches!(self, Self::Approved | Self::Applied)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, unguessable proposal identifier.
///
/// Doubles as the capability token of the approval link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(Uuid);

impl ProposalId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a token; anything that is not a UUID is simply not a proposal.
    pub fn parse(token: &str) -> Option<Self> {
        Uuid::parse_str(token.trim()).ok().map(Self)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One ranked replacement slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalOption {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Ranking heuristic, not a probability.
    pub score: i32,
    pub explain: String,
}

impl ProposalOption {
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start_at: self.start_at,
            end_at: self.end_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl FromStr for Decision {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(EngineError::InvalidValue {
                field: "decision",
                value: other.to_string(),
            }),
        }
    }
}

/// Who recorded a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    ExternalLink,
    InApp,
}

/// Result of a decision attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Recorded,
    /// The proposal was already decided; nothing changed.
    AlreadyDecided,
    /// The decision arrived after the deadline; the proposal is now expired.
    Expired,
}

/// Result of an apply attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: ProposalStatus,
    pub to: ProposalStatus,
    pub at: DateTime<Utc>,
}

/// Everything a store needs to create a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub user_id: String,
    pub event_id: String,
    pub created_by: String,
    pub rationale: String,
    pub options: Vec<ProposalOption>,
    pub requires_approver: bool,
    pub requires_user_confirmation: bool,
    pub approver: Option<Approver>,
}

impl NewProposal {
    /// Snapshot the event's policy into a proposal request.
    ///
    /// `requires_approver` and `requires_user_confirmation` are fixed here;
    /// later policy edits do not reach in-flight proposals.
    pub fn from_plan(
        user_id: impl Into<String>,
        event: &CalendarEvent,
        created_by: impl Into<String>,
        plan: PlannedReschedule,
    ) -> Self {
        let requires_approver = event
            .policy
            .as_ref()
            .is_some_and(|p| p.requires_approver());
        let requires_user_confirmation = event
            .policy
            .as_ref()
            .is_some_and(|p| p.requires_user_confirmation_before_sending_requests);
        let approver = event
            .policy
            .as_ref()
            .filter(|p| p.requires_approver())
            .and_then(|p| p.approver.clone());

        Self {
            user_id: user_id.into(),
            event_id: event.id.clone(),
            created_by: created_by.into(),
            rationale: plan.rationale,
            options: plan.options,
            requires_approver,
            requires_user_confirmation,
            approver,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleProposal {
    pub id: ProposalId,
    pub user_id: String,
    pub event_id: String,
    pub created_by: String,
    pub status: ProposalStatus,
    pub rationale: String,
    pub options: Vec<ProposalOption>,
    pub chosen_option_index: Option<usize>,
    requires_approver: bool,
    /// Outbound delivery is held until the user sends the proposal.
    #[serde(default)]
    requires_user_confirmation: bool,
    pub approver: Option<Approver>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<DecisionSource>,
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<StatusChange>,
}

impl RescheduleProposal {
    pub fn draft(id: ProposalId, new: NewProposal, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            event_id: new.event_id,
            created_by: new.created_by,
            status: ProposalStatus::Draft,
            rationale: new.rationale,
            options: new.options,
            chosen_option_index: None,
            requires_approver: new.requires_approver,
            requires_user_confirmation: new.requires_user_confirmation,
            approver: new.approver,
            created_at: now,
            sent_at: None,
            expires_at: None,
            decided_at: None,
            decided_by: None,
            applied_at: None,
            history: Vec::new(),
        }
    }

    /// Approval requirement captured at creation time.
    pub fn requires_approver(&self) -> bool {
        self.requires_approver
    }

    /// Whether the user must act before the proposal leaves draft.
    pub fn requires_user_confirmation(&self) -> bool {
        self.requires_user_confirmation
    }

    pub fn chosen_option(&self) -> Option<&ProposalOption> {
        self.chosen_option_index.and_then(|i| self.options.get(i))
    }

    /// Sent and past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Sent && self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// draft -> sent. The proposal expires `ttl` after sending.
    ///
    /// # Errors
    /// `EmptyOptions` when there is nothing to choose from; `InvalidTransition`
    /// when the proposal is not a draft.
    pub fn send(&mut self, now: DateTime<Utc>, ttl: Duration) -> Result<()> {
        self.ensure(ProposalStatus::Draft, ProposalStatus::Sent)?;
        if self.options.is_empty() {
            return Err(EngineError::EmptyOptions);
        }
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| EngineError::Config("proposal ttl out of range".to_string()))?;
        self.sent_at = Some(now);
        self.expires_at = Some(expires_at);
        self.transition(ProposalStatus::Sent, now);
        Ok(())
    }

    /// Swap in freshly planned options before the draft goes out.
    ///
    /// # Errors
    /// `EmptyOptions` for an empty plan; `InvalidTransition` when the
    /// proposal already left draft.
    pub fn replace_options(&mut self, rationale: String, options: Vec<ProposalOption>) -> Result<()> {
        self.ensure(ProposalStatus::Draft, ProposalStatus::Sent)?;
        if options.is_empty() {
            return Err(EngineError::EmptyOptions);
        }
        self.rationale = rationale;
        self.options = options;
        Ok(())
    }

    /// draft -> expired, for a draft whose slots no longer fit the calendar.
    ///
    /// The stale options stay on record; the event is free for a new proposal.
    pub fn withdraw(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure(ProposalStatus::Draft, ProposalStatus::Expired)?;
        self.transition(ProposalStatus::Expired, now);
        Ok(())
    }

    /// Record an approver or user decision on a sent proposal.
    ///
    /// Repeated or conflicting decisions on an already-decided proposal are a
    /// no-op reported as `AlreadyDecided`.
    ///
    /// # Errors
    /// `InvalidTransition` for drafts; `MissingField` when approving without an
    /// option; `OptionOutOfRange` for an invalid option index.
    pub fn decide(
        &mut self,
        decision: Decision,
        chosen_option_index: Option<usize>,
        actor: DecisionSource,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        match self.status {
            ProposalStatus::Draft => {
                return Err(EngineError::InvalidTransition {
                    from: self.status,
                    to: decision.target_status(),
                })
            }
            ProposalStatus::Sent => {}
            _ => return Ok(DecisionOutcome::AlreadyDecided),
        }

        if self.is_overdue(now) {
            self.transition(ProposalStatus::Expired, now);
            return Ok(DecisionOutcome::Expired);
        }

        if decision == Decision::Approved {
            let index = chosen_option_index.ok_or(EngineError::MissingField("option"))?;
            if index >= self.options.len() {
                return Err(EngineError::OptionOutOfRange {
                    index,
                    len: self.options.len(),
                });
            }
            self.chosen_option_index = Some(index);
        }

        self.decided_at = Some(now);
        self.decided_by = Some(actor);
        self.transition(decision.target_status(), now);
        Ok(DecisionOutcome::Recorded)
    }

    pub fn approve(
        &mut self,
        chosen_option_index: usize,
        actor: DecisionSource,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        self.decide(Decision::Approved, Some(chosen_option_index), actor, now)
    }

    pub fn reject(&mut self, actor: DecisionSource, now: DateTime<Utc>) -> Result<DecisionOutcome> {
        self.decide(Decision::Rejected, None, actor, now)
    }

    /// sent -> expired, regardless of the deadline.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure(ProposalStatus::Sent, ProposalStatus::Expired)?;
        self.transition(ProposalStatus::Expired, now);
        Ok(())
    }

    /// approved -> applied, after the chosen slot was written to the calendar.
    ///
    /// # Errors
    /// `InvalidTransition` unless the proposal is approved (or already applied).
    pub fn mark_applied(&mut self, now: DateTime<Utc>) -> Result<ApplyOutcome> {
        if self.status == ProposalStatus::Applied {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        self.ensure(ProposalStatus::Approved, ProposalStatus::Applied)?;
        self.applied_at = Some(now);
        self.transition(ProposalStatus::Applied, now);
        Ok(ApplyOutcome::Applied)
    }

    /// Structural invariants every persisted proposal satisfies.
    pub fn check_invariants(&self) -> bool {
        let choice_ok = self.status.carries_choice() == self.chosen_option().is_some();
        let options_ok = self.status == ProposalStatus::Draft || !self.options.is_empty();
        let ordered = self.options.windows(2).all(|w| w[0].score > w[1].score);
        choice_ok && options_ok && ordered
    }

    fn ensure(&self, expected: ProposalStatus, to: ProposalStatus) -> Result<()> {
        if self.status != expected {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: ProposalStatus, at: DateTime<Utc>) {
        self.history.push(StatusChange {
            from: self.status,
            to,
            at,
        });
        self.status = to;
    }
}

impl Decision {
    fn target_status(self) -> ProposalStatus {
        match self {
            Self::Approved => ProposalStatus::Approved,
            Self::Rejected => ProposalStatus::Rejected,
        }
    }
}
