//! Decision recording, calendar write-back and the approval-link handler.
//!
//! Every operation here is safe to repeat: a second decision on a decided
//! proposal is reported as `AlreadyDecided`, and a second apply is reported as
//! `AlreadyApplied` without touching the calendar again. Writes are
//! conditional on the status that was loaded, so concurrent callers resolve
//! to one winner.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::proposal::{
    ApplyOutcome, Decision, DecisionOutcome, DecisionSource, ProposalId, ProposalStatus,
    RescheduleProposal,
};
use crate::store::{CalendarStore, ProposalStore};

pub const LINK_CONFIRMATION: &str = "Thank you. Your response has been recorded.";
pub const LINK_INVALID: &str = "This link is invalid or incomplete.";
pub const LINK_UNAVAILABLE: &str = "We could not process your response. Please try again later.";

/// Transport-agnostic response for the approval link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkResponse {
    pub status: u16,
    pub body: &'static str,
}

async fn load(store: &dyn ProposalStore, id: ProposalId) -> Result<RescheduleProposal> {
    store
        .get_proposal(id)
        .await?
        .ok_or_else(|| EngineError::ProposalNotFound(id.to_string()))
}

/// Record an approve/reject decision on a sent proposal.
pub async fn record_approval(
    store: &dyn ProposalStore,
    id: ProposalId,
    decision: Decision,
    chosen_option_index: Option<usize>,
    actor: DecisionSource,
    now: DateTime<Utc>,
) -> Result<DecisionOutcome> {
    let mut proposal = load(store, id).await?;
    let mut outcome = proposal.decide(decision, chosen_option_index, actor, now)?;

    if outcome != DecisionOutcome::AlreadyDecided
        && !store
            .save_proposal_if(&proposal, ProposalStatus::Sent)
            .await?
    {
        debug!(proposal_id = %id, "decision lost to a concurrent writer");
        outcome = DecisionOutcome::AlreadyDecided;
    }
    info!(
        proposal_id = %id,
        event_id = %proposal.event_id,
        status = %proposal.status,
        ?outcome,
        "recorded proposal decision"
    );
    Ok(outcome)
}

/// Write the chosen slot of an approved proposal back to its event.
///
/// The proposal is claimed as applied before the calendar write, so only one
/// caller ever moves the event. A failed write restores the approved state.
///
/// # Errors
/// `InvalidTransition` unless the proposal is approved; `ProposalNotFound`
/// when the proposal belongs to another user.
pub async fn apply_approved_proposal(
    calendar: &dyn CalendarStore,
    proposals: &dyn ProposalStore,
    user_id: &str,
    id: ProposalId,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome> {
    let mut proposal = load(proposals, id).await?;
    if proposal.user_id != user_id {
        return Err(EngineError::ProposalNotFound(id.to_string()));
    }

    match proposal.status {
        ProposalStatus::Applied => return Ok(ApplyOutcome::AlreadyApplied),
        ProposalStatus::Approved => {}
        from => {
            return Err(EngineError::InvalidTransition {
                from,
                to: ProposalStatus::Applied,
            })
        }
    }

    let slot = proposal
        .chosen_option()
        .map(|o| o.time_range())
        .ok_or(EngineError::MissingField("chosenOptionIndex"))?;

    let approved = proposal.clone();
    let outcome = proposal.mark_applied(now)?;
    if !proposals
        .save_proposal_if(&proposal, ProposalStatus::Approved)
        .await?
    {
        debug!(proposal_id = %id, "apply lost to a concurrent writer");
        return Ok(ApplyOutcome::AlreadyApplied);
    }

    if let Err(err) = calendar
        .update_event_time(user_id, &proposal.event_id, slot)
        .await
    {
        proposals
            .save_proposal_if(&approved, ProposalStatus::Applied)
            .await?;
        return Err(err);
    }

    info!(
        proposal_id = %id,
        event_id = %proposal.event_id,
        start_at = %slot.start_at,
        "applied approved proposal"
    );
    Ok(outcome)
}

/// Expire every sent proposal of `user_id` whose deadline has passed.
pub async fn expire_stale_proposals(
    store: &dyn ProposalStore,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ProposalId>> {
    let mut expired = Vec::new();
    for mut proposal in store.list_proposals(user_id, Some(ProposalStatus::Sent)).await? {
        if !proposal.is_overdue(now) {
            continue;
        }
        proposal.expire(now)?;
        if store
            .save_proposal_if(&proposal, ProposalStatus::Sent)
            .await?
        {
            expired.push(proposal.id);
        }
    }
    if !expired.is_empty() {
        info!(user_id = %user_id, count = expired.len(), "expired stale proposals");
    }
    Ok(expired)
}

#[derive(Debug)]
struct LinkQuery {
    id: ProposalId,
    decision: Decision,
    option: Option<usize>,
}

fn parse_link_query(query: &str) -> Option<LinkQuery> {
    let mut token = None;
    let mut decision = None;
    let mut option = None;

    for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        match key.as_ref() {
            "token" => token = ProposalId::parse(&value),
            "decision" => decision = value.parse::<Decision>().ok(),
            "option" => option = Some(value.parse::<usize>().ok()?),
            _ => {}
        }
    }

    Some(LinkQuery {
        id: token?,
        decision: decision?,
        option,
    })
}

/// Handle `GET ?token=..&decision=..&option=..` from an approval link.
///
/// The bearer of the token is unauthenticated, so success and idempotent
/// no-ops share one confirmation body and internal error text never leaks.
pub async fn handle_approval_link(
    store: &dyn ProposalStore,
    query: &str,
    now: DateTime<Utc>,
) -> LinkResponse {
    let Some(request) = parse_link_query(query) else {
        return LinkResponse {
            status: 400,
            body: LINK_INVALID,
        };
    };

    let result = record_approval(
        store,
        request.id,
        request.decision,
        request.option,
        DecisionSource::ExternalLink,
        now,
    )
    .await;

    match result {
        Ok(_) => LinkResponse {
            status: 200,
            body: LINK_CONFIRMATION,
        },
        Err(err) => {
            warn!(proposal_id = %request.id, error = %err, "approval link rejected");
            let status = err.status_code();
            let body = if err.is_client_error() {
                LINK_INVALID
            } else {
                LINK_UNAVAILABLE
            };
            LinkResponse { status, body }
        }
    }
}
