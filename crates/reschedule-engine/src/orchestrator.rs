//! Per-user cron runner.
//!
//! One run fetches the user's events within the horizon, treats all of them
//! as busy, and creates a sent proposal for every movable event that has no
//! unresolved proposal yet. Events are independent units of work: a failure
//! on one is recorded and the batch moves on.
//!
//! Drafts are never sent as stored. A draft left by an interrupted run, or
//! held for user confirmation, is re-planned against the current calendar
//! right before it goes out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approval::expire_stale_proposals;
use crate::config::{EngineConfig, ScheduleConfig};
use crate::error::{EngineError, Result};
use crate::event::CalendarEvent;
use crate::planner::Planner;
use crate::proposal::{NewProposal, ProposalId, ProposalStatus, RescheduleProposal};
use crate::store::{CalendarStore, ProposalStore};
use crate::window::TimeRange;

/// `created_by` recorded on proposals from scheduled runs.
pub const CRON_CREATOR: &str = "cron";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFailure {
    pub event_id: String,
    pub reason: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub user_id: String,
    pub considered: usize,
    pub skipped_locked: usize,
    pub skipped_open_proposal: usize,
    pub no_candidates: usize,
    pub created: Vec<ProposalId>,
    /// Drafts waiting for the user to confirm before anything is sent.
    pub awaiting_confirmation: Vec<ProposalId>,
    pub expired: Vec<ProposalId>,
    pub failures: Vec<EventFailure>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    Locked,
    OpenProposal,
    NoCandidates,
    Held(ProposalId),
    Sent(ProposalId),
}

/// Result of [`CronRunner::confirm_and_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Sent,
    /// The proposal already left draft; nothing was sent again.
    AlreadySent,
    /// No option survived re-planning, so the draft was expired.
    Withdrawn,
}

pub struct CronRunner {
    calendar: Arc<dyn CalendarStore>,
    proposals: Arc<dyn ProposalStore>,
    planner: Planner,
    schedule: ScheduleConfig,
}

impl CronRunner {
    pub fn new(
        calendar: Arc<dyn CalendarStore>,
        proposals: Arc<dyn ProposalStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            calendar,
            proposals,
            planner: Planner::new(config.planner.clone()),
            schedule: config.schedule.clone(),
        }
    }

    /// Run one scheduling pass for `user_id` as of `now`.
    ///
    /// # Errors
    /// Only a horizon that cannot be represented or failing to list the
    /// user's events aborts the run; per-event failures land in
    /// `RunReport::failures`.
    pub async fn run_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport {
            user_id: user_id.to_string(),
            ..RunReport::default()
        };

        match expire_stale_proposals(self.proposals.as_ref(), user_id, now).await {
            Ok(expired) => report.expired = expired,
            Err(err) => warn!(user_id = %user_id, error = %err, "expiry sweep failed"),
        }

        let (horizon, search_window) = self.windows(now)?;
        let events = self.calendar.list_events(user_id, horizon).await?;
        let busy: Vec<TimeRange> = events.iter().map(CalendarEvent::time_range).collect();

        let batch = self.process_batch(user_id, &events, &busy, &search_window, now, &mut report);
        if tokio::time::timeout(self.schedule.batch_timeout(), batch)
            .await
            .is_err()
        {
            let err = EngineError::Timeout(self.schedule.batch_timeout_secs);
            warn!(user_id = %user_id, error = %err, "batch cut short; remaining events wait for the next run");
            report.timed_out = true;
        }

        info!(
            user_id = %user_id,
            considered = report.considered,
            created = report.created.len(),
            awaiting_confirmation = report.awaiting_confirmation.len(),
            skipped_locked = report.skipped_locked,
            skipped_open = report.skipped_open_proposal,
            no_candidates = report.no_candidates,
            expired = report.expired.len(),
            failed = report.failures.len(),
            timed_out = report.timed_out,
            "cron run finished"
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        user_id: &str,
        events: &[CalendarEvent],
        busy: &[TimeRange],
        window: &TimeRange,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) {
        for event in events {
            report.considered += 1;
            match self.process_event(user_id, event, busy, window, now).await {
                Ok(EventOutcome::Locked) => report.skipped_locked += 1,
                Ok(EventOutcome::OpenProposal) => report.skipped_open_proposal += 1,
                Ok(EventOutcome::NoCandidates) => report.no_candidates += 1,
                Ok(EventOutcome::Held(id)) => report.awaiting_confirmation.push(id),
                Ok(EventOutcome::Sent(id)) => report.created.push(id),
                Err(err) => {
                    warn!(
                        user_id = %user_id,
                        event_id = %event.id,
                        error = %err,
                        "proposal creation failed"
                    );
                    report.failures.push(EventFailure {
                        event_id: event.id.clone(),
                        reason: err.to_string(),
                        retryable: !err.is_client_error(),
                    });
                }
            }
        }
    }

    async fn process_event(
        &self,
        user_id: &str,
        event: &CalendarEvent,
        busy: &[TimeRange],
        window: &TimeRange,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome> {
        if !self.planner.should_move(event) {
            debug!(event_id = %event.id, "event is not movable");
            return Ok(EventOutcome::Locked);
        }

        if let Some(open) = self.proposals.find_open_proposal(user_id, &event.id).await? {
            if open.status == ProposalStatus::Draft {
                return self.refresh_draft(open, event, busy, window, now).await;
            }
            debug!(event_id = %event.id, proposal_id = %open.id, "unresolved proposal exists");
            return Ok(EventOutcome::OpenProposal);
        }

        let plan = self.planner.propose(event, busy, window)?;
        if !plan.is_actionable() {
            debug!(event_id = %event.id, "no conflict-free slot in window");
            return Ok(EventOutcome::NoCandidates);
        }

        let new = NewProposal::from_plan(user_id, event, CRON_CREATOR, plan);
        let proposal = self.proposals.create_proposal(new, now).await?;
        self.release(proposal, now).await
    }

    /// Send the user's held draft after re-planning it against the calendar
    /// as it is now.
    ///
    /// # Errors
    /// `ProposalNotFound` for unknown proposals or another user's;
    /// `EventNotFound` when the event left the horizon; `InvalidTransition`
    /// for a draft that was already withdrawn.
    pub async fn confirm_and_send(
        &self,
        user_id: &str,
        id: ProposalId,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        let mut draft = self
            .proposals
            .get_proposal(id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| EngineError::ProposalNotFound(id.to_string()))?;
        match draft.status {
            ProposalStatus::Draft => {}
            ProposalStatus::Expired => {
                return Err(EngineError::InvalidTransition {
                    from: ProposalStatus::Expired,
                    to: ProposalStatus::Sent,
                })
            }
            _ => return Ok(ConfirmOutcome::AlreadySent),
        }

        let (horizon, window) = self.windows(now)?;
        let events = self.calendar.list_events(user_id, horizon).await?;
        let event = events
            .iter()
            .find(|e| e.id == draft.event_id)
            .ok_or_else(|| EngineError::EventNotFound(draft.event_id.clone()))?;
        let busy: Vec<TimeRange> = events.iter().map(CalendarEvent::time_range).collect();

        let plan = self.planner.propose(event, &busy, &window)?;
        if !plan.is_actionable() {
            draft.withdraw(now)?;
            if !self
                .proposals
                .save_proposal_if(&draft, ProposalStatus::Draft)
                .await?
            {
                return Ok(ConfirmOutcome::AlreadySent);
            }
            info!(proposal_id = %id, event_id = %event.id, "confirmed draft no longer fits; withdrawn");
            return Ok(ConfirmOutcome::Withdrawn);
        }

        draft.replace_options(plan.rationale, plan.options)?;
        draft.send(now, self.schedule.proposal_ttl())?;
        if !self
            .proposals
            .save_proposal_if(&draft, ProposalStatus::Draft)
            .await?
        {
            return Ok(ConfirmOutcome::AlreadySent);
        }
        info!(proposal_id = %id, event_id = %event.id, "confirmed proposal sent");
        Ok(ConfirmOutcome::Sent)
    }

    /// The horizon to read events from and the window new slots must fit in.
    fn windows(&self, now: DateTime<Utc>) -> Result<(TimeRange, TimeRange)> {
        let end_at = now
            .checked_add_signed(self.schedule.horizon())
            .ok_or_else(|| EngineError::Config("schedule.horizon_days out of range".to_string()))?;
        let start_at = now
            .checked_add_signed(self.schedule.lead_time())
            .ok_or_else(|| {
                EngineError::Config("schedule.lead_time_minutes out of range".to_string())
            })?;
        Ok((
            TimeRange {
                start_at: now,
                end_at,
            },
            TimeRange { start_at, end_at },
        ))
    }

    /// Re-plan an unsent draft. Its stored options may predate events that
    /// landed since, so they are replaced or the draft is withdrawn.
    async fn refresh_draft(
        &self,
        mut draft: RescheduleProposal,
        event: &CalendarEvent,
        busy: &[TimeRange],
        window: &TimeRange,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome> {
        let plan = self.planner.propose(event, busy, window)?;
        if !plan.is_actionable() {
            draft.withdraw(now)?;
            if !self
                .proposals
                .save_proposal_if(&draft, ProposalStatus::Draft)
                .await?
            {
                return Ok(EventOutcome::OpenProposal);
            }
            debug!(event_id = %event.id, proposal_id = %draft.id, "draft no longer fits; withdrawn");
            return Ok(EventOutcome::NoCandidates);
        }

        draft.replace_options(plan.rationale, plan.options)?;
        debug!(event_id = %event.id, proposal_id = %draft.id, "re-planned pending draft");
        self.release(draft, now).await
    }

    /// Send a planned draft, or park it when the user confirms first.
    async fn release(
        &self,
        mut proposal: RescheduleProposal,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome> {
        let reachable = proposal
            .approver
            .as_ref()
            .is_some_and(|approver| approver.is_reachable());
        if proposal.requires_approver() && !reachable {
            warn!(
                event_id = %proposal.event_id,
                proposal_id = %proposal.id,
                "approver has no contact channel; the proposal cannot be delivered"
            );
        }

        if proposal.requires_user_confirmation() {
            self.proposals
                .save_proposal_if(&proposal, ProposalStatus::Draft)
                .await?;
            debug!(
                event_id = %proposal.event_id,
                proposal_id = %proposal.id,
                "proposal held for user confirmation"
            );
            return Ok(EventOutcome::Held(proposal.id));
        }

        proposal.send(now, self.schedule.proposal_ttl())?;
        if !self
            .proposals
            .save_proposal_if(&proposal, ProposalStatus::Draft)
            .await?
        {
            return Ok(EventOutcome::OpenProposal);
        }

        debug!(
            event_id = %proposal.event_id,
            proposal_id = %proposal.id,
            options = proposal.options.len(),
            requires_approver = proposal.requires_approver(),
            "proposal sent"
        );
        Ok(EventOutcome::Sent(proposal.id))
    }
}
