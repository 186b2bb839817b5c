//! Storage ports consumed by the engine, plus an in-memory implementation.
//!
//! Transport, persistence and auth live behind these traits. `MemoryStore`
//! backs the CLI and the test suite.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cleaning::CleanedEvent;
use crate::error::{EngineError, Result};
use crate::event::CalendarEvent;
use crate::policy::EventPolicy;
use crate::proposal::{NewProposal, ProposalId, ProposalStatus, RescheduleProposal};
use crate::window::TimeRange;

#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Events whose interval intersects `range`, ordered by start time.
    async fn list_events(&self, user_id: &str, range: TimeRange) -> Result<Vec<CalendarEvent>>;

    /// Full replace of an event's policy.
    async fn update_event_policy(
        &self,
        user_id: &str,
        event_id: &str,
        policy: EventPolicy,
    ) -> Result<()>;

    /// Move an event to a new slot.
    async fn update_event_time(&self, user_id: &str, event_id: &str, slot: TimeRange)
        -> Result<()>;
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Persist a new draft proposal and assign its id.
    async fn create_proposal(
        &self,
        new: NewProposal,
        now: DateTime<Utc>,
    ) -> Result<RescheduleProposal>;

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<RescheduleProposal>>;

    /// Overwrite a previously created proposal.
    async fn save_proposal(&self, proposal: &RescheduleProposal) -> Result<()>;

    /// Overwrite a proposal only while its stored status is still `expected`.
    ///
    /// Returns `false`, writing nothing, when another writer got there first.
    /// Every state transition goes through this compare-and-set.
    async fn save_proposal_if(
        &self,
        proposal: &RescheduleProposal,
        expected: ProposalStatus,
    ) -> Result<bool>;

    /// The unresolved (draft or sent) proposal for an event, if any.
    async fn find_open_proposal(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<RescheduleProposal>>;

    async fn list_proposals(
        &self,
        user_id: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<RescheduleProposal>>;
}

/// Append-only log of cleaned events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append unless `idempotency_key` was already seen for this user.
    ///
    /// Returns `true` when the event was appended.
    async fn append(
        &self,
        user_id: &str,
        idempotency_key: &str,
        event: CleanedEvent,
    ) -> Result<bool>;
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<(String, CalendarEvent)>,
    proposals: Vec<RescheduleProposal>,
    log: Vec<CleanedEvent>,
    seen_keys: HashSet<(String, String)>,
}

/// Process-local store. Enforces at most one open proposal per event.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace events for a user.
    pub fn seed_events(&self, user_id: &str, events: impl IntoIterator<Item = CalendarEvent>) -> Result<()> {
        let mut state = self.lock()?;
        for event in events {
            state
                .events
                .retain(|(owner, existing)| !(owner == user_id && existing.id == event.id));
            state.events.push((user_id.to_string(), event));
        }
        Ok(())
    }

    pub fn event(&self, user_id: &str, event_id: &str) -> Result<Option<CalendarEvent>> {
        Ok(self
            .lock()?
            .events
            .iter()
            .find(|(owner, e)| owner == user_id && e.id == event_id)
            .map(|(_, e)| e.clone()))
    }

    /// Every proposal in creation order.
    pub fn proposals(&self) -> Result<Vec<RescheduleProposal>> {
        Ok(self.lock()?.proposals.clone())
    }

    /// Cleaned events appended for a user, oldest first.
    pub fn cleaned_events(&self, user_id: &str) -> Result<Vec<CleanedEvent>> {
        Ok(self
            .lock()?
            .log
            .iter()
            .filter(|e| e.tenant.clerk_user_id == user_id)
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CalendarStore for MemoryStore {
    async fn list_events(&self, user_id: &str, range: TimeRange) -> Result<Vec<CalendarEvent>> {
        let state = self.lock()?;
        let mut events: Vec<CalendarEvent> = state
            .events
            .iter()
            .filter(|(owner, e)| {
                owner == user_id && e.start_at < range.end_at && range.start_at < e.end_at
            })
            .map(|(_, e)| e.clone())
            .collect();
        events.sort_by(|a, b| (a.start_at, &a.id).cmp(&(b.start_at, &b.id)));
        Ok(events)
    }

    async fn update_event_policy(
        &self,
        user_id: &str,
        event_id: &str,
        policy: EventPolicy,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let (_, event) = state
            .events
            .iter_mut()
            .find(|(owner, e)| owner == user_id && e.id == event_id)
            .ok_or_else(|| EngineError::EventNotFound(event_id.to_string()))?;
        event.policy = Some(policy);
        Ok(())
    }

    async fn update_event_time(
        &self,
        user_id: &str,
        event_id: &str,
        slot: TimeRange,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let (_, event) = state
            .events
            .iter_mut()
            .find(|(owner, e)| owner == user_id && e.id == event_id)
            .ok_or_else(|| EngineError::EventNotFound(event_id.to_string()))?;
        event.start_at = slot.start_at;
        event.end_at = slot.end_at;
        Ok(())
    }
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn create_proposal(
        &self,
        new: NewProposal,
        now: DateTime<Utc>,
    ) -> Result<RescheduleProposal> {
        let mut state = self.lock()?;
        let duplicate = state.proposals.iter().any(|p| {
            p.user_id == new.user_id && p.event_id == new.event_id && p.status.is_open()
        });
        if duplicate {
            return Err(EngineError::DuplicateOpenProposal(new.event_id));
        }

        let proposal = RescheduleProposal::draft(ProposalId::random(), new, now);
        state.proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<RescheduleProposal>> {
        Ok(self.lock()?.proposals.iter().find(|p| p.id == id).cloned())
    }

    async fn save_proposal(&self, proposal: &RescheduleProposal) -> Result<()> {
        let mut state = self.lock()?;
        let slot = state
            .proposals
            .iter_mut()
            .find(|p| p.id == proposal.id)
            .ok_or_else(|| EngineError::ProposalNotFound(proposal.id.to_string()))?;
        *slot = proposal.clone();
        Ok(())
    }

    async fn save_proposal_if(
        &self,
        proposal: &RescheduleProposal,
        expected: ProposalStatus,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let slot = state
            .proposals
            .iter_mut()
            .find(|p| p.id == proposal.id)
            .ok_or_else(|| EngineError::ProposalNotFound(proposal.id.to_string()))?;
        if slot.status != expected {
            return Ok(false);
        }
        *slot = proposal.clone();
        Ok(true)
    }

    async fn find_open_proposal(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<RescheduleProposal>> {
        Ok(self
            .lock()?
            .proposals
            .iter()
            .find(|p| p.user_id == user_id && p.event_id == event_id && p.status.is_open())
            .cloned())
    }

    async fn list_proposals(
        &self,
        user_id: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<RescheduleProposal>> {
        Ok(self
            .lock()?
            .proposals
            .iter()
            .filter(|p| p.user_id == user_id && status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append(
        &self,
        user_id: &str,
        idempotency_key: &str,
        event: CleanedEvent,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let key = (user_id.to_string(), idempotency_key.to_string());
        if !state.seen_keys.insert(key) {
            return Ok(false);
        }
        state.log.push(event);
        Ok(true)
    }
}
