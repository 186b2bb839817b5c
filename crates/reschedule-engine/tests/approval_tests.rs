//! Tests for decisions, write-back, expiry and the approval link.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reschedule_engine::approval::{
    apply_approved_proposal, expire_stale_proposals, handle_approval_link, record_approval,
    LINK_CONFIRMATION, LINK_INVALID,
};
use reschedule_engine::error::{EngineError, Result};
use reschedule_engine::event::CalendarEvent;
use reschedule_engine::planner::propose_reschedule;
use reschedule_engine::policy::{EventPolicy, LockState};
use reschedule_engine::proposal::{
    ApplyOutcome, Decision, DecisionOutcome, DecisionSource, NewProposal, ProposalId,
    ProposalStatus, RescheduleProposal,
};
use reschedule_engine::store::{CalendarStore, MemoryStore, ProposalStore};
use reschedule_engine::window::TimeRange;

const USER: &str = "user-1";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

fn flexible_event() -> CalendarEvent {
    let start = Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap();
    CalendarEvent::new("evt-1", start, start + Duration::hours(1))
        .with_policy(EventPolicy::new(LockState::Flexible))
}

/// Store with one event and a sent proposal for it.
async fn sent_proposal() -> (Arc<MemoryStore>, RescheduleProposal) {
    let store = Arc::new(MemoryStore::new());
    let event = flexible_event();
    store.seed_events(USER, vec![event.clone()]).unwrap();

    let window = TimeRange {
        start_at: now() + Duration::hours(1),
        end_at: now() + Duration::days(7),
    };
    let plan = propose_reschedule(&event, &[event.time_range()], &window).unwrap();
    let mut proposal = store
        .create_proposal(NewProposal::from_plan(USER, &event, "test", plan), now())
        .await
        .unwrap();
    proposal.send(now(), Duration::hours(48)).unwrap();
    store.save_proposal(&proposal).await.unwrap();
    (store, proposal)
}

fn link(id: ProposalId, decision: &str, option: Option<usize>) -> String {
    match option {
        Some(option) => format!("?token={id}&decision={decision}&option={option}"),
        None => format!("?token={id}&decision={decision}"),
    }
}

/// Counts calendar writes on top of a `MemoryStore`.
struct CountingCalendar {
    inner: Arc<MemoryStore>,
    writes: AtomicUsize,
}

#[async_trait]
impl CalendarStore for CountingCalendar {
    async fn list_events(&self, user_id: &str, range: TimeRange) -> Result<Vec<CalendarEvent>> {
        self.inner.list_events(user_id, range).await
    }

    async fn update_event_policy(
        &self,
        user_id: &str,
        event_id: &str,
        policy: EventPolicy,
    ) -> Result<()> {
        self.inner.update_event_policy(user_id, event_id, policy).await
    }

    async fn update_event_time(
        &self,
        user_id: &str,
        event_id: &str,
        slot: TimeRange,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_event_time(user_id, event_id, slot).await
    }
}

/// Hands control back to the scheduler between loading a proposal and
/// returning it, so concurrent callers interleave on stale copies.
struct YieldingStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl ProposalStore for YieldingStore {
    async fn create_proposal(
        &self,
        new: NewProposal,
        now: DateTime<Utc>,
    ) -> Result<RescheduleProposal> {
        self.inner.create_proposal(new, now).await
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<RescheduleProposal>> {
        let loaded = self.inner.get_proposal(id).await;
        tokio::task::yield_now().await;
        loaded
    }

    async fn save_proposal(&self, proposal: &RescheduleProposal) -> Result<()> {
        self.inner.save_proposal(proposal).await
    }

    async fn save_proposal_if(
        &self,
        proposal: &RescheduleProposal,
        expected: ProposalStatus,
    ) -> Result<bool> {
        self.inner.save_proposal_if(proposal, expected).await
    }

    async fn find_open_proposal(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<RescheduleProposal>> {
        self.inner.find_open_proposal(user_id, event_id).await
    }

    async fn list_proposals(
        &self,
        user_id: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<RescheduleProposal>> {
        self.inner.list_proposals(user_id, status).await
    }
}

// ── record_approval ─────────────────────────────────────────────────────────

#[tokio::test]
async fn record_approval_persists_the_choice() {
    let (store, proposal) = sent_proposal().await;

    let outcome = record_approval(
        store.as_ref(),
        proposal.id,
        Decision::Approved,
        Some(2),
        DecisionSource::InApp,
        now(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, DecisionOutcome::Recorded);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Approved);
    assert_eq!(saved.chosen_option_index, Some(2));
    assert_eq!(saved.decided_by, Some(DecisionSource::InApp));
}

#[tokio::test]
async fn record_approval_for_unknown_id_is_not_found() {
    let store = MemoryStore::new();
    let err = record_approval(
        &store,
        ProposalId::random(),
        Decision::Rejected,
        None,
        DecisionSource::InApp,
        now(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::ProposalNotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn late_decision_expires_the_stored_proposal() {
    let (store, proposal) = sent_proposal().await;

    let outcome = record_approval(
        store.as_ref(),
        proposal.id,
        Decision::Approved,
        Some(0),
        DecisionSource::ExternalLink,
        now() + Duration::hours(49),
    )
    .await
    .unwrap();

    assert_eq!(outcome, DecisionOutcome::Expired);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Expired);
    assert_eq!(saved.chosen_option_index, None);
}

// ── Approval link ───────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_link_is_idempotent() {
    let (store, proposal) = sent_proposal().await;
    let query = link(proposal.id, "approve", Some(1));

    let first = handle_approval_link(store.as_ref(), &query, now()).await;
    let after_first = store.get_proposal(proposal.id).await.unwrap().unwrap();
    let second =
        handle_approval_link(store.as_ref(), &query, now() + Duration::minutes(3)).await;
    let after_second = store.get_proposal(proposal.id).await.unwrap().unwrap();

    assert_eq!(first.status, 200);
    assert_eq!(first.body, LINK_CONFIRMATION);
    assert_eq!(second, first);
    assert_eq!(after_first.chosen_option_index, Some(1));
    assert_eq!(after_second, after_first);
}

#[tokio::test]
async fn conflicting_second_link_keeps_first_decision() {
    let (store, proposal) = sent_proposal().await;

    handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(0)), now()).await;
    let response =
        handle_approval_link(store.as_ref(), &link(proposal.id, "reject", None), now()).await;

    assert_eq!(response.status, 200);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Approved);
    assert_eq!(saved.chosen_option_index, Some(0));
}

#[tokio::test]
async fn reject_link_needs_no_option() {
    let (store, proposal) = sent_proposal().await;
    let response =
        handle_approval_link(store.as_ref(), &link(proposal.id, "rejected", None), now()).await;

    assert_eq!(response.status, 200);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Rejected);
}

#[tokio::test]
async fn concurrent_decisions_record_only_the_first() {
    let (store, proposal) = sent_proposal().await;
    let racy = YieldingStore {
        inner: store.clone(),
    };

    let (first, second) = tokio::join!(
        record_approval(
            &racy,
            proposal.id,
            Decision::Approved,
            Some(0),
            DecisionSource::ExternalLink,
            now()
        ),
        record_approval(
            &racy,
            proposal.id,
            Decision::Approved,
            Some(2),
            DecisionSource::InApp,
            now()
        ),
    );

    assert_eq!(first.unwrap(), DecisionOutcome::Recorded);
    assert_eq!(second.unwrap(), DecisionOutcome::AlreadyDecided);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.chosen_option_index, Some(0));
    assert_eq!(saved.decided_by, Some(DecisionSource::ExternalLink));
    assert_eq!(saved.history.len(), 2);
}

#[tokio::test]
async fn malformed_links_are_bad_requests() {
    let (store, proposal) = sent_proposal().await;
    let id = proposal.id;

    for query in [
        String::new(),
        "?decision=approve&option=0".to_string(),
        "?token=not-a-uuid&decision=approve&option=0".to_string(),
        format!("?token={id}&option=0"),
        format!("?token={id}&decision=maybe&option=0"),
        format!("?token={id}&decision=approve&option=first"),
    ] {
        let response = handle_approval_link(store.as_ref(), &query, now()).await;
        assert_eq!(response.status, 400, "query {query:?}");
        assert_eq!(response.body, LINK_INVALID);
    }

    let saved = store.get_proposal(id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Sent);
}

#[tokio::test]
async fn approve_link_without_valid_option_is_rejected() {
    let (store, proposal) = sent_proposal().await;

    let missing =
        handle_approval_link(store.as_ref(), &link(proposal.id, "approve", None), now()).await;
    let out_of_range =
        handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(9)), now()).await;

    assert_eq!(missing.status, 400);
    assert_eq!(out_of_range.status, 400);
    assert_eq!(out_of_range.body, LINK_INVALID);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Sent);
}

#[tokio::test]
async fn unknown_token_is_not_found_with_generic_body() {
    let store = MemoryStore::new();
    let response = handle_approval_link(
        &store,
        &link(ProposalId::random(), "approve", Some(0)),
        now(),
    )
    .await;

    assert_eq!(response.status, 404);
    assert_eq!(response.body, LINK_INVALID);
}

// ── apply_approved_proposal ─────────────────────────────────────────────────

#[tokio::test]
async fn approved_proposal_is_written_back_once() {
    let (store, proposal) = sent_proposal().await;
    let calendar = CountingCalendar {
        inner: store.clone(),
        writes: AtomicUsize::new(0),
    };
    handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(1)), now()).await;

    let first = apply_approved_proposal(&calendar, store.as_ref(), USER, proposal.id, now())
        .await
        .unwrap();
    let second = apply_approved_proposal(&calendar, store.as_ref(), USER, proposal.id, now())
        .await
        .unwrap();

    assert_eq!(first, ApplyOutcome::Applied);
    assert_eq!(second, ApplyOutcome::AlreadyApplied);
    assert_eq!(calendar.writes.load(Ordering::SeqCst), 1);

    let event = store.event(USER, "evt-1").unwrap().unwrap();
    assert_eq!(event.start_at, proposal.options[1].start_at);
    assert_eq!(event.end_at, proposal.options[1].end_at);

    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Applied);
    assert_eq!(saved.chosen_option_index, Some(1));
    assert!(saved.check_invariants());
}

#[tokio::test]
async fn concurrent_applies_write_the_calendar_once() {
    let (store, proposal) = sent_proposal().await;
    handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(1)), now()).await;
    let calendar = CountingCalendar {
        inner: store.clone(),
        writes: AtomicUsize::new(0),
    };
    let racy = YieldingStore {
        inner: store.clone(),
    };

    let (first, second) = tokio::join!(
        apply_approved_proposal(&calendar, &racy, USER, proposal.id, now()),
        apply_approved_proposal(&calendar, &racy, USER, proposal.id, now()),
    );

    assert_eq!(first.unwrap(), ApplyOutcome::Applied);
    assert_eq!(second.unwrap(), ApplyOutcome::AlreadyApplied);
    assert_eq!(calendar.writes.load(Ordering::SeqCst), 1);
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Applied);
}

#[tokio::test]
async fn failed_calendar_write_leaves_the_proposal_approved() {
    let (store, proposal) = sent_proposal().await;
    handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(1)), now()).await;

    // A calendar that does not know the event refuses the write.
    let empty_calendar = MemoryStore::new();
    let err = apply_approved_proposal(&empty_calendar, store.as_ref(), USER, proposal.id, now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EventNotFound(_)));
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Approved);
    assert_eq!(saved.applied_at, None);

    let retried = apply_approved_proposal(store.as_ref(), store.as_ref(), USER, proposal.id, now())
        .await
        .unwrap();
    assert_eq!(retried, ApplyOutcome::Applied);
    let event = store.event(USER, "evt-1").unwrap().unwrap();
    assert_eq!(event.start_at, proposal.options[1].start_at);
}

#[tokio::test]
async fn apply_requires_an_approved_proposal() {
    let (store, proposal) = sent_proposal().await;

    let err = apply_approved_proposal(store.as_ref(), store.as_ref(), USER, proposal.id, now())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: ProposalStatus::Sent,
            to: ProposalStatus::Applied
        }
    ));
    let event = store.event(USER, "evt-1").unwrap().unwrap();
    assert_eq!(event.start_at, flexible_event().start_at);
}

#[tokio::test]
async fn rejected_proposal_cannot_be_applied() {
    let (store, proposal) = sent_proposal().await;
    handle_approval_link(store.as_ref(), &link(proposal.id, "reject", None), now()).await;

    let err = apply_approved_proposal(store.as_ref(), store.as_ref(), USER, proposal.id, now())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn apply_hides_proposals_of_other_users() {
    let (store, proposal) = sent_proposal().await;
    handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(0)), now()).await;

    let err = apply_approved_proposal(
        store.as_ref(),
        store.as_ref(),
        "someone-else",
        proposal.id,
        now(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EngineError::ProposalNotFound(_)));
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Approved);
}

// ── expire_stale_proposals ──────────────────────────────────────────────────

#[tokio::test]
async fn sweep_expires_only_overdue_sent_proposals() {
    let (store, proposal) = sent_proposal().await;

    let early = expire_stale_proposals(store.as_ref(), USER, now() + Duration::hours(47))
        .await
        .unwrap();
    assert!(early.is_empty());

    let late = expire_stale_proposals(store.as_ref(), USER, now() + Duration::hours(48))
        .await
        .unwrap();
    assert_eq!(late, vec![proposal.id]);

    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Expired);

    let again = expire_stale_proposals(store.as_ref(), USER, now() + Duration::hours(72))
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn sweep_leaves_decided_proposals_alone() {
    let (store, proposal) = sent_proposal().await;
    handle_approval_link(store.as_ref(), &link(proposal.id, "approve", Some(0)), now()).await;

    let expired = expire_stale_proposals(store.as_ref(), USER, now() + Duration::days(5))
        .await
        .unwrap();

    assert!(expired.is_empty());
    let saved = store.get_proposal(proposal.id).await.unwrap().unwrap();
    assert_eq!(saved.status, ProposalStatus::Approved);
}
