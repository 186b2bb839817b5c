//! # reschedule-engine
//!
//! Deterministic calendar rescheduling for assistant-driven calendars.
//!
//! The engine decides which events may move, searches a bounded window for
//! conflict-free replacement slots, ranks and explains them, and manages the
//! resulting proposal through approval and write-back. Incoming provider
//! events are normalized and consent-filtered before anything else sees them.
//!
//! ## Modules
//!
//! - [`window`]: interval overlap, clamping, greedy free-slot search
//! - [`policy`]: per-event scheduling permissions
//! - [`event`]: calendar events as stored
//! - [`planner`]: eligibility and ranked reschedule options
//! - [`proposal`]: proposal lifecycle state machine
//! - [`cleaning`]: provider payloads into canonical, redacted records
//! - [`orchestrator`]: per-user cron runner
//! - [`approval`]: decisions, write-back, expiry, approval links
//! - [`ingest`]: batch ingestion with idempotency keys
//! - [`store`]: storage ports and the in-memory store
//! - [`config`]: TOML configuration
//! - [`error`]: error types

pub mod approval;
pub mod cleaning;
pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod proposal;
pub mod store;
pub mod window;

pub use approval::{
    apply_approved_proposal, expire_stale_proposals, handle_approval_link, record_approval,
    LinkResponse,
};
pub use cleaning::{clean_event_v1, CleanParams, CleanedEvent, CleanerRegistry, ConsentSnapshot};
pub use config::EngineConfig;
pub use error::EngineError;
pub use event::CalendarEvent;
pub use ingest::{ingest_events_batch, RawEvent};
pub use orchestrator::{ConfirmOutcome, CronRunner, RunReport};
pub use planner::{propose_reschedule, should_move_event, PlannedReschedule, Planner};
pub use policy::{ContentSharing, EventPolicy, LockState};
pub use proposal::{ProposalOption, ProposalStatus, RescheduleProposal};
pub use store::{CalendarStore, EventLog, MemoryStore, ProposalStore};
pub use window::{clamp_within_window, find_free_slots, overlaps, TimeRange};
