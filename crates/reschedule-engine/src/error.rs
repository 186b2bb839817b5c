//! Error types for reschedule-engine operations.
//!
//! Not every unhappy outcome is an error: an empty slot search is a valid
//! business result, and consent-denied content is redacted rather than
//! rejected. Everything here is either a caller bug (4xx family) or an
//! infrastructure failure (5xx family).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::proposal::ProposalStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid time range: {start} .. {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid slot duration: {0} minutes")]
    InvalidDuration(i64),

    #[error("Invalid scan step: {0} minutes")]
    InvalidStep(i64),

    #[error("Unknown lock state: {0}")]
    UnknownLockState(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Option index {index} out of range ({len} options)")]
    OptionOutOfRange { index: usize, len: usize },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("No cleaner registered for event type: {0}")]
    UnregisteredEventType(String),

    #[error("Invalid proposal transition: {from} -> {to}")]
    InvalidTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("Proposal has no options and cannot leave draft")]
    EmptyOptions,

    #[error("Event {0} already has an unresolved proposal")]
    DuplicateOpenProposal(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// True for caller bugs and bad input; these are never retried.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// HTTP status family an HTTP-facing wrapper should map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EventNotFound(_) | Self::ProposalNotFound(_) => 404,
            Self::InvalidTransition { .. } | Self::DuplicateOpenProposal(_) => 409,
            Self::Storage(_) | Self::Config(_) => 500,
            Self::Timeout(_) => 504,
            _ => 400,
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
