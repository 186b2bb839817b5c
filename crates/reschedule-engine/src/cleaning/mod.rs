//! Event cleaning: raw provider payloads into the versioned canonical record.
//!
//! Dispatch goes through an explicit [`CleanerRegistry`]. Registered types get
//! a consent-aware cleaner. Unregistered `calendar.*` types are rejected so a
//! new calendar type can never bypass redaction. Anything else is passed
//! through verbatim with empty consent and redactions.

mod calendar;
mod redact;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, Result};

pub use calendar::{
    clean_calendar_deleted, clean_calendar_policy_updated, clean_calendar_upserted,
};
pub use redact::redact_fields;

pub const CLEAN_VERSION: &str = "1";

/// Prefix of every event type owned by the calendar domain.
pub const CALENDAR_PREFIX: &str = "calendar.";

pub const CALENDAR_EVENT_UPSERTED: &str = "calendar.event.upserted";
pub const CALENDAR_EVENT_DELETED: &str = "calendar.event.deleted";
pub const CALENDAR_POLICY_UPDATED: &str = "calendar.policy.updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Apple,
    Manual,
    #[serde(other)]
    Unknown,
}

/// Consent scopes granted by the user at ingestion time.
///
/// Absent scopes are denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentSnapshot {
    /// Titles, descriptions and locations.
    #[serde(default)]
    pub calendar_content: bool,
    /// Attendee and organizer identities, approver contacts.
    #[serde(default)]
    pub attendee_details: bool,
}

impl ConsentSnapshot {
    pub fn all_granted() -> Self {
        Self {
            calendar_content: true,
            attendee_details: true,
        }
    }

    /// Scope map recorded in `privacy.consent`.
    pub fn scopes(&self) -> BTreeMap<String, bool> {
        BTreeMap::from([
            ("attendeeDetails".to_string(), self.attendee_details),
            ("calendarContent".to_string(), self.calendar_content),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub clerk_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub system: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub occurred_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Privacy {
    pub consent: BTreeMap<String, bool>,
    /// Content fields omitted for lack of consent.
    pub redactions: Vec<String>,
}

/// Canonical, privacy-filtered event record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedEvent {
    pub clean_version: String,
    pub tenant: Tenant,
    pub source: Source,
    pub event: EventMeta,
    pub entities: Value,
    pub content: Value,
    pub privacy: Privacy,
    pub features: Value,
}

/// Input to a cleaner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanParams {
    pub clerk_user_id: String,
    pub event_type: String,
    pub event_id: String,
    pub occurred_at_ms: i64,
    pub source: Source,
    pub payload: Value,
    #[serde(default)]
    pub consent: ConsentSnapshot,
}

impl CleanParams {
    fn envelope(&self, entities: Value, content: Value, privacy: Privacy, features: Value) -> CleanedEvent {
        CleanedEvent {
            clean_version: CLEAN_VERSION.to_string(),
            tenant: Tenant {
                clerk_user_id: self.clerk_user_id.clone(),
            },
            source: self.source.clone(),
            event: EventMeta {
                id: self.event_id.clone(),
                event_type: self.event_type.clone(),
                occurred_at_ms: self.occurred_at_ms,
            },
            entities,
            content,
            privacy,
            features,
        }
    }
}

pub type Cleaner = fn(&CleanParams) -> Result<CleanedEvent>;

/// Explicit event-type to cleaner mapping.
#[derive(Debug, Clone)]
pub struct CleanerRegistry {
    cleaners: BTreeMap<String, Cleaner>,
}

impl Default for CleanerRegistry {
    fn default() -> Self {
        Self::new()
            .register(CALENDAR_EVENT_UPSERTED, clean_calendar_upserted)
            .register(CALENDAR_EVENT_DELETED, clean_calendar_deleted)
            .register(CALENDAR_POLICY_UPDATED, clean_calendar_policy_updated)
    }
}

impl CleanerRegistry {
    /// A registry with no cleaners at all.
    pub fn new() -> Self {
        Self {
            cleaners: BTreeMap::new(),
        }
    }

    pub fn register(mut self, event_type: &str, cleaner: Cleaner) -> Self {
        self.cleaners.insert(event_type.to_string(), cleaner);
        self
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.cleaners.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.cleaners.keys().map(String::as_str)
    }

    /// Clean one raw event.
    ///
    /// # Errors
    /// `UnregisteredEventType` for calendar-domain types without a cleaner,
    /// plus whatever the selected cleaner rejects.
    pub fn clean(&self, params: &CleanParams) -> Result<CleanedEvent> {
        if let Some(cleaner) = self.cleaners.get(&params.event_type) {
            return cleaner(params);
        }
        if params.event_type.starts_with(CALENDAR_PREFIX) {
            return Err(EngineError::UnregisteredEventType(params.event_type.clone()));
        }
        Ok(passthrough(params))
    }
}

/// Clean with the default registry.
pub fn clean_event_v1(params: &CleanParams) -> Result<CleanedEvent> {
    CleanerRegistry::default().clean(params)
}

fn passthrough(params: &CleanParams) -> CleanedEvent {
    params.envelope(
        json!({}),
        params.payload.clone(),
        Privacy::default(),
        json!({}),
    )
}
