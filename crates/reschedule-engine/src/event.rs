//! Calendar events as the storage layer hands them to the engine.
//!
//! The engine reads events and never mutates them directly. Time changes flow
//! through proposal application only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::policy::EventPolicy;
use crate::window::TimeRange;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// IANA timezone the event was created in (e.g. "Europe/Berlin").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<EventPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl CalendarEvent {
    /// A bare event with no policy, attendees or title.
    pub fn new(id: impl Into<String>, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: None,
            start_at,
            end_at,
            timezone: default_timezone(),
            policy: None,
            attendees: Vec::new(),
            organizer: None,
            visibility: None,
        }
    }

    pub fn with_policy(mut self, policy: EventPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// The event's raw interval; may be degenerate for malformed imports.
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start_at: self.start_at,
            end_at: self.end_at,
        }
    }

    /// Parse the event's timezone as an IANA identifier.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidTimezone` if the identifier is unknown.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|_| EngineError::InvalidTimezone(self.timezone.clone()))
    }
}
