//! Consent-aware cleaners for the calendar event types.
//!
//! Provider payloads are mapped into one canonical content shape first, then
//! redacted according to the consent snapshot. Features are computed from the
//! unredacted data and never carry content.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::redact::redact_fields;
use super::{CleanParams, CleanedEvent, ConsentSnapshot, Privacy, Provider};
use crate::error::{EngineError, Result};
use crate::policy::{EventPolicy, LockState};

const CONTENT_FIELDS: &[&str] = &["title", "description", "location"];
const ATTENDEE_FIELDS: &[&str] = &["attendees.email", "attendees.name", "organizer"];
const APPROVER_FIELDS: &[&str] = &["policy.approver"];

// ── Provider payload shapes ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: Option<String>,
    start: Option<GoogleTime>,
    end: Option<GoogleTime>,
    #[serde(default)]
    attendees: Vec<GoogleAttendee>,
    organizer: Option<GooglePerson>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTime {
    date_time: Option<DateTime<FixedOffset>>,
    date: Option<NaiveDate>,
    time_zone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAttendee {
    email: Option<String>,
    display_name: Option<String>,
    response_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GooglePerson {
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleEvent {
    #[serde(alias = "id")]
    identifier: Option<String>,
    title: Option<String>,
    notes: Option<String>,
    location: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    is_all_day: bool,
    time_zone: Option<String>,
    #[serde(default)]
    attendees: Vec<AppleParticipant>,
    organizer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppleParticipant {
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualEvent {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    all_day: bool,
    timezone: Option<String>,
    #[serde(default)]
    attendees: Vec<String>,
    organizer: Option<String>,
}

// ── Canonical shape ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    all_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attendees: Vec<Attendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organizer: Option<String>,
}

struct Normalized {
    provider_event_id: Option<String>,
    status: Option<String>,
    content: CanonicalContent,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn google_instant(time: Option<&GoogleTime>, field: &'static str) -> Result<(DateTime<Utc>, bool)> {
    let time = time.ok_or(EngineError::MissingField(field))?;
    if let Some(dt) = time.date_time {
        return Ok((dt.with_timezone(&Utc), false));
    }
    let date = time.date.ok_or(EngineError::MissingField(field))?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or(EngineError::MissingField(field))?;
    Ok((midnight.and_utc(), true))
}

fn from_google(payload: &Value) -> Result<Normalized> {
    let raw: GoogleEvent = serde_json::from_value(payload.clone())?;
    let (start_at, all_day) = google_instant(raw.start.as_ref(), "start")?;
    let (end_at, _) = google_instant(raw.end.as_ref(), "end")?;
    let timezone = raw.start.as_ref().and_then(|t| t.time_zone.clone());

    Ok(Normalized {
        provider_event_id: raw.id,
        status: raw.status,
        content: CanonicalContent {
            title: non_empty(raw.summary),
            description: non_empty(raw.description),
            location: non_empty(raw.location),
            start_at,
            end_at,
            all_day,
            timezone,
            attendees: raw
                .attendees
                .into_iter()
                .map(|a| Attendee {
                    email: non_empty(a.email),
                    name: non_empty(a.display_name),
                    response_status: a.response_status,
                })
                .collect(),
            organizer: raw.organizer.and_then(|o| non_empty(o.email)),
        },
    })
}

fn from_apple(payload: &Value) -> Result<Normalized> {
    let raw: AppleEvent = serde_json::from_value(payload.clone())?;
    Ok(Normalized {
        provider_event_id: raw.identifier,
        status: None,
        content: CanonicalContent {
            title: non_empty(raw.title),
            description: non_empty(raw.notes),
            location: non_empty(raw.location),
            start_at: raw.start_date.ok_or(EngineError::MissingField("startDate"))?,
            end_at: raw.end_date.ok_or(EngineError::MissingField("endDate"))?,
            all_day: raw.is_all_day,
            timezone: raw.time_zone,
            attendees: raw
                .attendees
                .into_iter()
                .map(|p| Attendee {
                    email: non_empty(p.email),
                    name: non_empty(p.name),
                    response_status: None,
                })
                .collect(),
            organizer: non_empty(raw.organizer),
        },
    })
}

fn from_manual(payload: &Value) -> Result<Normalized> {
    let raw: ManualEvent = serde_json::from_value(payload.clone())?;
    Ok(Normalized {
        provider_event_id: raw.id,
        status: None,
        content: CanonicalContent {
            title: non_empty(raw.title),
            description: non_empty(raw.description),
            location: non_empty(raw.location),
            start_at: raw.start_at.ok_or(EngineError::MissingField("startAt"))?,
            end_at: raw.end_at.ok_or(EngineError::MissingField("endAt"))?,
            all_day: raw.all_day,
            timezone: raw.timezone,
            attendees: raw
                .attendees
                .into_iter()
                .map(|email| Attendee {
                    email: non_empty(Some(email)),
                    name: None,
                    response_status: None,
                })
                .collect(),
            organizer: non_empty(raw.organizer),
        },
    })
}

/// Patterns to strip for the scopes the user has not granted.
fn denied_patterns(consent: &ConsentSnapshot, attendee_fields: &'static [&'static str]) -> Vec<&'static str> {
    let mut patterns = Vec::new();
    if !consent.calendar_content {
        patterns.extend_from_slice(CONTENT_FIELDS);
    }
    if !consent.attendee_details {
        patterns.extend_from_slice(attendee_fields);
    }
    patterns
}

fn apply_consent(
    content: &Value,
    consent: &ConsentSnapshot,
    attendee_fields: &'static [&'static str],
) -> (Value, Privacy) {
    let patterns = denied_patterns(consent, attendee_fields);
    let (content, redactions) = redact_fields(content, &patterns);
    let privacy = Privacy {
        consent: consent.scopes(),
        redactions,
    };
    (content, privacy)
}

/// `calendar.event.upserted`: map, compute features, then redact.
pub fn clean_calendar_upserted(params: &CleanParams) -> Result<CleanedEvent> {
    let normalized = match params.source.provider {
        Provider::Google => from_google(&params.payload)?,
        Provider::Apple => from_apple(&params.payload)?,
        Provider::Manual | Provider::Unknown => from_manual(&params.payload)?,
    };

    let content = &normalized.content;
    let features = json!({
        "durationMinutes": (content.end_at - content.start_at).num_minutes(),
        "attendeeCount": content.attendees.len(),
        "allDay": content.all_day,
    });

    let mut entities = Map::new();
    if let Some(id) = &normalized.provider_event_id {
        entities.insert("calendarEventId".to_string(), json!(id));
    }
    if let Some(status) = &normalized.status {
        entities.insert("status".to_string(), json!(status));
    }

    let raw_content = serde_json::to_value(content)?;
    let (content, privacy) = apply_consent(&raw_content, &params.consent, ATTENDEE_FIELDS);

    Ok(params.envelope(Value::Object(entities), content, privacy, features))
}

/// `calendar.event.deleted`: identifiers only, no content to redact.
pub fn clean_calendar_deleted(params: &CleanParams) -> Result<CleanedEvent> {
    let id = params
        .payload
        .get("id")
        .or_else(|| params.payload.get("identifier"))
        .and_then(Value::as_str)
        .ok_or(EngineError::MissingField("id"))?;

    let privacy = Privacy {
        consent: params.consent.scopes(),
        redactions: Vec::new(),
    };
    Ok(params.envelope(
        json!({ "calendarEventId": id }),
        json!({}),
        privacy,
        json!({ "deleted": true }),
    ))
}

/// `calendar.policy.updated`: validate the policy, redact approver contacts.
pub fn clean_calendar_policy_updated(params: &CleanParams) -> Result<CleanedEvent> {
    let event_id = params
        .payload
        .get("eventId")
        .and_then(Value::as_str)
        .ok_or(EngineError::MissingField("eventId"))?;
    let raw_policy = params
        .payload
        .get("policy")
        .ok_or(EngineError::MissingField("policy"))?;

    // Reject unknown lock states by name before serde flattens the message.
    let lock_state = raw_policy
        .get("lockState")
        .and_then(Value::as_str)
        .ok_or(EngineError::MissingField("lockState"))?;
    LockState::from_str(lock_state)?;

    let policy: EventPolicy = serde_json::from_value(raw_policy.clone())?;
    let features = json!({
        "lockState": policy.lock_state,
        "requiresApprover": policy.requires_approver(),
    });

    let raw_content = json!({ "policy": policy });
    let (content, privacy) = apply_consent(&raw_content, &params.consent, APPROVER_FIELDS);

    Ok(params.envelope(
        json!({ "calendarEventId": event_id }),
        content,
        privacy,
        features,
    ))
}
