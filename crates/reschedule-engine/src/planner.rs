//! Reschedule planning: eligibility and ranked candidate slots.
//!
//! Planning is pure and synchronous. For identical `(event, busy, window)`
//! inputs the output is identical, options, order and explanation text
//! included, so the cron runner can retry freely.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::error::Result;
use crate::event::CalendarEvent;
use crate::policy::ContentSharing;
use crate::proposal::ProposalOption;
use crate::window::{clamp_within_window, find_free_slots, TimeRange};

const TOP_SCORE: i32 = 100;
const SCORE_DECAY: i32 = 5;

/// Output of a planning pass for a single event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedReschedule {
    pub rationale: String,
    /// Sorted by strictly descending score. May be empty.
    pub options: Vec<ProposalOption>,
}

impl PlannedReschedule {
    /// A plan with no options must not become a sendable proposal.
    pub fn is_actionable(&self) -> bool {
        !self.options.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Flexible and negotiable events may move; locked and sensitive never do.
    ///
    /// Events without a policy follow `missing_policy_is_flexible`.
    pub fn should_move(&self, event: &CalendarEvent) -> bool {
        match &event.policy {
            Some(policy) => policy.lock_state.is_movable(),
            None => self.config.missing_policy_is_flexible,
        }
    }

    /// Original duration in whole minutes, floored at `min_duration_minutes`.
    pub fn slot_duration_minutes(&self, event: &CalendarEvent) -> i64 {
        let millis = (event.end_at - event.start_at).num_milliseconds();
        // Half-up rounding to the nearest minute.
        let minutes = (millis + 30_000).div_euclid(60_000);
        minutes.max(self.config.min_duration_minutes)
    }

    /// Search `window` for conflict-free replacements and rank them.
    ///
    /// # Errors
    /// Propagates slot-search validation errors (non-positive step).
    pub fn propose(
        &self,
        event: &CalendarEvent,
        busy: &[TimeRange],
        window: &TimeRange,
    ) -> Result<PlannedReschedule> {
        let duration_minutes = self.slot_duration_minutes(event);

        let slots = match self.effective_window(event, window, duration_minutes) {
            Some(window) => find_free_slots(
                &window,
                busy,
                duration_minutes,
                self.config.step_minutes,
                self.config.max_slots,
            )?,
            None => Vec::new(),
        };

        let tz = event.tz().unwrap_or(Tz::UTC);
        let options: Vec<ProposalOption> = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| ProposalOption {
                start_at: slot.start_at,
                end_at: slot.end_at,
                score: score_for(index),
                explain: explain_option(index, event.start_at, slot, tz),
            })
            .collect();

        let rationale = rationale_for(event, options.len(), duration_minutes);

        Ok(PlannedReschedule { rationale, options })
    }

    /// Narrow the search window by the policy's shift bounds when enforced.
    ///
    /// A bound too large to represent around the original start cannot narrow
    /// anything, so the window is used as given.
    fn effective_window(
        &self,
        event: &CalendarEvent,
        window: &TimeRange,
        duration_minutes: i64,
    ) -> Option<TimeRange> {
        let bound = self
            .config
            .enforce_shift_bounds
            .then(|| event.policy.as_ref().and_then(|p| p.max_shift_bound_minutes()))
            .flatten();

        let Some(bound) = bound else {
            return Some(*window);
        };

        let allowed = Duration::try_minutes(bound).and_then(|reach| {
            let tail = reach.checked_add(&Duration::try_minutes(duration_minutes)?)?;
            Some(TimeRange {
                start_at: event.start_at.checked_sub_signed(reach)?,
                end_at: event.start_at.checked_add_signed(tail)?,
            })
        });

        match allowed {
            Some(allowed) => clamp_within_window(window, &allowed),
            None => Some(*window),
        }
    }
}

/// Eligibility with default settings: policy-absent events count as flexible.
pub fn should_move_event(event: &CalendarEvent) -> bool {
    Planner::default().should_move(event)
}

/// Plan with default settings: 15-minute step, at most 3 options.
pub fn propose_reschedule(
    event: &CalendarEvent,
    busy: &[TimeRange],
    window: &TimeRange,
) -> Result<PlannedReschedule> {
    Planner::default().propose(event, busy, window)
}

fn score_for(index: usize) -> i32 {
    let index = i32::try_from(index).unwrap_or(i32::MAX / SCORE_DECAY);
    TOP_SCORE - SCORE_DECAY * index
}

fn explain_option(index: usize, original: DateTime<Utc>, slot: &TimeRange, tz: Tz) -> String {
    let shift = (slot.start_at - original).num_minutes();
    let movement = match shift {
        0 => "keeps the original start time".to_string(),
        s if s > 0 => format!("starts {} later", describe_minutes(s)),
        s => format!("starts {} earlier", describe_minutes(-s)),
    };

    let original_day = original.with_timezone(&tz).date_naive();
    let slot_day = slot.start_at.with_timezone(&tz).date_naive();
    let day = if original_day == slot_day {
        "on the same day".to_string()
    } else {
        format!("on {}", slot_day.format("%a %b %-d"))
    };

    format!(
        "Option {}: {} {}, with no conflicts in your calendar.",
        index + 1,
        movement,
        day
    )
}

fn describe_minutes(minutes: i64) -> String {
    let days = minutes / (24 * 60);
    let hours = (minutes % (24 * 60)) / 60;
    let mins = minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if mins > 0 {
        parts.push(format!("{}min", mins));
    }
    parts.join(" ")
}

fn rationale_for(event: &CalendarEvent, option_count: usize, duration_minutes: i64) -> String {
    let sharing = event
        .policy
        .as_ref()
        .map(|p| p.content_sharing)
        .unwrap_or_default();

    let subject = match (sharing, event.title.as_deref()) {
        (ContentSharing::Full, Some(title)) if !title.trim().is_empty() => {
            format!("\"{}\"", title.trim())
        }
        _ => "This event".to_string(),
    };

    if option_count == 0 {
        return format!(
            "{} cannot be moved: no conflict-free {}-minute slot fits within the search window.",
            subject, duration_minutes
        );
    }

    format!(
        "{} can move to {} conflict-free {}-minute slot{} that avoid every existing commitment \
         and fit within the days of the search window.",
        subject,
        option_count,
        duration_minutes,
        if option_count == 1 { "" } else { "s" }
    )
}
