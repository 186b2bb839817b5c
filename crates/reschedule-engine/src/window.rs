//! Time-window arithmetic: interval overlap, clamping and free-slot search.
//!
//! All intervals are half-open (`[start, end)`). Two ranges that merely touch,
//! where one ends exactly when the other starts, do NOT overlap.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Scan step used when the caller does not configure one.
pub const DEFAULT_STEP_MINUTES: i64 = 15;

/// Maximum number of candidate slots returned by default.
pub const DEFAULT_MAX_SLOTS: usize = 3;

/// A span of time on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting zero or negative durations.
    pub fn new(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Result<Self> {
        let range = Self { start_at, end_at };
        if !range.is_valid() {
            return Err(EngineError::InvalidRange {
                start: start_at,
                end: end_at,
            });
        }
        Ok(range)
    }

    /// `end_at > start_at`.
    pub fn is_valid(&self) -> bool {
        self.end_at > self.start_at
    }

    pub fn duration(&self) -> Duration {
        self.end_at - self.start_at
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }
}

/// True iff `a` and `b` share at least one instant.
///
/// `a.start < b.end && b.start < a.end`; adjacent ranges are not overlapping.
pub fn overlaps(a: &TimeRange, b: &TimeRange) -> bool {
    a.start_at < b.end_at && b.start_at < a.end_at
}

/// Intersect `candidate` with `window`.
///
/// Returns `None` when the intersection is empty or degenerate.
pub fn clamp_within_window(candidate: &TimeRange, window: &TimeRange) -> Option<TimeRange> {
    let clamped = TimeRange {
        start_at: candidate.start_at.max(window.start_at),
        end_at: candidate.end_at.min(window.end_at),
    };
    clamped.is_valid().then_some(clamped)
}

/// Greedy first-fit scan for conflict-free slots.
///
/// Starting at `window.start_at`, candidate slots of `duration_minutes` are
/// tested every `step_minutes` against every busy interval. The scan stops
/// once `max_slots` slots are found or the next slot would end after
/// `window.end_at`. Output is sorted by ascending start time.
///
/// Degenerate windows and degenerate busy entries are treated as no-ops.
/// Overlapping or duplicate busy intervals are tolerated.
///
/// # Errors
/// Returns `EngineError::InvalidDuration` if `duration_minutes` is not positive
/// or not representable, and `EngineError::InvalidStep` likewise for
/// `step_minutes`.
pub fn find_free_slots(
    window: &TimeRange,
    busy: &[TimeRange],
    duration_minutes: i64,
    step_minutes: i64,
    max_slots: usize,
) -> Result<Vec<TimeRange>> {
    let duration = Some(duration_minutes)
        .filter(|m| *m > 0)
        .and_then(Duration::try_minutes)
        .ok_or(EngineError::InvalidDuration(duration_minutes))?;
    let step = Some(step_minutes)
        .filter(|m| *m > 0)
        .and_then(Duration::try_minutes)
        .ok_or(EngineError::InvalidStep(step_minutes))?;

    let mut slots = Vec::new();
    if !window.is_valid() || max_slots == 0 {
        return Ok(slots);
    }

    let busy: Vec<&TimeRange> = busy.iter().filter(|b| b.is_valid()).collect();

    let mut cursor = window.start_at;
    while slots.len() < max_slots {
        let Some(end_at) = cursor.checked_add_signed(duration) else {
            break;
        };
        if end_at > window.end_at {
            break;
        }

        let candidate = TimeRange {
            start_at: cursor,
            end_at,
        };
        if !busy.iter().any(|b| overlaps(&candidate, b)) {
            slots.push(candidate);
        }

        match cursor.checked_add_signed(step) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    Ok(slots)
}
