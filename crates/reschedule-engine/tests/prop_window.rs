//! Property-based tests for window arithmetic and planning using proptest.
//!
//! These check invariants that must hold for *any* busy list and window, not
//! just the hand-picked cases in `window_tests.rs` and `planner_tests.rs`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use reschedule_engine::event::CalendarEvent;
use reschedule_engine::planner::propose_reschedule;
use reschedule_engine::window::{clamp_within_window, find_free_slots, overlaps, TimeRange};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
}

/// A range starting within one week of the base, 0-480 minutes long.
/// Zero-length ranges are deliberately included.
fn arb_range() -> impl Strategy<Value = TimeRange> {
    (0i64..7 * 24 * 60, 0i64..=480).prop_map(|(offset, len)| {
        let start_at = base() + Duration::minutes(offset);
        TimeRange {
            start_at,
            end_at: start_at + Duration::minutes(len),
        }
    })
}

fn arb_busy() -> impl Strategy<Value = Vec<TimeRange>> {
    prop::collection::vec(arb_range(), 0..40)
}

fn arb_window() -> impl Strategy<Value = TimeRange> {
    (0i64..3 * 24 * 60, 60i64..=4 * 24 * 60).prop_map(|(offset, len)| {
        let start_at = base() + Duration::minutes(offset);
        TimeRange {
            start_at,
            end_at: start_at + Duration::minutes(len),
        }
    })
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Property 1: overlap is symmetric
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn overlap_is_symmetric(a in arb_range(), b in arb_range()) {
        prop_assert_eq!(overlaps(&a, &b), overlaps(&b, &a));
    }
}

// ---------------------------------------------------------------------------
// Property 2: returned slots never conflict with busy intervals
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn free_slots_never_overlap_busy(
        window in arb_window(),
        busy in arb_busy(),
        duration in 1i64..=240,
        step in 1i64..=60,
        max_slots in 0usize..=6,
    ) {
        let slots = find_free_slots(&window, &busy, duration, step, max_slots).unwrap();

        prop_assert!(slots.len() <= max_slots);
        for slot in &slots {
            prop_assert_eq!(slot.duration_minutes(), duration);
            prop_assert!(slot.start_at >= window.start_at);
            prop_assert!(slot.end_at <= window.end_at);
            for b in busy.iter().filter(|b| b.is_valid()) {
                prop_assert!(!overlaps(slot, b), "slot {:?} overlaps busy {:?}", slot, b);
            }
        }
        prop_assert!(slots.windows(2).all(|w| w[0].start_at < w[1].start_at));
    }
}

// ---------------------------------------------------------------------------
// Property 3: clamping stays inside both ranges
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn clamp_result_is_inside_window(candidate in arb_range(), window in arb_window()) {
        if let Some(clamped) = clamp_within_window(&candidate, &window) {
            prop_assert!(clamped.is_valid());
            prop_assert!(clamped.start_at >= window.start_at && clamped.end_at <= window.end_at);
            prop_assert!(clamped.start_at >= candidate.start_at && clamped.end_at <= candidate.end_at);
        } else {
            prop_assert!(!overlaps(&candidate, &window) || !candidate.is_valid());
        }
    }
}

// ---------------------------------------------------------------------------
// Property 4: planning is deterministic and scores strictly descend
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(config())]

    #[test]
    fn planning_is_deterministic_and_ranked(
        original in arb_range(),
        busy in arb_busy(),
        window in arb_window(),
    ) {
        let event = CalendarEvent::new("evt", original.start_at, original.end_at);

        let first = propose_reschedule(&event, &busy, &window).unwrap();
        let second = propose_reschedule(&event, &busy, &window).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert!(first.options.len() <= 3);
        prop_assert!(first.options.windows(2).all(|w| w[0].score > w[1].score));
        if let Some(top) = first.options.first() {
            prop_assert_eq!(top.score, 100);
        }
    }
}
