use chrono::{Duration, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;
use crate::time::{overlaps, Minutes, Span};

use super::availability::covers;
use super::error::Conflict;

/// Session length assumed when a record carries none.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

// ── The two predicate shapes ─────────────────────────────────────

/// Weekly form: different days never clash; same day compares in-day minutes.
pub fn weekly_conflict(day_a: DayOfWeek, a: Span, day_b: DayOfWeek, b: Span) -> bool {
    day_a == day_b && overlaps(a.start, a.end, b.start, b.end)
}

/// Timestamp form: compares `[start, start + duration)` on the absolute timeline.
pub fn timestamp_conflict(
    start_a: NaiveDateTime,
    duration_a: Option<u32>,
    start_b: NaiveDateTime,
    duration_b: Option<u32>,
) -> bool {
    let span = |start: NaiveDateTime, duration: Option<u32>| {
        let s = absolute_minutes(start);
        (s, s + duration.unwrap_or(DEFAULT_DURATION_MINUTES) as Minutes)
    };
    let (sa, ea) = span(start_a, duration_a);
    let (sb, eb) = span(start_b, duration_b);
    overlaps(sa, ea, sb, eb)
}

pub fn session_end(start: NaiveDateTime, duration: u32) -> NaiveDateTime {
    start + Duration::minutes(duration as i64)
}

// ── Policy checks ────────────────────────────────────────────────

/// A class window must sit inside the tutor's declared hours for its day.
pub(crate) fn check_within_availability(
    declared: &[WeeklyTimeSlot],
    window: &WeeklyTimeSlot,
) -> Result<(), Conflict> {
    if covers(declared, window) {
        Ok(())
    } else {
        Err(Conflict::OutsideAvailability { window: *window })
    }
}

/// A weekly window against a set of classes. INACTIVE classes and
/// `ignore` (the class being edited) are skipped.
pub(crate) fn check_class_overlap(
    window: &WeeklyTimeSlot,
    classes: &[Class],
    ignore: Option<Ulid>,
) -> Result<(), Conflict> {
    for class in classes {
        if !class.is_active() || Some(class.id) == ignore {
            continue;
        }
        let existing = class.weekly_slot();
        if weekly_conflict(window.day, window.span(), existing.day, existing.span()) {
            return Err(Conflict::ClassOverlap {
                class_id: class.id,
                code: class.code.clone(),
                window: existing,
            });
        }
    }
    Ok(())
}

/// A candidate class against the classes behind a student's other
/// ACTIVE enrollments.
pub(crate) fn check_enrollment_clash(candidate: &Class, enrolled: &[Class]) -> Result<(), Conflict> {
    let window = candidate.weekly_slot();
    for class in enrolled.iter().filter(|c| c.id != candidate.id) {
        let existing = class.weekly_slot();
        if weekly_conflict(window.day, window.span(), existing.day, existing.span()) {
            return Err(Conflict::ClassOverlap {
                class_id: class.id,
                code: class.code.clone(),
                window: existing,
            });
        }
    }
    Ok(())
}

/// A dated session against a tutor's recurring classes, by weekday.
pub(crate) fn check_session_against_classes(
    start: NaiveDateTime,
    duration: u32,
    classes: &[Class],
) -> Result<(), Conflict> {
    let day = DayOfWeek::of(start.date());
    let from = minute_of_day(start);
    let candidate = Span::new(from, from + duration as Minutes);
    for class in classes.iter().filter(|c| c.is_active()) {
        let existing = class.weekly_slot();
        if weekly_conflict(day, candidate, existing.day, existing.span()) {
            return Err(Conflict::ClassOverlap {
                class_id: class.id,
                code: class.code.clone(),
                window: existing,
            });
        }
    }
    Ok(())
}

/// A dated session against other manual sessions. Class-based and
/// CANCELLED sessions never block; `ignore` skips the session being moved.
pub(crate) fn check_session_against_sessions(
    start: NaiveDateTime,
    duration: u32,
    sessions: &[Session],
    ignore: Option<Ulid>,
) -> Result<(), Conflict> {
    for existing in sessions {
        if !existing.is_manual()
            || existing.status == SessionStatus::Cancelled
            || Some(existing.id) == ignore
        {
            continue;
        }
        if timestamp_conflict(start, Some(duration), existing.start_time, Some(existing.duration)) {
            return Err(Conflict::SessionOverlap {
                session_id: existing.id,
                start: existing.start_time,
                end: existing.end_time,
            });
        }
    }
    Ok(())
}
