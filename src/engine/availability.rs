use crate::model::*;
use crate::time::{Minutes, Span, WallTime};

// ── Effective availability ────────────────────────────────────────

/// Declared weekly slots minus the time held by active same-day classes.
///
/// Each slot is walked left to right against its overlapping classes
/// (sorted by start, stable), emitting the gaps. A slot no class touches
/// comes out unchanged; a fully covered slot comes out as nothing.
pub fn resolve_effective_slots(declared: &[WeeklyTimeSlot], classes: &[Class]) -> Vec<WeeklyTimeSlot> {
    let active: Vec<&Class> = classes.iter().filter(|c| c.is_active()).collect();
    if active.is_empty() {
        return declared.to_vec();
    }

    let mut effective = Vec::with_capacity(declared.len());
    for slot in declared {
        let bounds = slot.span();
        let mut occupied: Vec<Span> = active
            .iter()
            .filter(|c| c.day == slot.day)
            .map(|c| c.weekly_slot().span())
            .filter(|s| s.overlaps(&bounds))
            .collect();
        if occupied.is_empty() {
            effective.push(*slot);
            continue;
        }
        occupied.sort_by_key(|s| s.start);

        let mut cursor = bounds.start;
        for occ in &occupied {
            let gap_end = occ.start.min(bounds.end);
            if cursor < gap_end {
                effective.extend(sub_slot(slot.day, cursor, gap_end));
            }
            cursor = cursor.max(occ.end);
        }
        if cursor < bounds.end {
            effective.extend(sub_slot(slot.day, cursor, bounds.end));
        }
    }
    effective
}

fn sub_slot(day: DayOfWeek, start: Minutes, end: Minutes) -> Option<WeeklyTimeSlot> {
    Some(WeeklyTimeSlot::new(
        day,
        WallTime::from_minutes(start)?,
        WallTime::from_minutes(end)?,
    ))
}

// ── Declared-slot helpers ─────────────────────────────────────────

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// True if `window` lies inside the declared availability of its day.
/// Back-to-back declared slots count as one continuous window.
pub fn covers(declared: &[WeeklyTimeSlot], window: &WeeklyTimeSlot) -> bool {
    let mut same_day: Vec<Span> = declared
        .iter()
        .filter(|s| s.day == window.day)
        .map(WeeklyTimeSlot::span)
        .collect();
    same_day.sort_by_key(|s| s.start);
    let target = window.span();
    merge_overlapping(&same_day)
        .iter()
        .any(|s| s.contains_span(&target))
}

/// First pair of declared slots that overlap each other on the same day.
pub fn find_overlapping_pair(declared: &[WeeklyTimeSlot]) -> Option<(WeeklyTimeSlot, WeeklyTimeSlot)> {
    let mut sorted = declared.to_vec();
    sorted.sort_by_key(|s| (s.day, s.start_time));
    sorted
        .windows(2)
        .find(|w| w[0].day == w[1].day && w[0].span().overlaps(&w[1].span()))
        .map(|w| (w[0], w[1]))
}
