use chrono::NaiveDate;

use crate::model::*;
use crate::time::{Minutes, WallTime};

/// Lazy walk over the bookable slots of a date window.
///
/// Dates are visited in order, and within a date the weekly slots matching
/// its weekday in start order. Every candidate is `duration` long and lies
/// fully inside its slot. Nothing is cached: build a new one to restart or
/// to change the duration.
#[derive(Debug, Clone)]
pub struct BookableSlots {
    slots: Vec<WeeklyTimeSlot>,
    duration: Minutes,
    date: NaiveDate,
    days_left: u32,
    slot_idx: usize,
    next_start: Option<Minutes>,
}

impl BookableSlots {
    pub fn new(slots: &[WeeklyTimeSlot], duration: Minutes, from: NaiveDate, days: u32) -> Self {
        let mut slots = slots.to_vec();
        slots.sort_by_key(|s| s.start_time);
        Self {
            slots,
            duration,
            date: from,
            days_left: if duration > 0 { days } else { 0 },
            slot_idx: 0,
            next_start: None,
        }
    }

    fn advance_day(&mut self) {
        self.days_left -= 1;
        self.slot_idx = 0;
        self.next_start = None;
        match self.date.succ_opt() {
            Some(next) => self.date = next,
            None => self.days_left = 0,
        }
    }
}

impl Iterator for BookableSlots {
    type Item = BookableSlot;

    fn next(&mut self) -> Option<BookableSlot> {
        while self.days_left > 0 {
            let day = DayOfWeek::of(self.date);
            while let Some(slot) = self.slots.get(self.slot_idx) {
                if slot.day == day {
                    let span = slot.span();
                    let start = self.next_start.unwrap_or(span.start);
                    let end = start + self.duration;
                    if end <= span.end
                        && let (Some(start_time), Some(end_time)) =
                            (WallTime::from_minutes(start), WallTime::from_minutes(end))
                    {
                        self.next_start = Some(end);
                        return Some(BookableSlot {
                            date: self.date,
                            start_time,
                            end_time,
                        });
                    }
                }
                self.slot_idx += 1;
                self.next_start = None;
            }
            self.advance_day();
        }
        None
    }
}
