use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Minutes, the only time unit. Day offsets for weekly windows,
/// minutes since the Unix epoch for dated sessions.
pub type Minutes = i64;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time {0:?}: expected HH:MM")]
pub struct TimeError(pub String);

/// Parse `"HH:MM"` into minutes since midnight.
pub fn to_minutes(hhmm: &str) -> Result<Minutes, TimeError> {
    let err = || TimeError(hhmm.to_string());
    let (h, m) = hhmm.trim().split_once(':').ok_or_else(err)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(err());
    }
    let h: Minutes = h.parse().map_err(|_| err())?;
    let m: Minutes = m.parse().map_err(|_| err())?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return Err(err());
    }
    Ok(h * 60 + m)
}

/// Inverse of [`to_minutes`] for in-day offsets.
pub fn format_minutes(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// The conflict predicate shared by every check in the engine.
///
/// True when `a` starts inside `b`, ends inside `b`, or swallows `b`.
/// Touching endpoints (`end_a == start_b`) are back-to-back, not overlapping.
pub fn overlaps(start_a: Minutes, end_a: Minutes, start_b: Minutes, end_b: Minutes) -> bool {
    (start_a >= start_b && start_a < end_b)
        || (end_a > start_b && end_a <= end_b)
        || (start_a <= start_b && end_a >= end_b)
}

/// Interval `[start, end)` in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A wall-clock time of day, serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallTime(u16);

impl WallTime {
    pub fn from_minutes(minutes: Minutes) -> Option<Self> {
        (0..MINUTES_PER_DAY)
            .contains(&minutes)
            .then_some(Self(minutes as u16))
    }

    pub fn minutes(self) -> Minutes {
        self.0 as Minutes
    }
}

impl FromStr for WallTime {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        to_minutes(s).map(|m| Self(m as u16))
    }
}

impl TryFrom<String> for WallTime {
    type Error = TimeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WallTime> for String {
    fn from(t: WallTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_minutes(self.minutes()))
    }
}
