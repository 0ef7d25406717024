use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::{Minutes, Span, WallTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn of(date: NaiveDate) -> Self {
        date.weekday().into()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minutes since the Unix epoch, read as local wall-clock time.
pub fn absolute_minutes(at: NaiveDateTime) -> Minutes {
    at.and_utc().timestamp().div_euclid(60)
}

/// Minutes since midnight of `at`.
pub fn minute_of_day(at: NaiveDateTime) -> Minutes {
    (at.hour() * 60 + at.minute()) as Minutes
}

/// `date` at wall-clock `time`.
pub fn at_wall_time(date: NaiveDate, time: WallTime) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(time.minutes())
}

/// A recurring weekly window. Always same-day: `start_time < end_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTimeSlot {
    pub day: DayOfWeek,
    pub start_time: WallTime,
    pub end_time: WallTime,
}

impl WeeklyTimeSlot {
    pub fn new(day: DayOfWeek, start_time: WallTime, end_time: WallTime) -> Self {
        Self { day, start_time, end_time }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_time < self.end_time
    }

    pub fn span(&self) -> Span {
        Span::new(self.start_time.minutes(), self.end_time.minutes())
    }
}

impl fmt::Display for WeeklyTimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.day, self.start_time, self.end_time)
    }
}

/// Ad-hoc override of the weekly pattern. Carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityException {
    pub date: NaiveDate,
    pub start_time: Option<WallTime>,
    pub end_time: Option<WallTime>,
    pub available: bool,
    pub reason: Option<String>,
}

/// One record per tutor; its store id is the tutor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub tutor_id: Ulid,
    pub time_slots: Vec<WeeklyTimeSlot>,
    pub exceptions: Vec<AvailabilityException>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassStatus {
    Active,
    Full,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: Ulid,
    pub tutor_id: Ulid,
    pub code: String,
    pub name: String,
    pub day: DayOfWeek,
    pub start_time: WallTime,
    pub end_time: WallTime,
    /// Meeting length in minutes, always `end_time - start_time`.
    pub duration: u32,
    pub max_students: u32,
    /// Denormalized count of ACTIVE enrollments. Only changed through
    /// `engine::capacity::apply_enrollment_delta`.
    pub current_enrollment: u32,
    pub status: ClassStatus,
    pub semester_start: NaiveDate,
    pub semester_end: NaiveDate,
    pub created_at: NaiveDateTime,
}

impl Class {
    pub fn weekly_slot(&self) -> WeeklyTimeSlot {
        WeeklyTimeSlot::new(self.day, self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status != ClassStatus::Inactive
    }

    /// Dates this class meets on, first to last.
    pub fn meeting_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.semester_start
            .iter_days()
            .take_while(|d| *d <= self.semester_end)
            .filter(|d| DayOfWeek::of(*d) == self.day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInput {
    pub code: String,
    pub name: String,
    pub day: DayOfWeek,
    pub start_time: WallTime,
    pub end_time: WallTime,
    pub max_students: u32,
    pub semester_start: NaiveDate,
    pub semester_end: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassUpdate {
    pub day: Option<DayOfWeek>,
    pub start_time: Option<WallTime>,
    pub end_time: Option<WallTime>,
    pub max_students: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Dropped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: Ulid,
    pub student_id: Ulid,
    pub class_id: Ulid,
    pub status: EnrollmentStatus,
    pub enrolled_at: NaiveDateTime,
    pub dropped_at: Option<NaiveDateTime>,
}

impl Enrollment {
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rescheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Ulid,
    pub student_ids: Vec<Ulid>,
    pub tutor_id: Ulid,
    /// Set for sessions generated from a class roster.
    pub class_id: Option<Ulid>,
    /// The class meeting a generated session stands for. Fixed at
    /// generation; rescheduling never changes it.
    #[serde(default)]
    pub occurrence: Option<NaiveDate>,
    pub title: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration: u32,
    pub status: SessionStatus,
    pub rescheduled_from: Option<NaiveDateTime>,
    pub cancelled_by: Option<Ulid>,
    pub cancel_reason: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Session {
    pub fn is_manual(&self) -> bool {
        self.class_id.is_none()
    }

    pub fn day(&self) -> DayOfWeek {
        DayOfWeek::of(self.start_time.date())
    }

    /// Absolute `[start, start + duration)` in epoch minutes.
    pub fn span(&self) -> Span {
        let start = absolute_minutes(self.start_time);
        Span::new(start, start + self.duration as Minutes)
    }

    /// Time-of-day window on [`Session::day`].
    pub fn day_span(&self) -> Span {
        let start = minute_of_day(self.start_time);
        Span::new(start, start + self.duration as Minutes)
    }

    pub fn involves(&self, user_id: Ulid) -> bool {
        self.tutor_id == user_id || self.student_ids.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    pub tutor_id: Ulid,
    /// Required when a tutor books on a student's behalf; a student
    /// requester always books for themselves.
    pub student_id: Option<Ulid>,
    pub start_time: NaiveDateTime,
    /// Minutes; the engine default applies when absent.
    pub duration: Option<u32>,
    pub title: Option<String>,
}

/// A discrete bookable start/end pair on a concrete date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookableSlot {
    pub date: NaiveDate,
    pub start_time: WallTime,
    pub end_time: WallTime,
}

/// A schedule target named by a prefixed id (`class_<ULID>`, `session_<ULID>`).
/// Resolved once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Class(Ulid),
    Session(Ulid),
    Unknown(String),
}

impl EntityRef {
    pub fn parse(raw: &str) -> Self {
        let parsed = if let Some(rest) = raw.strip_prefix("class_") {
            Ulid::from_string(rest).ok().map(EntityRef::Class)
        } else if let Some(rest) = raw.strip_prefix("session_") {
            Ulid::from_string(rest).ok().map(EntityRef::Session)
        } else {
            None
        };
        parsed.unwrap_or_else(|| EntityRef::Unknown(raw.to_string()))
    }
}

impl FromStr for EntityRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Class(id) => write!(f, "class_{id}"),
            EntityRef::Session(id) => write!(f, "session_{id}"),
            EntityRef::Unknown(raw) => f.write_str(raw),
        }
    }
}
