/// Weekly slots in one availability record.
pub const MAX_WEEKLY_SLOTS: usize = 7 * 24;

/// Exceptions carried on one availability record.
pub const MAX_EXCEPTIONS: usize = 366;

/// Seats in one class.
pub const MAX_STUDENTS_PER_CLASS: u32 = 500;

/// Longest bookable session, in minutes.
pub const MAX_SESSION_MINUTES: u32 = 12 * 60;

/// Furthest slot lookahead, in days.
pub const MAX_HORIZON_DAYS: u32 = 90;

/// Sessions produced by one roster generation.
pub const MAX_GENERATED_SESSIONS: usize = 500;

pub const MAX_CODE_LEN: usize = 32;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
