use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::conflict::session_end;
use super::error::Conflict;

impl ClassStatus {
    /// Status implied by a counter. INACTIVE is sticky.
    pub fn after_capacity_change(self, current_enrollment: u32, max_students: u32) -> ClassStatus {
        match self {
            ClassStatus::Inactive => ClassStatus::Inactive,
            _ if current_enrollment >= max_students => ClassStatus::Full,
            _ => ClassStatus::Active,
        }
    }
}

/// The single place `current_enrollment` moves. The counter is floored at
/// zero and the status is re-derived in the same step.
pub fn apply_enrollment_delta(mut class: Class, delta: i64) -> Class {
    let next = (class.current_enrollment as i64 + delta).max(0);
    class.current_enrollment = u32::try_from(next).unwrap_or(u32::MAX);
    class.status = class
        .status
        .after_capacity_change(class.current_enrollment, class.max_students);
    class
}

/// Reset the counter to a recounted value and repair the status.
pub fn with_enrollment_count(class: Class, active: u32) -> Class {
    let delta = active as i64 - class.current_enrollment as i64;
    apply_enrollment_delta(class, delta)
}

/// Manual INACTIVE switch. Leaving INACTIVE re-derives ACTIVE/FULL.
pub fn set_active(mut class: Class, active: bool) -> Class {
    class.status = if active {
        ClassStatus::Active.after_capacity_change(class.current_enrollment, class.max_students)
    } else {
        ClassStatus::Inactive
    };
    class
}

// ── Enrollment transitions ───────────────────────────────────────

fn enrollment_label(status: EnrollmentStatus) -> String {
    format!("{status:?}").to_uppercase()
}

/// ACTIVE → DROPPED | CANCELLED. Both targets are terminal.
pub fn transition_enrollment(
    mut enrollment: Enrollment,
    to: EnrollmentStatus,
    at: NaiveDateTime,
) -> Result<Enrollment, Conflict> {
    if enrollment.status != EnrollmentStatus::Active || to == EnrollmentStatus::Active {
        return Err(Conflict::InvalidTransition {
            entity: "enrollment",
            from: enrollment_label(enrollment.status),
            to: enrollment_label(to),
        });
    }
    if to == EnrollmentStatus::Dropped {
        enrollment.dropped_at = Some(at);
    }
    enrollment.status = to;
    Ok(enrollment)
}

// ── Session transitions ──────────────────────────────────────────

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Rescheduled)
                | (Rescheduled, Cancelled)
                | (Rescheduled, Rescheduled)
        )
    }

    fn label(self) -> String {
        format!("{self:?}").to_uppercase()
    }
}

fn check_session_transition(session: &Session, next: SessionStatus) -> Result<(), Conflict> {
    if session.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(Conflict::InvalidTransition {
            entity: "session",
            from: session.status.label(),
            to: next.label(),
        })
    }
}

pub fn confirm(mut session: Session) -> Result<Session, Conflict> {
    check_session_transition(&session, SessionStatus::Confirmed)?;
    session.status = SessionStatus::Confirmed;
    Ok(session)
}

pub fn cancel(mut session: Session, by: Ulid, reason: Option<String>) -> Result<Session, Conflict> {
    check_session_transition(&session, SessionStatus::Cancelled)?;
    session.status = SessionStatus::Cancelled;
    session.cancelled_by = Some(by);
    session.cancel_reason = reason;
    Ok(session)
}

/// Moves the session, keeping the prior start in `rescheduled_from`.
pub fn reschedule(mut session: Session, new_start: NaiveDateTime) -> Result<Session, Conflict> {
    check_session_transition(&session, SessionStatus::Rescheduled)?;
    session.rescheduled_from = Some(session.start_time);
    session.start_time = new_start;
    session.end_time = session_end(new_start, session.duration);
    session.status = SessionStatus::Rescheduled;
    Ok(session)
}
