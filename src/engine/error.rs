use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::WeeklyTimeSlot;
use crate::store::{Collection, StoreError};
use crate::time::TimeError;

/// A business-rule rejection. Always names the clashing entity; the
/// engine never resolves one on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("overlaps class {code} ({window})")]
    ClassOverlap {
        class_id: Ulid,
        code: String,
        window: WeeklyTimeSlot,
    },
    #[error("{window} is outside the tutor's available hours")]
    OutsideAvailability { window: WeeklyTimeSlot },
    #[error("overlaps session {session_id} ({start} to {end})")]
    SessionOverlap {
        session_id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("class {code} is full ({max_students} students)")]
    ClassFull {
        class_id: Ulid,
        code: String,
        max_students: u32,
    },
    #[error("class {code} is inactive")]
    ClassInactive { class_id: Ulid, code: String },
    #[error("already enrolled (enrollment {enrollment_id})")]
    AlreadyEnrolled { enrollment_id: Ulid },
    #[error("capacity {max_students} is below current enrollment {current_enrollment}")]
    CapacityBelowEnrollment {
        max_students: u32,
        current_enrollment: u32,
    },
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
}

impl Conflict {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Conflict::ClassOverlap { .. } => "class_overlap",
            Conflict::OutsideAvailability { .. } => "outside_availability",
            Conflict::SessionOverlap { .. } => "session_overlap",
            Conflict::ClassFull { .. } => "class_full",
            Conflict::ClassInactive { .. } => "class_inactive",
            Conflict::AlreadyEnrolled { .. } => "already_enrolled",
            Conflict::CapacityBelowEnrollment { .. } => "capacity_below_enrollment",
            Conflict::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{collection} not found: {id}")]
    NotFound { collection: Collection, id: Ulid },
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(#[from] Conflict),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::Conflict(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store",
        }
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            EngineError::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, id } => EngineError::NotFound { collection, id },
            other => EngineError::Store(other),
        }
    }
}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
