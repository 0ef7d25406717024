use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tutor,
    Student,
    Admin,
}

/// An already-authenticated caller. Identity resolution happens upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Ulid,
    pub role: Role,
}

impl Caller {
    pub fn tutor(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Tutor }
    }

    pub fn student(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Student }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The caller acts as `tutor_id`'s tutor (or is an admin).
    pub fn acts_as_tutor(&self, tutor_id: Ulid) -> bool {
        self.is_admin() || (self.role == Role::Tutor && self.user_id == tutor_id)
    }

    /// The caller acts as student `student_id` (or is an admin).
    pub fn acts_as_student(&self, student_id: Ulid) -> bool {
        self.is_admin() || (self.role == Role::Student && self.user_id == student_id)
    }
}
