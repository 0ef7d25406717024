use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::resolve_effective_slots;
use super::slots::BookableSlots;
use super::{instrumented, today, Engine, EngineError};

/// What an [`EntityRef`] resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleItem {
    Class(Class),
    Session(Session),
}

impl Engine {
    pub async fn get_availability(&self, tutor_id: Ulid) -> Result<Option<Availability>, EngineError> {
        self.fetch_opt(tutor_id).await
    }

    /// The tutor's availability record, with time already held by active
    /// classes cut out of `time_slots` when `exclude_classes` is set.
    pub async fn resolve_effective_availability(
        &self,
        tutor_id: Ulid,
        exclude_classes: bool,
    ) -> Result<Availability, EngineError> {
        instrumented("resolve_effective_availability", async {
            let mut availability: Availability = self.fetch(tutor_id).await?;
            if exclude_classes {
                let classes = self
                    .find_where(|c: &Class| c.tutor_id == tutor_id && c.is_active())
                    .await?;
                availability.time_slots = resolve_effective_slots(&availability.time_slots, &classes);
            }
            Ok(availability)
        })
        .await
    }

    /// Bookable slots over the configured horizon, starting today.
    pub async fn generate_bookable_slots(
        &self,
        tutor_id: Ulid,
        duration: u32,
    ) -> Result<Vec<BookableSlot>, EngineError> {
        let slots = self
            .generate_bookable_slots_from(tutor_id, duration, today(), self.config.horizon_days)
            .await?;
        Ok(slots.collect())
    }

    /// Lazy slot walk over `days` days from `from`. A tutor with no
    /// availability record has nothing bookable.
    pub async fn generate_bookable_slots_from(
        &self,
        tutor_id: Ulid,
        duration: u32,
        from: NaiveDate,
        days: u32,
    ) -> Result<BookableSlots, EngineError> {
        instrumented("generate_bookable_slots", async {
            if duration == 0 {
                return Err(EngineError::Validation("duration must be positive".into()));
            }
            if duration > MAX_SESSION_MINUTES {
                return Err(EngineError::LimitExceeded("session too long"));
            }
            if days > MAX_HORIZON_DAYS {
                return Err(EngineError::LimitExceeded("horizon too far"));
            }
            let Some(declared) = self.fetch_opt::<Availability>(tutor_id).await? else {
                return Ok(BookableSlots::new(&[], duration as i64, from, 0));
            };
            let classes = self
                .find_where(|c: &Class| c.tutor_id == tutor_id && c.is_active())
                .await?;
            let effective = resolve_effective_slots(&declared.time_slots, &classes);
            Ok(BookableSlots::new(&effective, duration as i64, from, days))
        })
        .await
    }

    pub async fn get_class(&self, class_id: Ulid) -> Result<Class, EngineError> {
        self.fetch(class_id).await
    }

    pub async fn get_session(&self, session_id: Ulid) -> Result<Session, EngineError> {
        self.fetch(session_id).await
    }

    /// A tutor's classes in weekly order.
    pub async fn list_tutor_classes(&self, tutor_id: Ulid) -> Result<Vec<Class>, EngineError> {
        let mut classes = self.find_where(|c: &Class| c.tutor_id == tutor_id).await?;
        classes.sort_by_key(|c| (c.day, c.start_time));
        Ok(classes)
    }

    pub async fn list_student_enrollments(&self, student_id: Ulid) -> Result<Vec<Enrollment>, EngineError> {
        let mut enrollments = self
            .find_where(|e: &Enrollment| e.student_id == student_id)
            .await?;
        enrollments.sort_by_key(|e| e.enrolled_at);
        Ok(enrollments)
    }

    /// Sessions the user takes part in, tutor or student, by start time.
    pub async fn list_user_sessions(&self, user_id: Ulid) -> Result<Vec<Session>, EngineError> {
        let mut sessions = self.find_where(|s: &Session| s.involves(user_id)).await?;
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    pub async fn resolve_ref(&self, target: &EntityRef) -> Result<ScheduleItem, EngineError> {
        match target {
            EntityRef::Class(id) => self.get_class(*id).await.map(ScheduleItem::Class),
            EntityRef::Session(id) => self.get_session(*id).await.map(ScheduleItem::Session),
            EntityRef::Unknown(raw) => Err(EngineError::Validation(format!(
                "{raw:?} is neither a class_ nor a session_ id"
            ))),
        }
    }
}
