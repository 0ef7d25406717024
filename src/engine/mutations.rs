use std::collections::HashSet;

use chrono::NaiveDateTime;
use tracing::info;
use ulid::Ulid;

use crate::auth::{Caller, Role};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;
use crate::store::UnitOfWork;
use crate::time::{Minutes, MINUTES_PER_DAY};

use super::availability::find_overlapping_pair;
use super::capacity::{self, apply_enrollment_delta, set_active, transition_enrollment, with_enrollment_count};
use super::conflict::{
    check_class_overlap, check_enrollment_clash, check_session_against_classes,
    check_session_against_sessions, check_within_availability, session_end,
};
use super::{instrumented, now, Conflict, Engine, EngineError};

fn unauthorized(what: &str) -> EngineError {
    EngineError::Unauthorized(what.to_string())
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_window(window: &WeeklyTimeSlot) -> Result<(), EngineError> {
    if !window.is_well_formed() {
        return Err(EngineError::Validation(format!(
            "{window}: start time must be before end time"
        )));
    }
    Ok(())
}

fn check_capacity(max_students: u32) -> Result<(), EngineError> {
    if max_students == 0 {
        return Err(EngineError::Validation("maxStudents must be at least 1".into()));
    }
    if max_students > MAX_STUDENTS_PER_CLASS {
        return Err(EngineError::LimitExceeded("too many students per class"));
    }
    Ok(())
}

/// Sessions are same-day like every other window.
fn check_session_window(start: NaiveDateTime, duration: u32) -> Result<(), EngineError> {
    if duration == 0 {
        return Err(EngineError::Validation("duration must be positive".into()));
    }
    if duration > MAX_SESSION_MINUTES {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    if minute_of_day(start) + duration as Minutes > MINUTES_PER_DAY {
        return Err(EngineError::Validation(
            "session must end on the day it starts".into(),
        ));
    }
    Ok(())
}

impl Engine {
    // ── Availability ─────────────────────────────────────────────

    /// Create or replace the caller's weekly availability.
    pub async fn set_availability(
        &self,
        caller: &Caller,
        time_slots: Vec<WeeklyTimeSlot>,
        exceptions: Vec<AvailabilityException>,
    ) -> Result<Availability, EngineError> {
        instrumented("set_availability", async {
            if caller.role != Role::Tutor {
                return Err(unauthorized("only tutors declare availability"));
            }
            if time_slots.len() > MAX_WEEKLY_SLOTS {
                return Err(EngineError::LimitExceeded("too many weekly slots"));
            }
            if exceptions.len() > MAX_EXCEPTIONS {
                return Err(EngineError::LimitExceeded("too many availability exceptions"));
            }
            for slot in &time_slots {
                check_window(slot)?;
            }
            for exception in &exceptions {
                if let (Some(start), Some(end)) = (exception.start_time, exception.end_time)
                    && start >= end
                {
                    return Err(EngineError::Validation(format!(
                        "exception on {}: start time must be before end time",
                        exception.date
                    )));
                }
            }
            if let Some((a, b)) = find_overlapping_pair(&time_slots) {
                return Err(EngineError::Validation(format!(
                    "declared slots {a} and {b} overlap"
                )));
            }

            let tutor_id = caller.user_id;
            let _scope = self.store.lock_scopes(&[tutor_id]).await;
            let availability = Availability {
                tutor_id,
                time_slots,
                exceptions,
                updated_at: now(),
            };
            self.store
                .commit(UnitOfWork::new().upsert(availability.clone()))
                .await?;
            info!(%tutor_id, slots = availability.time_slots.len(), "availability set");
            Ok(availability)
        })
        .await
    }

    // ── Classes ──────────────────────────────────────────────────

    /// Create a class if its window sits inside the tutor's availability
    /// and clashes with none of the tutor's active classes.
    pub async fn create_class(
        &self,
        caller: &Caller,
        tutor_id: Ulid,
        input: ClassInput,
    ) -> Result<Class, EngineError> {
        instrumented("create_class", async {
            if !caller.acts_as_tutor(tutor_id) {
                return Err(unauthorized("only the tutor can create their classes"));
            }
            if input.code.trim().is_empty() {
                return Err(EngineError::Validation("class code is required".into()));
            }
            check_len(&input.code, MAX_CODE_LEN, "class code too long")?;
            check_len(&input.name, MAX_NAME_LEN, "class name too long")?;
            let window = WeeklyTimeSlot::new(input.day, input.start_time, input.end_time);
            check_window(&window)?;
            check_capacity(input.max_students)?;
            if input.semester_start > input.semester_end {
                return Err(EngineError::Validation(
                    "semester must start before it ends".into(),
                ));
            }

            let _scope = self.store.lock_scopes(&[tutor_id]).await;
            self.check_class_fit(tutor_id, &window, None).await?;

            let class = Class {
                id: Ulid::new(),
                tutor_id,
                code: input.code,
                name: input.name,
                day: input.day,
                start_time: input.start_time,
                end_time: input.end_time,
                duration: window.span().duration() as u32,
                max_students: input.max_students,
                current_enrollment: 0,
                status: ClassStatus::Active,
                semester_start: input.semester_start,
                semester_end: input.semester_end,
                created_at: now(),
            };
            self.store.commit(UnitOfWork::new().create(class.clone())).await?;
            info!(class_id = %class.id, code = %class.code, window = %window, "class created");
            Ok(class)
        })
        .await
    }

    /// Move a class and/or change its capacity.
    pub async fn update_class(
        &self,
        caller: &Caller,
        class_id: Ulid,
        update: ClassUpdate,
    ) -> Result<Class, EngineError> {
        instrumented("update_class", async {
            let tutor_id = self.fetch::<Class>(class_id).await?.tutor_id;
            if !caller.acts_as_tutor(tutor_id) {
                return Err(unauthorized("only the class tutor can update it"));
            }

            let _scope = self.store.lock_scopes(&[tutor_id, class_id]).await;
            let mut class: Class = self.fetch(class_id).await?;
            let window = WeeklyTimeSlot::new(
                update.day.unwrap_or(class.day),
                update.start_time.unwrap_or(class.start_time),
                update.end_time.unwrap_or(class.end_time),
            );
            check_window(&window)?;

            if let Some(max_students) = update.max_students {
                check_capacity(max_students)?;
                if max_students < class.current_enrollment {
                    return Err(Conflict::CapacityBelowEnrollment {
                        max_students,
                        current_enrollment: class.current_enrollment,
                    }
                    .into());
                }
                class.max_students = max_students;
            }

            if window != class.weekly_slot() && class.is_active() {
                self.check_class_fit(tutor_id, &window, Some(class_id)).await?;
            }
            class.day = window.day;
            class.start_time = window.start_time;
            class.end_time = window.end_time;
            class.duration = window.span().duration() as u32;
            let class = apply_enrollment_delta(class, 0);

            self.store.commit(UnitOfWork::new().update(class.clone())).await?;
            info!(%class_id, window = %window, max_students = class.max_students, "class updated");

            let roster = self.roster(class_id).await?;
            self.emit(roster, caller.user_id, NotificationKind::ClassUpdated { class_id });
            Ok(class)
        })
        .await
    }

    /// The manual INACTIVE switch. An inactive class may have been moved,
    /// so reactivating re-checks it like a new class.
    pub async fn set_class_status(
        &self,
        caller: &Caller,
        class_id: Ulid,
        active: bool,
    ) -> Result<Class, EngineError> {
        instrumented("set_class_status", async {
            let tutor_id = self.fetch::<Class>(class_id).await?.tutor_id;
            if !caller.acts_as_tutor(tutor_id) {
                return Err(unauthorized("only the class tutor can change its status"));
            }

            let _scope = self.store.lock_scopes(&[tutor_id, class_id]).await;
            let class: Class = self.fetch(class_id).await?;
            if class.is_active() == active {
                return Ok(class);
            }
            if active {
                self.check_class_fit(tutor_id, &class.weekly_slot(), Some(class_id))
                    .await?;
            }
            let class = set_active(class, active);

            self.store.commit(UnitOfWork::new().update(class.clone())).await?;
            info!(%class_id, status = ?class.status, "class status changed");

            let roster = self.roster(class_id).await?;
            self.emit(
                roster,
                caller.user_id,
                NotificationKind::ClassStatusChanged { class_id, active },
            );
            Ok(class)
        })
        .await
    }

    /// Re-derive `current_enrollment` from the ACTIVE enrollments.
    pub async fn recount_enrollment(&self, caller: &Caller, class_id: Ulid) -> Result<Class, EngineError> {
        instrumented("recount_enrollment", async {
            let tutor_id = self.fetch::<Class>(class_id).await?.tutor_id;
            if !caller.acts_as_tutor(tutor_id) {
                return Err(unauthorized("only the class tutor can recount it"));
            }

            let _scope = self.store.lock_scopes(&[class_id]).await;
            let class: Class = self.fetch(class_id).await?;
            let active = self.roster(class_id).await?.len() as u32;
            let repaired = with_enrollment_count(class.clone(), active);
            if repaired != class {
                tracing::warn!(
                    %class_id,
                    stored = class.current_enrollment,
                    actual = active,
                    "enrollment counter repaired"
                );
                self.store.commit(UnitOfWork::new().update(repaired.clone())).await?;
            }
            Ok(repaired)
        })
        .await
    }

    /// One CONFIRMED session per class meeting that has none yet.
    /// Authoritative: not checked against other sessions.
    pub async fn generate_class_sessions(
        &self,
        caller: &Caller,
        class_id: Ulid,
    ) -> Result<Vec<Session>, EngineError> {
        instrumented("generate_class_sessions", async {
            let tutor_id = self.fetch::<Class>(class_id).await?.tutor_id;
            if !caller.acts_as_tutor(tutor_id) {
                return Err(unauthorized("only the class tutor can schedule its sessions"));
            }

            let _scope = self.store.lock_scopes(&[tutor_id, class_id]).await;
            let class: Class = self.fetch(class_id).await?;
            if !class.is_active() {
                return Err(Conflict::ClassInactive {
                    class_id,
                    code: class.code,
                }
                .into());
            }
            let roster = self.roster(class_id).await?;
            let scheduled: HashSet<_> = self
                .find_where(|s: &Session| s.class_id == Some(class_id))
                .await?
                .into_iter()
                .map(|s| s.occurrence.unwrap_or(s.start_time.date()))
                .collect();

            let meetings: Vec<_> = class
                .meeting_dates()
                .filter(|d| !scheduled.contains(d))
                .take(MAX_GENERATED_SESSIONS + 1)
                .collect();
            if meetings.len() > MAX_GENERATED_SESSIONS {
                return Err(EngineError::LimitExceeded("too many class meetings"));
            }

            let created_at = now();
            let sessions: Vec<Session> = meetings
                .into_iter()
                .map(|date| {
                    let start = at_wall_time(date, class.start_time);
                    Session {
                        id: Ulid::new(),
                        student_ids: roster.clone(),
                        tutor_id,
                        class_id: Some(class_id),
                        occurrence: Some(date),
                        title: Some(class.name.clone()),
                        start_time: start,
                        end_time: session_end(start, class.duration),
                        duration: class.duration,
                        status: SessionStatus::Confirmed,
                        rescheduled_from: None,
                        cancelled_by: None,
                        cancel_reason: None,
                        created_at,
                    }
                })
                .collect();
            if sessions.is_empty() {
                return Ok(sessions);
            }

            let unit = sessions
                .iter()
                .cloned()
                .fold(UnitOfWork::new(), UnitOfWork::create);
            self.store.commit(unit).await?;
            info!(%class_id, count = sessions.len(), "class sessions generated");

            self.emit(
                roster,
                caller.user_id,
                NotificationKind::ClassSessionsScheduled {
                    class_id,
                    sessions: sessions.len(),
                },
            );
            Ok(sessions)
        })
        .await
    }

    // ── Enrollments ──────────────────────────────────────────────

    /// Enroll `student_id` in `class_id`. The enrollment and the class
    /// counter commit together.
    pub async fn enroll(
        &self,
        caller: &Caller,
        student_id: Ulid,
        class_id: Ulid,
    ) -> Result<Enrollment, EngineError> {
        instrumented("enroll", async {
            if !caller.acts_as_student(student_id) {
                return Err(unauthorized("students enroll themselves"));
            }

            let _scope = self.store.lock_scopes(&[class_id, student_id]).await;
            let class: Class = self.fetch(class_id).await?;
            if !class.is_active() {
                return Err(Conflict::ClassInactive {
                    class_id,
                    code: class.code,
                }
                .into());
            }

            let held = self
                .find_where(|e: &Enrollment| e.student_id == student_id && e.is_active())
                .await?;
            if let Some(existing) = held.iter().find(|e| e.class_id == class_id) {
                return Err(Conflict::AlreadyEnrolled {
                    enrollment_id: existing.id,
                }
                .into());
            }
            if class.current_enrollment >= class.max_students {
                return Err(Conflict::ClassFull {
                    class_id,
                    code: class.code,
                    max_students: class.max_students,
                }
                .into());
            }

            let mut enrolled = Vec::with_capacity(held.len());
            for e in &held {
                if let Some(other) = self.fetch_opt::<Class>(e.class_id).await? {
                    enrolled.push(other);
                }
            }
            check_enrollment_clash(&class, &enrolled)?;

            let enrollment = Enrollment {
                id: Ulid::new(),
                student_id,
                class_id,
                status: EnrollmentStatus::Active,
                enrolled_at: now(),
                dropped_at: None,
            };
            let tutor_id = class.tutor_id;
            let class = apply_enrollment_delta(class, 1);
            self.store
                .commit(UnitOfWork::new().create(enrollment.clone()).update(class.clone()))
                .await?;
            info!(
                %class_id,
                %student_id,
                enrollment = class.current_enrollment,
                status = ?class.status,
                "enrolled"
            );

            self.emit(
                [tutor_id],
                caller.user_id,
                NotificationKind::Enrolled {
                    class_id,
                    enrollment_id: enrollment.id,
                    student_id,
                },
            );
            Ok(enrollment)
        })
        .await
    }

    /// ACTIVE → DROPPED, recording `dropped_at`.
    pub async fn drop_enrollment(&self, caller: &Caller, enrollment_id: Ulid) -> Result<Enrollment, EngineError> {
        instrumented(
            "drop_enrollment",
            self.end_enrollment(caller, enrollment_id, EnrollmentStatus::Dropped),
        )
        .await
    }

    /// ACTIVE → CANCELLED.
    pub async fn cancel_enrollment(&self, caller: &Caller, enrollment_id: Ulid) -> Result<(), EngineError> {
        instrumented(
            "cancel_enrollment",
            self.end_enrollment(caller, enrollment_id, EnrollmentStatus::Cancelled),
        )
        .await
        .map(|_| ())
    }

    /// Hard delete. An ACTIVE enrollment releases its seat in the same unit.
    pub async fn delete_enrollment(&self, caller: &Caller, enrollment_id: Ulid) -> Result<(), EngineError> {
        instrumented("delete_enrollment", async {
            let (enrollment, class) = self.authorize_enrollment(caller, enrollment_id).await?;
            let _scope = self
                .store
                .lock_scopes(&[enrollment.class_id, enrollment.student_id, enrollment_id])
                .await;
            let enrollment: Enrollment = self.fetch(enrollment_id).await?;

            let mut unit = UnitOfWork::new().delete::<Enrollment>(enrollment_id);
            if enrollment.is_active()
                && let Some(class) = self.fetch_opt::<Class>(enrollment.class_id).await?
            {
                unit = unit.update(apply_enrollment_delta(class, -1));
            }
            self.store.commit(unit).await?;
            info!(%enrollment_id, class_id = %enrollment.class_id, "enrollment deleted");

            let recipients = [Some(enrollment.student_id), class.map(|c| c.tutor_id)];
            self.emit(
                recipients.into_iter().flatten(),
                caller.user_id,
                NotificationKind::EnrollmentDeleted {
                    class_id: enrollment.class_id,
                    enrollment_id,
                    student_id: enrollment.student_id,
                },
            );
            Ok(())
        })
        .await
    }

    /// The enrolled student, the class tutor or an admin.
    async fn authorize_enrollment(
        &self,
        caller: &Caller,
        enrollment_id: Ulid,
    ) -> Result<(Enrollment, Option<Class>), EngineError> {
        let enrollment: Enrollment = self.fetch(enrollment_id).await?;
        let class = self.fetch_opt::<Class>(enrollment.class_id).await?;
        let is_tutor = class.as_ref().is_some_and(|c| caller.acts_as_tutor(c.tutor_id));
        if !caller.acts_as_student(enrollment.student_id) && !is_tutor {
            return Err(unauthorized("not a party to this enrollment"));
        }
        Ok((enrollment, class))
    }

    async fn end_enrollment(
        &self,
        caller: &Caller,
        enrollment_id: Ulid,
        to: EnrollmentStatus,
    ) -> Result<Enrollment, EngineError> {
        let (enrollment, _) = self.authorize_enrollment(caller, enrollment_id).await?;
        let _scope = self
            .store
            .lock_scopes(&[enrollment.class_id, enrollment.student_id, enrollment_id])
            .await;
        let enrollment: Enrollment = self.fetch(enrollment_id).await?;
        let class_id = enrollment.class_id;
        let student_id = enrollment.student_id;
        let ended = transition_enrollment(enrollment, to, now())?;

        let mut unit = UnitOfWork::new().update(ended.clone());
        let class = self.fetch_opt::<Class>(class_id).await?;
        if let Some(class) = &class {
            unit = unit.update(apply_enrollment_delta(class.clone(), -1));
        }
        self.store.commit(unit).await?;
        info!(%enrollment_id, %class_id, status = ?ended.status, "enrollment ended");

        let kind = match to {
            EnrollmentStatus::Dropped => NotificationKind::EnrollmentDropped {
                class_id,
                enrollment_id,
                student_id,
            },
            _ => NotificationKind::EnrollmentCancelled {
                class_id,
                enrollment_id,
                student_id,
            },
        };
        let recipients = [Some(student_id), class.map(|c| c.tutor_id)];
        self.emit(recipients.into_iter().flatten(), caller.user_id, kind);
        Ok(ended)
    }

    /// Student ids holding an ACTIVE enrollment in the class.
    pub(super) async fn roster(&self, class_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        Ok(self
            .find_where(|e: &Enrollment| e.class_id == class_id && e.is_active())
            .await?
            .into_iter()
            .map(|e| e.student_id)
            .collect())
    }

    // ── Sessions ─────────────────────────────────────────────────

    /// Book a manual session. Rejected if it overlaps one of the tutor's
    /// classes on that weekday, or a manual session of the tutor or the
    /// student.
    pub async fn create_session(&self, caller: &Caller, input: SessionInput) -> Result<Session, EngineError> {
        instrumented("create_session", async {
            let tutor_id = input.tutor_id;
            let student_id = match caller.role {
                Role::Student => match input.student_id {
                    Some(id) if id != caller.user_id => {
                        return Err(unauthorized("students book for themselves"));
                    }
                    _ => caller.user_id,
                },
                _ if caller.acts_as_tutor(tutor_id) => input.student_id.ok_or_else(|| {
                    EngineError::Validation("studentId is required".into())
                })?,
                _ => return Err(unauthorized("only the tutor or a student can book")),
            };
            if student_id == tutor_id {
                return Err(EngineError::Validation("tutor cannot book themselves".into()));
            }
            if let Some(title) = &input.title {
                check_len(title, MAX_TITLE_LEN, "session title too long")?;
            }
            let duration = input.duration.unwrap_or(self.config.default_session_minutes);
            check_session_window(input.start_time, duration)?;

            let _scope = self.store.lock_scopes(&[tutor_id, student_id]).await;
            self.check_session_slot(tutor_id, &[student_id], input.start_time, duration, None)
                .await?;

            let session = Session {
                id: Ulid::new(),
                student_ids: vec![student_id],
                tutor_id,
                class_id: None,
                occurrence: None,
                title: input.title,
                start_time: input.start_time,
                end_time: session_end(input.start_time, duration),
                duration,
                status: SessionStatus::Pending,
                rescheduled_from: None,
                cancelled_by: None,
                cancel_reason: None,
                created_at: now(),
            };
            self.store.commit(UnitOfWork::new().create(session.clone())).await?;
            info!(session_id = %session.id, %tutor_id, %student_id, start = %session.start_time, "session booked");

            self.emit(
                [tutor_id, student_id],
                caller.user_id,
                NotificationKind::SessionRequested {
                    session_id: session.id,
                    start: session.start_time,
                },
            );
            Ok(session)
        })
        .await
    }

    /// PENDING → CONFIRMED, by the session's tutor.
    pub async fn confirm_session(&self, caller: &Caller, session_id: Ulid) -> Result<Session, EngineError> {
        instrumented("confirm_session", async {
            let session: Session = self.fetch(session_id).await?;
            if !caller.acts_as_tutor(session.tutor_id) {
                return Err(unauthorized("only the tutor confirms a session"));
            }
            let _scope = self.store.lock_scopes(&[session_id]).await;
            let session = capacity::confirm(self.fetch(session_id).await?)?;
            self.store.commit(UnitOfWork::new().update(session.clone())).await?;
            info!(%session_id, "session confirmed");

            self.emit(
                session.student_ids.iter().copied(),
                caller.user_id,
                NotificationKind::SessionConfirmed { session_id },
            );
            Ok(session)
        })
        .await
    }

    /// Terminal. Keeps who cancelled and why.
    pub async fn cancel_session(
        &self,
        caller: &Caller,
        session_id: Ulid,
        reason: Option<String>,
    ) -> Result<Session, EngineError> {
        instrumented("cancel_session", async {
            let session: Session = self.fetch(session_id).await?;
            if !caller.is_admin() && !session.involves(caller.user_id) {
                return Err(unauthorized("not a party to this session"));
            }
            if let Some(reason) = &reason {
                check_len(reason, MAX_REASON_LEN, "cancel reason too long")?;
            }
            let _scope = self.store.lock_scopes(&[session_id]).await;
            let session = capacity::cancel(self.fetch(session_id).await?, caller.user_id, reason.clone())?;
            self.store.commit(UnitOfWork::new().update(session.clone())).await?;
            info!(%session_id, cancelled_by = %caller.user_id, "session cancelled");

            let recipients: Vec<Ulid> = std::iter::once(session.tutor_id)
                .chain(session.student_ids.iter().copied())
                .collect();
            self.emit(
                recipients,
                caller.user_id,
                NotificationKind::SessionCancelled { session_id, reason },
            );
            Ok(session)
        })
        .await
    }

    /// Move a CONFIRMED (or already rescheduled) session. Manual sessions
    /// are re-checked at the new time, ignoring themselves.
    pub async fn reschedule_session(
        &self,
        caller: &Caller,
        session_id: Ulid,
        new_start: NaiveDateTime,
    ) -> Result<Session, EngineError> {
        instrumented("reschedule_session", async {
            let session: Session = self.fetch(session_id).await?;
            if !caller.is_admin() && !session.involves(caller.user_id) {
                return Err(unauthorized("not a party to this session"));
            }
            let mut scopes = vec![session_id, session.tutor_id];
            scopes.extend(&session.student_ids);
            let _scope = self.store.lock_scopes(&scopes).await;

            let session: Session = self.fetch(session_id).await?;
            check_session_window(new_start, session.duration)?;
            if session.is_manual() && session.status.can_transition_to(SessionStatus::Rescheduled) {
                self.check_session_slot(
                    session.tutor_id,
                    &session.student_ids,
                    new_start,
                    session.duration,
                    Some(session_id),
                )
                .await?;
            }
            let moved = capacity::reschedule(session, new_start)?;
            self.store.commit(UnitOfWork::new().update(moved.clone())).await?;
            let from = moved.rescheduled_from.unwrap_or(moved.start_time);
            info!(%session_id, %from, to = %new_start, "session rescheduled");

            let recipients: Vec<Ulid> = std::iter::once(moved.tutor_id)
                .chain(moved.student_ids.iter().copied())
                .collect();
            self.emit(
                recipients,
                caller.user_id,
                NotificationKind::SessionRescheduled {
                    session_id,
                    from,
                    to: new_start,
                },
            );
            Ok(moved)
        })
        .await
    }

    /// Inside the tutor's declared hours and clear of their other active
    /// classes. No availability record means no hours.
    async fn check_class_fit(
        &self,
        tutor_id: Ulid,
        window: &WeeklyTimeSlot,
        ignore: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let declared = self
            .fetch_opt::<Availability>(tutor_id)
            .await?
            .map(|a| a.time_slots)
            .unwrap_or_default();
        check_within_availability(&declared, window)?;
        let classes = self.find_where(|c: &Class| c.tutor_id == tutor_id).await?;
        check_class_overlap(window, &classes, ignore)?;
        Ok(())
    }

    async fn check_session_slot(
        &self,
        tutor_id: Ulid,
        student_ids: &[Ulid],
        start: NaiveDateTime,
        duration: u32,
        ignore: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let classes = self.find_where(|c: &Class| c.tutor_id == tutor_id).await?;
        check_session_against_classes(start, duration, &classes)?;
        let sessions = self
            .find_where(|s: &Session| {
                s.tutor_id == tutor_id || s.student_ids.iter().any(|id| student_ids.contains(id))
            })
            .await?;
        check_session_against_sessions(start, duration, &sessions, ignore)?;
        Ok(())
    }
}
