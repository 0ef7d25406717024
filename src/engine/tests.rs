use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use super::*;
use crate::auth::Caller;
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::{NotificationKind, NotifyHub};
use crate::store::{Collection, Entity, InMemoryStore, Store};
use crate::time::WallTime;

// ── Helpers ──────────────────────────────────────────────

fn engine() -> Engine {
    Engine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(NotifyHub::new()),
        EngineConfig::default(),
    )
}

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tutorsched_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn t(s: &str) -> WallTime {
    s.parse().unwrap()
}

fn slot(day: DayOfWeek, start: &str, end: &str) -> WeeklyTimeSlot {
    WeeklyTimeSlot::new(day, t(start), t(end))
}

/// 2026-10-19 is a Monday.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn at(date: &str, time: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
}

fn class_input(code: &str, window: WeeklyTimeSlot, max_students: u32) -> ClassInput {
    ClassInput {
        code: code.into(),
        name: format!("{code} class"),
        day: window.day,
        start_time: window.start_time,
        end_time: window.end_time,
        max_students,
        semester_start: monday(),
        semester_end: NaiveDate::from_ymd_opt(2026, 11, 8).unwrap(),
    }
}

/// A tutor with the given weekly hours declared.
async fn tutor_with_hours(engine: &Engine, hours: &[WeeklyTimeSlot]) -> Caller {
    let tutor = Caller::tutor(Ulid::new());
    engine
        .set_availability(&tutor, hours.to_vec(), vec![])
        .await
        .unwrap();
    tutor
}

async fn class_for(engine: &Engine, tutor: &Caller, code: &str, window: WeeklyTimeSlot, max: u32) -> Class {
    engine
        .create_class(tutor, tutor.user_id, class_input(code, window, max))
        .await
        .unwrap()
}

fn session_input(tutor_id: Ulid, start: NaiveDateTime, duration: u32) -> SessionInput {
    SessionInput {
        tutor_id,
        student_id: None,
        start_time: start,
        duration: Some(duration),
        title: None,
    }
}

/// Counter equals the ACTIVE enrollment count and FULL tracks it.
async fn assert_capacity_consistent(engine: &Engine, class_id: Ulid) {
    let class = engine.get_class(class_id).await.unwrap();
    let active = engine.roster(class_id).await.unwrap().len() as u32;
    assert_eq!(class.current_enrollment, active);
    if class.status != ClassStatus::Inactive {
        assert_eq!(
            class.status == ClassStatus::Full,
            class.current_enrollment >= class.max_students
        );
    }
}

fn conflict_of(err: EngineError) -> Conflict {
    match err {
        EngineError::Conflict(c) => c,
        other => panic!("expected a conflict, got {other:?}"),
    }
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn set_availability_upserts_single_record() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    engine
        .set_availability(&tutor, vec![slot(DayOfWeek::Friday, "13:00", "17:00")], vec![])
        .await
        .unwrap();

    let stored = engine.get_availability(tutor.user_id).await.unwrap().unwrap();
    assert_eq!(stored.time_slots, vec![slot(DayOfWeek::Friday, "13:00", "17:00")]);
    let all = engine
        .find_where(|_: &Availability| true)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn set_availability_validates_slots() {
    let engine = engine();
    let tutor = Caller::tutor(Ulid::new());

    let err = engine
        .set_availability(&tutor, vec![slot(DayOfWeek::Monday, "12:00", "08:00")], vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .set_availability(
            &tutor,
            vec![
                slot(DayOfWeek::Monday, "08:00", "10:00"),
                slot(DayOfWeek::Monday, "09:00", "11:00"),
            ],
            vec![],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Back-to-back is fine.
    engine
        .set_availability(
            &tutor,
            vec![
                slot(DayOfWeek::Monday, "08:00", "10:00"),
                slot(DayOfWeek::Monday, "10:00", "11:00"),
            ],
            vec![],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn only_tutors_set_availability() {
    let engine = engine();
    let err = engine
        .set_availability(
            &Caller::student(Ulid::new()),
            vec![slot(DayOfWeek::Monday, "08:00", "12:00")],
            vec![],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
}

#[tokio::test]
async fn effective_availability_cuts_out_classes() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    class_for(&engine, &tutor, "MATH1", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;

    let effective = engine
        .resolve_effective_availability(tutor.user_id, true)
        .await
        .unwrap();
    assert_eq!(
        effective.time_slots,
        vec![
            slot(DayOfWeek::Monday, "08:00", "09:00"),
            slot(DayOfWeek::Monday, "10:00", "12:00"),
        ]
    );

    let declared = engine
        .resolve_effective_availability(tutor.user_id, false)
        .await
        .unwrap();
    assert_eq!(declared.time_slots, vec![slot(DayOfWeek::Monday, "08:00", "12:00")]);
}

#[tokio::test]
async fn effective_availability_requires_record() {
    let engine = engine();
    let err = engine
        .resolve_effective_availability(Ulid::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound { collection: Collection::Availability, .. }
    ));
}

#[tokio::test]
async fn inactive_class_frees_its_time() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "MATH1", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    engine.set_class_status(&tutor, class.id, false).await.unwrap();

    let effective = engine
        .resolve_effective_availability(tutor.user_id, true)
        .await
        .unwrap();
    assert_eq!(effective.time_slots, vec![slot(DayOfWeek::Monday, "08:00", "12:00")]);
}

// ── Bookable slots ───────────────────────────────────────

#[tokio::test]
async fn bookable_slots_skip_class_time() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    class_for(&engine, &tutor, "MATH1", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;

    let slots: Vec<_> = engine
        .generate_bookable_slots_from(tutor.user_id, 60, monday(), 7)
        .await
        .unwrap()
        .collect();
    let starts: Vec<String> = slots.iter().map(|s| s.start_time.to_string()).collect();
    assert_eq!(starts, vec!["08:00", "10:00", "11:00"]);
    assert!(slots.iter().all(|s| s.date == monday()));
}

#[tokio::test]
async fn bookable_slots_cover_default_horizon() {
    let engine = engine();
    let every_day: Vec<_> = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ]
    .into_iter()
    .map(|d| slot(d, "08:00", "09:00"))
    .collect();
    let tutor = tutor_with_hours(&engine, &every_day).await;

    let slots = engine.generate_bookable_slots(tutor.user_id, 60).await.unwrap();
    assert_eq!(slots.len(), 14);
    assert!(slots.windows(2).all(|w| w[0].date < w[1].date));
}

#[tokio::test]
async fn bookable_slots_edge_inputs() {
    let engine = engine();
    let nobody = engine
        .generate_bookable_slots(Ulid::new(), 60)
        .await
        .unwrap();
    assert!(nobody.is_empty());

    let err = engine.generate_bookable_slots(Ulid::new(), 0).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .generate_bookable_slots_from(Ulid::new(), 60, monday(), 365)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

// ── Classes ──────────────────────────────────────────────

#[tokio::test]
async fn class_must_fit_declared_hours() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;

    let outside = slot(DayOfWeek::Monday, "11:00", "13:00");
    let err = engine
        .create_class(&tutor, tutor.user_id, class_input("LATE", outside, 5))
        .await
        .unwrap_err();
    assert_eq!(conflict_of(err), Conflict::OutsideAvailability { window: outside });

    let other_day = slot(DayOfWeek::Tuesday, "09:00", "10:00");
    let err = engine
        .create_class(&tutor, tutor.user_id, class_input("TUE", other_day, 5))
        .await
        .unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::OutsideAvailability { .. }));

    let undeclared = Caller::tutor(Ulid::new());
    let err = engine
        .create_class(&undeclared, undeclared.user_id, class_input("X", other_day, 5))
        .await
        .unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::OutsideAvailability { .. }));
}

#[tokio::test]
async fn class_overlap_names_existing_class() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Friday, "08:00", "18:00")]).await;
    let phys = class_for(&engine, &tutor, "PHYS2", slot(DayOfWeek::Friday, "13:00", "14:30"), 5).await;

    let err = engine
        .create_class(
            &tutor,
            tutor.user_id,
            class_input("CHEM", slot(DayOfWeek::Friday, "14:00", "15:00"), 5),
        )
        .await
        .unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::ClassOverlap {
            class_id: phys.id,
            code: "PHYS2".into(),
            window: slot(DayOfWeek::Friday, "13:00", "14:30"),
        }
    );

    // Back-to-back is allowed.
    class_for(&engine, &tutor, "CHEM", slot(DayOfWeek::Friday, "14:30", "15:30"), 5).await;
    assert_eq!(engine.list_tutor_classes(tutor.user_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn class_creation_is_tutor_only() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let window = slot(DayOfWeek::Monday, "09:00", "10:00");

    let student = Caller::student(Ulid::new());
    let err = engine
        .create_class(&student, tutor.user_id, class_input("X", window, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let other_tutor = Caller::tutor(Ulid::new());
    let err = engine
        .create_class(&other_tutor, tutor.user_id, class_input("X", window, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let admin = Caller::admin(Ulid::new());
    engine
        .create_class(&admin, tutor.user_id, class_input("X", window, 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn class_input_validation() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let window = slot(DayOfWeek::Monday, "09:00", "10:00");

    let err = engine
        .create_class(&tutor, tutor.user_id, class_input("X", window, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create_class(&tutor, tutor.user_id, class_input("", window, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut backwards = class_input("X", window, 5);
    backwards.semester_end = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let err = engine
        .create_class(&tutor, tutor.user_id, backwards)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn reactivation_rechecks_overlap() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let old = class_for(&engine, &tutor, "OLD", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let old = engine.set_class_status(&tutor, old.id, false).await.unwrap();
    assert_eq!(old.status, ClassStatus::Inactive);

    // The inactive class no longer blocks its window.
    let new = class_for(&engine, &tutor, "NEW", slot(DayOfWeek::Monday, "09:30", "10:30"), 5).await;

    let err = engine.set_class_status(&tutor, old.id, true).await.unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::ClassOverlap {
            class_id: new.id,
            code: "NEW".into(),
            window: slot(DayOfWeek::Monday, "09:30", "10:30"),
        }
    );
}

#[tokio::test]
async fn reactivation_rechecks_declared_hours() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "AWAY", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    engine.set_class_status(&tutor, class.id, false).await.unwrap();

    // Inactive classes may be moved anywhere.
    let moved = engine
        .update_class(
            &tutor,
            class.id,
            ClassUpdate {
                day: Some(DayOfWeek::Sunday),
                start_time: Some(t("20:00")),
                end_time: Some(t("21:00")),
                ..ClassUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.status, ClassStatus::Inactive);

    let err = engine.set_class_status(&tutor, class.id, true).await.unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::OutsideAvailability {
            window: slot(DayOfWeek::Sunday, "20:00", "21:00"),
        }
    );
    assert_eq!(engine.get_class(class.id).await.unwrap().status, ClassStatus::Inactive);

    // Once the hours cover it, it comes back.
    engine
        .set_availability(
            &tutor,
            vec![
                slot(DayOfWeek::Monday, "08:00", "12:00"),
                slot(DayOfWeek::Sunday, "18:00", "22:00"),
            ],
            vec![],
        )
        .await
        .unwrap();
    let back = engine.set_class_status(&tutor, class.id, true).await.unwrap();
    assert_eq!(back.status, ClassStatus::Active);
}

#[tokio::test]
async fn update_class_moves_and_resizes() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let a = class_for(&engine, &tutor, "A", slot(DayOfWeek::Monday, "08:00", "09:00"), 1).await;
    class_for(&engine, &tutor, "B", slot(DayOfWeek::Monday, "10:00", "11:00"), 5).await;

    // Moving onto B is rejected; moving within hours is not.
    let onto_b = ClassUpdate {
        start_time: Some(t("10:30")),
        end_time: Some(t("11:30")),
        ..Default::default()
    };
    let err = engine.update_class(&tutor, a.id, onto_b).await.unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::ClassOverlap { .. }));

    let later = ClassUpdate {
        start_time: Some(t("11:00")),
        end_time: Some(t("12:00")),
        ..Default::default()
    };
    let moved = engine.update_class(&tutor, a.id, later).await.unwrap();
    assert_eq!(moved.weekly_slot(), slot(DayOfWeek::Monday, "11:00", "12:00"));
    assert_eq!(moved.duration, 60);

    let student = Caller::student(Ulid::new());
    engine.enroll(&student, student.user_id, a.id).await.unwrap();
    assert_eq!(engine.get_class(a.id).await.unwrap().status, ClassStatus::Full);

    let grow = ClassUpdate {
        max_students: Some(3),
        ..Default::default()
    };
    let grown = engine.update_class(&tutor, a.id, grow).await.unwrap();
    assert_eq!(grown.status, ClassStatus::Active);

    let second = Caller::student(Ulid::new());
    engine.enroll(&second, second.user_id, a.id).await.unwrap();
    let shrink = ClassUpdate {
        max_students: Some(1),
        ..Default::default()
    };
    let err = engine.update_class(&tutor, a.id, shrink).await.unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::CapacityBelowEnrollment {
            max_students: 1,
            current_enrollment: 2,
        }
    );
}

// ── Enrollment & capacity ────────────────────────────────

#[tokio::test]
async fn single_seat_class_end_to_end() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "SOLO", slot(DayOfWeek::Monday, "09:00", "10:00"), 1).await;
    let a = Caller::student(Ulid::new());
    let b = Caller::student(Ulid::new());

    let enrollment_a = engine.enroll(&a, a.user_id, class.id).await.unwrap();
    let after = engine.get_class(class.id).await.unwrap();
    assert_eq!((after.status, after.current_enrollment), (ClassStatus::Full, 1));

    let err = engine.enroll(&b, b.user_id, class.id).await.unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::ClassFull {
            class_id: class.id,
            code: "SOLO".into(),
            max_students: 1,
        }
    );
    let unchanged = engine.get_class(class.id).await.unwrap();
    assert_eq!(unchanged.current_enrollment, 1);

    let dropped = engine.drop_enrollment(&a, enrollment_a.id).await.unwrap();
    assert_eq!(dropped.status, EnrollmentStatus::Dropped);
    assert!(dropped.dropped_at.is_some());
    let after = engine.get_class(class.id).await.unwrap();
    assert_eq!((after.status, after.current_enrollment), (ClassStatus::Active, 0));

    engine.enroll(&b, b.user_id, class.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;
}

#[tokio::test]
async fn duplicate_active_enrollment_rejected() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "DUP", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let s = Caller::student(Ulid::new());

    let first = engine.enroll(&s, s.user_id, class.id).await.unwrap();
    let err = engine.enroll(&s, s.user_id, class.id).await.unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::AlreadyEnrolled { enrollment_id: first.id }
    );

    engine.drop_enrollment(&s, first.id).await.unwrap();
    let second = engine.enroll(&s, s.user_id, class.id).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(engine.list_student_enrollments(s.user_id).await.unwrap().len(), 2);
    assert_capacity_consistent(&engine, class.id).await;
}

#[tokio::test]
async fn counter_tracks_every_enrollment_path() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "CAP", slot(DayOfWeek::Monday, "09:00", "10:00"), 2).await;
    let [a, b, c] = [(); 3].map(|_| Caller::student(Ulid::new()));

    let ea = engine.enroll(&a, a.user_id, class.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;
    let eb = engine.enroll(&b, b.user_id, class.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;
    assert!(engine.enroll(&c, c.user_id, class.id).await.is_err());
    assert_capacity_consistent(&engine, class.id).await;

    engine.drop_enrollment(&a, ea.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;
    let ec = engine.enroll(&c, c.user_id, class.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;

    // The tutor may end a student's enrollment too.
    engine.cancel_enrollment(&tutor, eb.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;
    engine.delete_enrollment(&c, ec.id).await.unwrap();
    assert_capacity_consistent(&engine, class.id).await;

    let class = engine.get_class(class.id).await.unwrap();
    assert_eq!((class.current_enrollment, class.status), (0, ClassStatus::Active));

    // Ended enrollments are terminal.
    let err = engine.cancel_enrollment(&a, ea.id).await.unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::InvalidTransition { .. }));
    let err = engine.drop_enrollment(&c, ec.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { collection: Collection::Enrollments, .. }));
}

#[tokio::test]
async fn enrollment_authorization() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "AUTH", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let s = Caller::student(Ulid::new());
    let stranger = Caller::student(Ulid::new());

    let err = engine.enroll(&stranger, s.user_id, class.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
    let err = engine.enroll(&tutor, tutor.user_id, class.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let e = engine.enroll(&s, s.user_id, class.id).await.unwrap();
    let err = engine.drop_enrollment(&stranger, e.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
    assert_capacity_consistent(&engine, class.id).await;
}

#[tokio::test]
async fn inactive_class_rejects_enrollment() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "OFF", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let s = Caller::student(Ulid::new());
    let e = engine.enroll(&s, s.user_id, class.id).await.unwrap();

    engine.set_class_status(&tutor, class.id, false).await.unwrap();
    let other = Caller::student(Ulid::new());
    let err = engine.enroll(&other, other.user_id, class.id).await.unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::ClassInactive { .. }));

    // Dropping from an inactive class keeps it inactive.
    engine.drop_enrollment(&s, e.id).await.unwrap();
    let class = engine.get_class(class.id).await.unwrap();
    assert_eq!((class.status, class.current_enrollment), (ClassStatus::Inactive, 0));
}

#[tokio::test]
async fn student_cannot_hold_clashing_classes() {
    let engine = engine();
    let alice = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let bob = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let math = class_for(&engine, &alice, "MATH", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let art = class_for(&engine, &bob, "ART", slot(DayOfWeek::Monday, "09:30", "10:30"), 5).await;
    let music = class_for(&engine, &bob, "MUSIC", slot(DayOfWeek::Monday, "10:30", "11:30"), 5).await;

    let s = Caller::student(Ulid::new());
    let e = engine.enroll(&s, s.user_id, math.id).await.unwrap();
    let err = engine.enroll(&s, s.user_id, art.id).await.unwrap_err();
    assert!(matches!(
        conflict_of(err),
        Conflict::ClassOverlap { class_id, .. } if class_id == math.id
    ));
    engine.enroll(&s, s.user_id, music.id).await.unwrap();

    // Once dropped, the old class no longer blocks.
    engine.drop_enrollment(&s, e.id).await.unwrap();
    engine.enroll(&s, s.user_id, art.id).await.unwrap();
    assert_capacity_consistent(&engine, art.id).await;
    assert_capacity_consistent(&engine, math.id).await;
}

#[tokio::test]
async fn recount_repairs_counter_drift() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "FIX", slot(DayOfWeek::Monday, "09:00", "10:00"), 3).await;
    let s = Caller::student(Ulid::new());
    engine.enroll(&s, s.user_id, class.id).await.unwrap();

    let mut drifted = engine.get_class(class.id).await.unwrap();
    drifted.current_enrollment = 3;
    drifted.status = ClassStatus::Full;
    engine.store().update(drifted.into_record()).await.unwrap();

    let repaired = engine.recount_enrollment(&tutor, class.id).await.unwrap();
    assert_eq!((repaired.current_enrollment, repaired.status), (1, ClassStatus::Active));
    assert_capacity_consistent(&engine, class.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrollments_never_oversell() {
    let engine = Arc::new(engine());
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "RUSH", slot(DayOfWeek::Monday, "09:00", "10:00"), 3).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            let class_id = class.id;
            tokio::spawn(async move {
                let s = Caller::student(Ulid::new());
                engine.enroll(&s, s.user_id, class_id).await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut full = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::Conflict(Conflict::ClassFull { .. })) => full += 1,
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!((accepted, full), (3, 13));
    let class = engine.get_class(class.id).await.unwrap();
    assert_eq!((class.current_enrollment, class.status), (3, ClassStatus::Full));
    assert_capacity_consistent(&engine, class.id).await;
}

// ── Sessions ─────────────────────────────────────────────

#[tokio::test]
async fn manual_session_conflicts() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "18:00")]).await;
    let class = class_for(&engine, &tutor, "MATH", slot(DayOfWeek::Monday, "10:00", "11:00"), 5).await;
    let s = Caller::student(Ulid::new());

    let err = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-19", "10:30"), 60))
        .await
        .unwrap_err();
    assert!(matches!(
        conflict_of(err),
        Conflict::ClassOverlap { class_id, .. } if class_id == class.id
    ));

    // Touching the class end is fine.
    let first = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-19", "11:00"), 60))
        .await
        .unwrap();
    assert_eq!(first.status, SessionStatus::Pending);
    assert_eq!(first.student_ids, vec![s.user_id]);
    assert_eq!(first.end_time, at("2026-10-19", "12:00"));

    let other = Caller::student(Ulid::new());
    let err = engine
        .create_session(&other, session_input(tutor.user_id, at("2026-10-19", "11:30"), 60))
        .await
        .unwrap_err();
    assert_eq!(
        conflict_of(err),
        Conflict::SessionOverlap {
            session_id: first.id,
            start: first.start_time,
            end: first.end_time,
        }
    );

    // A cancelled session frees its time.
    engine.cancel_session(&s, first.id, None).await.unwrap();
    engine
        .create_session(&other, session_input(tutor.user_id, at("2026-10-19", "11:30"), 60))
        .await
        .unwrap();
}

#[tokio::test]
async fn student_sessions_clash_across_tutors() {
    let engine = engine();
    let alice = Caller::tutor(Ulid::new());
    let bob = Caller::tutor(Ulid::new());
    let s = Caller::student(Ulid::new());

    engine
        .create_session(&s, session_input(alice.user_id, at("2026-10-20", "15:00"), 60))
        .await
        .unwrap();
    let err = engine
        .create_session(&s, session_input(bob.user_id, at("2026-10-20", "15:30"), 30))
        .await
        .unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::SessionOverlap { .. }));

    // Same wall-clock time a week later is a different timestamp.
    engine
        .create_session(&s, session_input(bob.user_id, at("2026-10-27", "15:30"), 30))
        .await
        .unwrap();
}

#[tokio::test]
async fn session_booking_rules() {
    let engine = engine();
    let tutor = Caller::tutor(Ulid::new());
    let s = Caller::student(Ulid::new());

    let err = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-20", "23:30"), 60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create_session(&tutor, session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut for_someone_else = session_input(tutor.user_id, at("2026-10-20", "09:00"), 60);
    for_someone_else.student_id = Some(Ulid::new());
    let err = engine.create_session(&s, for_someone_else).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let err = engine
        .create_session(&Caller::tutor(Ulid::new()), session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    // The tutor books on a student's behalf; duration defaults.
    let mut on_behalf = session_input(tutor.user_id, at("2026-10-20", "09:00"), 60);
    on_behalf.student_id = Some(s.user_id);
    on_behalf.duration = None;
    let session = engine.create_session(&tutor, on_behalf).await.unwrap();
    assert_eq!(session.duration, EngineConfig::default().default_session_minutes);
}

#[tokio::test]
async fn session_lifecycle() {
    let engine = engine();
    let tutor = Caller::tutor(Ulid::new());
    let s = Caller::student(Ulid::new());
    let session = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap();

    let err = engine
        .reschedule_session(&s, session.id, at("2026-10-21", "09:00"))
        .await
        .unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::InvalidTransition { .. }));

    let err = engine.confirm_session(&s, session.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
    let confirmed = engine.confirm_session(&tutor, session.id).await.unwrap();
    assert_eq!(confirmed.status, SessionStatus::Confirmed);

    let moved = engine
        .reschedule_session(&s, session.id, at("2026-10-21", "14:00"))
        .await
        .unwrap();
    assert_eq!(moved.status, SessionStatus::Rescheduled);
    assert_eq!(moved.rescheduled_from, Some(at("2026-10-20", "09:00")));
    assert_eq!(moved.end_time, at("2026-10-21", "15:00"));

    // A rescheduled session blocks its new time, not its old one.
    let other = Caller::student(Ulid::new());
    engine
        .create_session(&other, session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap();
    let err = engine
        .create_session(&other, session_input(tutor.user_id, at("2026-10-21", "14:30"), 60))
        .await
        .unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::SessionOverlap { .. }));

    let cancelled = engine
        .cancel_session(&tutor, session.id, Some("tutor unavailable".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(tutor.user_id));
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("tutor unavailable"));

    let err = engine.confirm_session(&tutor, session.id).await.unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::InvalidTransition { .. }));
    let err = engine
        .cancel_session(&Caller::student(Ulid::new()), session.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
}

#[tokio::test]
async fn reschedule_rechecks_conflicts() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Tuesday, "08:00", "18:00")]).await;
    class_for(&engine, &tutor, "TUE", slot(DayOfWeek::Tuesday, "13:00", "14:00"), 5).await;
    let s = Caller::student(Ulid::new());
    let session = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap();
    engine.confirm_session(&tutor, session.id).await.unwrap();

    let err = engine
        .reschedule_session(&tutor, session.id, at("2026-10-27", "13:30"))
        .await
        .unwrap_err();
    assert!(matches!(conflict_of(err), Conflict::ClassOverlap { .. }));

    // Overlapping its own old time is fine.
    engine
        .reschedule_session(&tutor, session.id, at("2026-10-20", "09:30"))
        .await
        .unwrap();
}

#[tokio::test]
async fn class_sessions_follow_roster() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "WEEKLY", slot(DayOfWeek::Monday, "09:00", "10:30"), 5).await;
    let [a, b] = [(); 2].map(|_| Caller::student(Ulid::new()));
    engine.enroll(&a, a.user_id, class.id).await.unwrap();
    let eb = engine.enroll(&b, b.user_id, class.id).await.unwrap();
    engine.drop_enrollment(&b, eb.id).await.unwrap();

    let err = engine.generate_class_sessions(&a, class.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    // Semester 2026-10-19 .. 2026-11-08 has three Mondays.
    let sessions = engine.generate_class_sessions(&tutor, class.id).await.unwrap();
    assert_eq!(sessions.len(), 3);
    for s in &sessions {
        assert_eq!(s.status, SessionStatus::Confirmed);
        assert_eq!(s.class_id, Some(class.id));
        assert_eq!(s.student_ids, vec![a.user_id]);
        assert_eq!(s.duration, 90);
        assert_eq!(s.day(), DayOfWeek::Monday);
    }
    assert_eq!(sessions[0].start_time, at("2026-10-19", "09:00"));

    let again = engine.generate_class_sessions(&tutor, class.id).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(engine.list_user_sessions(a.user_id).await.unwrap().len(), 3);
    assert!(engine.list_user_sessions(b.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn moved_class_sessions_keep_their_meeting() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "MOVED", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let sessions = engine.generate_class_sessions(&tutor, class.id).await.unwrap();
    assert_eq!(sessions.len(), 3);
    let first = &sessions[0];
    assert_eq!(first.occurrence, Some(monday()));

    engine
        .reschedule_session(&tutor, first.id, at("2026-10-20", "09:00"))
        .await
        .unwrap();
    let moved = engine
        .reschedule_session(&tutor, first.id, at("2026-10-21", "09:00"))
        .await
        .unwrap();
    assert_eq!(moved.rescheduled_from, Some(at("2026-10-20", "09:00")));
    assert_eq!(moved.occurrence, Some(monday()));

    let again = engine.generate_class_sessions(&tutor, class.id).await.unwrap();
    assert!(again.is_empty(), "regenerated {:?}", again.iter().map(|s| s.start_time).collect::<Vec<_>>());
    let all = engine
        .find_where(|s: &Session| s.class_id == Some(class.id))
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn class_sessions_skip_session_checks() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let s = Caller::student(Ulid::new());
    // A manual session sits where a class will later meet.
    let manual = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-26", "09:00"), 60))
        .await
        .unwrap();
    let class = class_for(&engine, &tutor, "LATE", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let sessions = engine.generate_class_sessions(&tutor, class.id).await.unwrap();
    assert_eq!(sessions.len(), 3);
    assert_eq!(engine.get_session(manual.id).await.unwrap().status, SessionStatus::Pending);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn counterparts_are_notified() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "NOTE", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let s = Caller::student(Ulid::new());
    let mut tutor_rx = engine.notify.subscribe(tutor.user_id);
    let mut student_rx = engine.notify.subscribe(s.user_id);

    let e = engine.enroll(&s, s.user_id, class.id).await.unwrap();
    let n = tutor_rx.try_recv().unwrap();
    assert_eq!(n.recipient, tutor.user_id);
    assert_eq!(
        n.kind,
        NotificationKind::Enrolled {
            class_id: class.id,
            enrollment_id: e.id,
            student_id: s.user_id,
        }
    );
    // The actor is not told about their own action.
    assert!(student_rx.try_recv().is_err());

    engine.cancel_enrollment(&tutor, e.id).await.unwrap();
    assert!(matches!(
        student_rx.try_recv().unwrap().kind,
        NotificationKind::EnrollmentCancelled { .. }
    ));
    assert!(tutor_rx.try_recv().is_err());

    let session = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap();
    assert!(matches!(
        tutor_rx.try_recv().unwrap().kind,
        NotificationKind::SessionRequested { session_id, .. } if session_id == session.id
    ));
    engine.confirm_session(&tutor, session.id).await.unwrap();
    assert_eq!(
        student_rx.try_recv().unwrap().kind,
        NotificationKind::SessionConfirmed { session_id: session.id }
    );
}

#[tokio::test]
async fn rejected_operations_notify_nobody() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "ONE", slot(DayOfWeek::Monday, "09:00", "10:00"), 1).await;
    let a = Caller::student(Ulid::new());
    engine.enroll(&a, a.user_id, class.id).await.unwrap();

    let mut tutor_rx = engine.notify.subscribe(tutor.user_id);
    let b = Caller::student(Ulid::new());
    assert!(engine.enroll(&b, b.user_id, class.id).await.is_err());
    assert!(tutor_rx.try_recv().is_err());
}

// ── References & persistence ─────────────────────────────

#[tokio::test]
async fn resolve_prefixed_refs() {
    let engine = engine();
    let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
    let class = class_for(&engine, &tutor, "REF", slot(DayOfWeek::Monday, "09:00", "10:00"), 5).await;
    let s = Caller::student(Ulid::new());
    let session = engine
        .create_session(&s, session_input(tutor.user_id, at("2026-10-20", "09:00"), 60))
        .await
        .unwrap();

    let item = engine
        .resolve_ref(&EntityRef::parse(&format!("class_{}", class.id)))
        .await
        .unwrap();
    assert_eq!(item, ScheduleItem::Class(class));
    let item = engine
        .resolve_ref(&EntityRef::parse(&format!("session_{}", session.id)))
        .await
        .unwrap();
    assert_eq!(item, ScheduleItem::Session(session));

    let err = engine.resolve_ref(&EntityRef::parse("room_42")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = engine
        .resolve_ref(&EntityRef::Class(Ulid::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { collection: Collection::Classes, .. }));
}

#[tokio::test]
async fn journaled_engine_survives_restart() {
    let path = test_journal_path("restart.journal");
    let (tutor_id, class_id, student_id) = {
        let store = Arc::new(InMemoryStore::open(&path).unwrap());
        let engine = Engine::new(store, Arc::new(NotifyHub::new()), EngineConfig::default());
        let tutor = tutor_with_hours(&engine, &[slot(DayOfWeek::Monday, "08:00", "12:00")]).await;
        let class = class_for(&engine, &tutor, "DUR", slot(DayOfWeek::Monday, "09:00", "10:00"), 1).await;
        let s = Caller::student(Ulid::new());
        engine.enroll(&s, s.user_id, class.id).await.unwrap();
        (tutor.user_id, class.id, s.user_id)
    };

    let store = Arc::new(InMemoryStore::open(&path).unwrap());
    let engine = Engine::new(store, Arc::new(NotifyHub::new()), EngineConfig::default());
    let class = engine.get_class(class_id).await.unwrap();
    assert_eq!(class.tutor_id, tutor_id);
    assert_eq!((class.current_enrollment, class.status), (1, ClassStatus::Full));
    let enrollments = engine.list_student_enrollments(student_id).await.unwrap();
    assert_eq!(enrollments.len(), 1);
    assert_capacity_consistent(&engine, class_id).await;
}
