mod common;

use chrono::Duration as ChronoDuration;
use common::{camera, campus, stripes};
use rollcall::core::InstantStep;
use rollcall::protocol::MarkingMethod;
use rollcall::{
    AttendanceError, AttendanceOutcome, Config, FailureKind, InstantAttendance, InstantWindow,
    RecognitionService, RemoteDatabase, Stage,
};
use std::time::{Duration, Instant};

fn enrolled_campus() -> common::Campus {
    let campus = campus();
    campus
        .backend
        .enroll(&campus.student.firebase_id, &stripes(true))
        .unwrap();
    campus
}

fn open_window(campus: &common::Campus) -> InstantWindow {
    InstantWindow::open(
        campus.backend.clone(),
        campus.backend.clock(),
        &campus.teacher,
        campus.class_id,
        4,
    )
    .unwrap()
}

fn student_flow(campus: &common::Campus, config: &Config) -> InstantAttendance {
    InstantAttendance::new(
        config,
        campus.backend.clone(),
        campus.backend.clone(),
        campus.backend.clock(),
        &campus.student,
    )
    .unwrap()
}

/// A well-formed code that is not the live one
fn wrong_code(code: &str) -> String {
    let last = code.chars().last().and_then(|c| c.to_digit(10)).unwrap_or(0);
    format!("{}{}", &code[..5], (last + 1) % 10)
}

#[test]
fn code_then_face_marks_the_teachers_slot() {
    let campus = enrolled_campus();
    let window = open_window(&campus);
    let mut flow = student_flow(&campus, &Config::instant_ticks());
    let now = Instant::now();

    let validated = flow.submit_password(window.code(), now).unwrap().expect("accepted");
    assert_eq!(validated.class_name, "Physics 201");
    assert!(matches!(flow.step(), InstantStep::FaceCapture { .. }));

    let outcome = flow.submit_frame(&stripes(true), now).unwrap().expect("submitted");
    match outcome {
        AttendanceOutcome::Marked(receipt) => assert_eq!(receipt.slot_number, 4),
        other => panic!("expected a mark, got {:?}", other),
    }
    assert!(matches!(flow.step(), InstantStep::PasswordEntry));

    let history = campus
        .backend
        .get_attendance_by_user(&campus.student.firebase_id, None, None)
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].marked_by, MarkingMethod::InstantPassword);

    // The same code a second time is refused up front
    let err = flow.submit_password(window.code(), now).unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::AlreadyMarked);
    assert_eq!(
        err.user_message(Stage::PasswordValidation),
        "You have already marked attendance today."
    );
}

#[test]
fn capture_pipeline_feeds_the_face_step() {
    let campus = enrolled_campus();
    let window = open_window(&campus);
    let mut flow = student_flow(&campus, &Config::instant_ticks());
    flow.submit_password(window.code(), Instant::now()).unwrap();

    let mut cam = camera(stripes(true));
    let mut session = cam.start_session().unwrap();
    let outcome = flow
        .capture_and_submit(&mut session, &mut |_| {})
        .unwrap()
        .expect("submitted");
    assert!(outcome.is_marked());
}

#[test]
fn submits_inside_the_cooldown_are_ignored() {
    let campus = enrolled_campus();
    let window = open_window(&campus);
    let mut config = Config::instant_ticks();
    config.instant.submit_cooldown_ms = 2000;
    let mut flow = student_flow(&campus, &config);
    let start = Instant::now();

    // Malformed input never reaches the server, so it does not start the cooldown
    let err = flow.submit_password("12a456", start).unwrap_err();
    assert!(matches!(err, AttendanceError::Validation(_)));

    let err = flow
        .submit_password(&wrong_code(window.code()), start)
        .unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::Expired);

    let ignored = flow
        .submit_password(window.code(), start + Duration::from_millis(500))
        .unwrap();
    assert!(ignored.is_none());
    assert!(matches!(flow.step(), InstantStep::PasswordEntry));

    let accepted = flow
        .submit_password(window.code(), start + Duration::from_millis(2000))
        .unwrap();
    assert!(accepted.is_some());
}

#[test]
fn unrecognized_faces_keep_the_face_step_open() {
    let campus = enrolled_campus();
    let window = open_window(&campus);
    let mut flow = student_flow(&campus, &Config::instant_ticks());
    let now = Instant::now();
    flow.submit_password(window.code(), now).unwrap();

    let outcome = flow.submit_frame(&stripes(false), now).unwrap().expect("submitted");
    assert!(matches!(outcome, AttendanceOutcome::NotVerified(_)));
    assert!(matches!(flow.step(), InstantStep::FaceCapture { .. }));

    let retry = flow.submit_frame(&stripes(true), now).unwrap().expect("submitted");
    assert!(retry.is_marked());
}

#[test]
fn codes_expire_after_three_minutes() {
    let campus = enrolled_campus();
    let window = open_window(&campus);
    let mut flow = student_flow(&campus, &Config::instant_ticks());

    campus.backend.advance_clock(ChronoDuration::seconds(180));
    let err = flow.submit_password(window.code(), Instant::now()).unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::Expired);
    assert_eq!(
        err.user_message(Stage::PasswordValidation),
        "Password has expired. Please ask your teacher for a new one."
    );
    assert!(window.is_expired());
}

#[test]
fn expiry_during_the_face_step_returns_to_code_entry() {
    let campus = enrolled_campus();
    let window = open_window(&campus);
    let mut flow = student_flow(&campus, &Config::instant_ticks());
    let now = Instant::now();
    flow.submit_password(window.code(), now).unwrap();

    campus.backend.advance_clock(ChronoDuration::seconds(179));
    assert_eq!(window.display(), "0:01");
    campus.backend.advance_clock(ChronoDuration::seconds(1));

    let err = flow.submit_frame(&stripes(true), now).unwrap_err();
    assert_eq!(
        err.user_message(Stage::InstantMark),
        "Password has expired during face recognition. Please ask your teacher for a new one."
    );
    assert!(matches!(flow.step(), InstantStep::PasswordEntry));
}

#[test]
fn closing_the_window_revokes_the_code() {
    let campus = enrolled_campus();
    let mut window = open_window(&campus);
    let code = window.code().to_string();
    window.close().unwrap();
    assert!(window.is_closed());

    let mut flow = student_flow(&campus, &Config::instant_ticks());
    let err = flow.submit_password(&code, Instant::now()).unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::Expired);
}

#[test]
fn instant_marks_join_the_student_on_the_spot() {
    let campus = campus();
    let newcomer = campus
        .backend
        .create_user(&common::student_profile("s2", "21CS002", "Ravi Kumar"))
        .unwrap();
    campus.backend.enroll(&newcomer.firebase_id, &stripes(true)).unwrap();
    assert!(campus
        .backend
        .get_classes_by_student(&newcomer.firebase_id)
        .unwrap()
        .is_empty());

    let window = open_window(&campus);
    let mut flow = InstantAttendance::new(
        &Config::instant_ticks(),
        campus.backend.clone(),
        campus.backend.clone(),
        campus.backend.clock(),
        &newcomer,
    )
    .unwrap();
    let now = Instant::now();
    flow.submit_password(window.code(), now).unwrap();
    assert!(flow.submit_frame(&stripes(true), now).unwrap().expect("submitted").is_marked());

    let classes = campus.backend.get_classes_by_student(&newcomer.firebase_id).unwrap();
    assert_eq!(classes.len(), 1);
    assert!(classes[0].is_approved());
}

#[test]
fn teachers_cannot_use_instant_codes() {
    let campus = campus();
    let result = InstantAttendance::new(
        &Config::instant_ticks(),
        campus.backend.clone(),
        campus.backend.clone(),
        campus.backend.clock(),
        &campus.teacher,
    );
    assert!(matches!(result, Err(AttendanceError::Validation(_))));
}

#[test]
fn each_window_of_the_day_gets_its_own_mark() {
    let campus = enrolled_campus();
    let mut flow = student_flow(&campus, &Config::instant_ticks());
    let start = Instant::now();
    let mut slots = Vec::new();

    for (round, slot) in [2u8, 3].into_iter().enumerate() {
        let window = InstantWindow::open(
            campus.backend.clone(),
            campus.backend.clock(),
            &campus.teacher,
            campus.class_id,
            slot,
        )
        .unwrap();
        let now = start + Duration::from_secs(10 * round as u64);
        flow.submit_password(window.code(), now).unwrap().expect("accepted");
        match flow.submit_frame(&stripes(true), now).unwrap().expect("submitted") {
            AttendanceOutcome::Marked(receipt) => slots.push(receipt.slot_number),
            other => panic!("expected a mark, got {:?}", other),
        }
    }

    assert_eq!(slots, vec![2, 3]);
    let mut history: Vec<u8> = campus
        .backend
        .get_attendance_by_user(&campus.student.firebase_id, None, None)
        .unwrap()
        .iter()
        .map(|r| r.slot_number)
        .collect();
    history.sort_unstable();
    assert_eq!(history, vec![2, 3]);
}
