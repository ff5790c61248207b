mod common;

use rollcall::protocol::Role;
use rollcall::session::{AuthProvider, SignupDetails};
use rollcall::{AttendanceError, RemoteDatabase, SessionContext, SessionStore, Stage};
use std::sync::Arc;

fn student_details(student_id: &str) -> SignupDetails {
    SignupDetails {
        name: "Asha Menon".into(),
        role: Role::Student,
        student_id: Some(student_id.into()),
        subject: None,
    }
}

fn start() -> (Arc<rollcall::MemoryBackend>, SessionContext) {
    let backend = common::backend();
    let session = SessionContext::start(backend.clone(), backend.clone()).unwrap();
    (backend, session)
}

#[test]
fn signup_creates_identity_and_profile() {
    let (backend, mut session) = start();
    assert!(!session.is_loading());
    assert!(session.identity().is_none());

    let profile = session
        .signup("Asha@Example.edu", "secret123", student_details("21CS001"))
        .unwrap();
    assert_eq!(profile.role, Role::Student);
    assert_eq!(profile.email, "asha@example.edu");
    assert_eq!(session.require_student().unwrap().firebase_id, profile.firebase_id);
    assert!(session.require_teacher().is_err());
    assert_eq!(
        backend.get_user_by_external_id(&profile.firebase_id).unwrap(),
        Some(profile)
    );
}

#[test]
fn failed_profile_creation_removes_the_account() {
    let (backend, mut session) = start();
    session
        .signup("first@example.edu", "secret123", student_details("21CS001"))
        .unwrap();
    session.logout().unwrap();

    let err = session
        .signup("second@example.edu", "secret123", student_details("21CS001"))
        .unwrap_err();
    assert!(err.to_string().contains("Student ID is already taken"));
    assert!(session.identity().is_none());
    assert!(session.profile().is_none());

    // The half-made account is gone
    let err = backend.sign_in("second@example.edu", "secret123").unwrap_err();
    assert_eq!(err.user_message(Stage::Session), "Invalid email or password");
}

#[test]
fn students_must_give_a_student_id() {
    let (_backend, mut session) = start();
    let err = session
        .signup(
            "asha@example.edu",
            "secret123",
            SignupDetails {
                student_id: None,
                ..student_details("unused")
            },
        )
        .unwrap_err();
    assert!(matches!(err, AttendanceError::Validation(_)));
}

#[test]
fn login_and_logout_follow_the_provider() {
    let (_backend, mut session) = start();
    session
        .signup("asha@example.edu", "secret123", student_details("21CS001"))
        .unwrap();
    session.logout().unwrap();
    assert!(matches!(session.require_profile(), Err(AttendanceError::NotSignedIn)));

    let err = session.login("asha@example.edu", "wrong-password").unwrap_err();
    assert_eq!(err.user_message(Stage::Session), "Invalid email or password");

    let profile = session.login("asha@example.edu", "secret123").unwrap();
    assert_eq!(profile.name, "Asha Menon");
    assert!(session.identity().is_some());

    session.logout().unwrap();
    assert!(session.identity().is_none());
    assert!(session.profile().is_none());
}

#[test]
fn provider_sign_in_without_profile_can_be_completed() {
    let (_backend, mut session) = start();
    let err = session.login_with_token("rao@example.edu").unwrap_err();
    assert!(matches!(err, AttendanceError::ProfileIncomplete));
    assert!(session.identity().is_some());

    let profile = session
        .complete_profile(SignupDetails {
            name: "Dr. Rao".into(),
            role: Role::Teacher,
            student_id: None,
            subject: Some("Physics".into()),
        })
        .unwrap();
    assert_eq!(profile.role, Role::Teacher);
    assert!(session.require_teacher().is_ok());
}

#[test]
fn sign_ins_made_elsewhere_arrive_as_events() {
    let (backend, mut session) = start();
    let identity = backend.create_account("asha@example.edu", "secret123").unwrap();
    backend
        .create_user(&rollcall::protocol::NewUserProfile {
            firebase_id: identity.uid.clone(),
            email: identity.email.clone(),
            name: "Asha Menon".into(),
            role: Role::Student,
            student_id: Some("21CS001".into()),
            subject: None,
        })
        .unwrap();

    assert_eq!(session.process_events().unwrap(), 1);
    assert_eq!(session.profile().map(|p| p.name.as_str()), Some("Asha Menon"));

    backend.sign_out().unwrap();
    session.process_events().unwrap();
    assert!(session.identity().is_none());
}

#[test]
fn saved_identity_resumes_in_a_new_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new_with_path(dir.path().to_path_buf()).unwrap();

    let (backend, mut session) = start();
    session
        .signup("asha@example.edu", "secret123", student_details("21CS001"))
        .unwrap();
    store.save(session.identity().unwrap()).unwrap();
    backend.sign_out().unwrap();

    let mut next = SessionContext::start(backend.clone(), backend.clone()).unwrap();
    assert!(next.identity().is_none());
    let identity = store.load().unwrap().expect("saved identity");
    let profile = next.resume(identity).unwrap().cloned().expect("profile");
    assert_eq!(profile.student_id.as_deref(), Some("21CS001"));

    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
}
