//! The teacher's side of instant attendance: a code on screen with a live
//! countdown, invalidated when the window closes or the code runs out.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{AttendanceError, Clock, Result};
use crate::core::countdown::PasswordCountdown;
use crate::service::database::RemoteDatabase;
use crate::service::protocol::{InstantPasswordGrant, Role, UserProfile};

pub struct InstantWindow {
    db: Arc<dyn RemoteDatabase>,
    clock: Clock,
    teacher_uid: String,
    grant: InstantPasswordGrant,
    closed: bool,
}

impl InstantWindow {
    pub fn open(
        db: Arc<dyn RemoteDatabase>,
        clock: Clock,
        teacher: &UserProfile,
        class_id: i64,
        slot_number: u8,
    ) -> Result<Self> {
        if teacher.role != Role::Teacher {
            return Err(AttendanceError::Validation(
                "Only teachers can generate instant passwords".into(),
            ));
        }
        if !(1..=9).contains(&slot_number) {
            return Err(AttendanceError::Validation(
                "Slot number must be between 1 and 9".into(),
            ));
        }

        let grant = db.generate_instant_password(class_id, slot_number, &teacher.firebase_id)?;
        tracing::info!(
            "Instant attendance window opened for class {} slot {} until {}",
            class_id,
            slot_number,
            grant.expires_at
        );
        Ok(Self {
            db,
            clock,
            teacher_uid: teacher.firebase_id.clone(),
            grant,
            closed: false,
        })
    }

    pub fn code(&self) -> &str {
        &self.grant.password
    }

    pub fn grant(&self) -> &InstantPasswordGrant {
        &self.grant
    }

    pub fn countdown(&self) -> PasswordCountdown {
        PasswordCountdown::new(self.grant.expires_at)
    }

    pub fn display(&self) -> String {
        self.countdown().display_at((self.clock)())
    }

    pub fn is_expired(&self) -> bool {
        self.countdown().is_expired_at((self.clock)())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sleep between display changes, calling `observer` with each new
    /// reading. Stops early when the observer returns `false`; otherwise
    /// runs to `0:00` and closes the window.
    pub fn run_countdown(&mut self, observer: &mut dyn FnMut(&str) -> bool) -> Result<()> {
        self.run_countdown_with(&mut |d| std::thread::sleep(d), observer)
    }

    pub fn run_countdown_with(
        &mut self,
        sleep: &mut dyn FnMut(Duration),
        observer: &mut dyn FnMut(&str) -> bool,
    ) -> Result<()> {
        let countdown = self.countdown();
        for tick in countdown.ticks_from((self.clock)()) {
            let wait = tick - (self.clock)();
            if wait > ChronoDuration::zero() {
                sleep(wait.to_std().unwrap_or(Duration::ZERO));
            }
            if !observer(&countdown.display_at(tick)) {
                return Ok(());
            }
        }
        tracing::info!("Instant password expired");
        self.close()
    }

    /// Invalidate the code server-side. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.db
            .invalidate_instant_password(&self.grant.password, &self.teacher_uid)?;
        self.closed = true;
        tracing::info!("Instant attendance window closed for class {}", self.grant.class_id);
        Ok(())
    }
}

impl Drop for InstantWindow {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Could not invalidate instant password: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::password::InstantCode;
    use crate::core::slots::SlotSchedule;
    use crate::service::memory::MemoryBackend;
    use crate::service::protocol::{NewClass, NewUserProfile};
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<MemoryBackend>, UserProfile, i64) {
        let backend = Arc::new(MemoryBackend::new(SlotSchedule::campus(330)));
        backend.freeze_clock(Utc.with_ymd_and_hms(2025, 3, 10, 4, 30, 0).unwrap());
        let teacher = backend
            .create_user(&NewUserProfile {
                firebase_id: "t1".into(),
                email: "t1@example.edu".into(),
                name: "Dr. Rao".into(),
                role: Role::Teacher,
                student_id: None,
                subject: Some("Physics".into()),
            })
            .unwrap();
        let class = backend
            .create_class(&NewClass {
                name: "Physics 201".into(),
                subject: "Physics".into(),
                description: String::new(),
                teacher_firebase_id: "t1".into(),
            })
            .unwrap();
        (backend, teacher, class.id)
    }

    #[test]
    fn countdown_runs_to_zero_and_invalidates() {
        let (backend, teacher, class_id) = setup();
        let mut window =
            InstantWindow::open(backend.clone(), backend.clock(), &teacher, class_id, 2).unwrap();
        assert_eq!(window.display(), "3:00");

        let mut shown = Vec::new();
        let clock_owner = backend.clone();
        window
            .run_countdown_with(
                &mut |d| clock_owner.advance_clock(ChronoDuration::from_std(d).unwrap()),
                &mut |display| {
                    shown.push(display.to_string());
                    true
                },
            )
            .unwrap();

        assert_eq!(shown.len(), 181);
        assert_eq!(shown.first().map(String::as_str), Some("3:00"));
        assert_eq!(shown.last().map(String::as_str), Some("0:00"));
        assert!(window.is_expired());
        assert!(window.is_closed());
    }

    #[test]
    fn closing_revokes_the_code() {
        let (backend, teacher, class_id) = setup();
        let code = {
            let window =
                InstantWindow::open(backend.clone(), backend.clock(), &teacher, class_id, 2).unwrap();
            InstantCode::parse(window.code()).unwrap()
        };
        backend
            .create_user(&NewUserProfile {
                firebase_id: "s1".into(),
                email: "s1@example.edu".into(),
                name: "Asha".into(),
                role: Role::Student,
                student_id: Some("21CS001".into()),
                subject: None,
            })
            .unwrap();
        let err = backend.validate_instant_password(&code, "s1").unwrap_err();
        assert!(err.to_string().contains("Invalid or expired password"));
    }

    #[test]
    fn students_cannot_open_a_window() {
        let (backend, mut teacher, class_id) = setup();
        teacher.role = Role::Student;
        let err = InstantWindow::open(backend.clone(), backend.clock(), &teacher, class_id, 2)
            .err()
            .unwrap();
        assert!(matches!(err, AttendanceError::Validation(_)));
    }
}
