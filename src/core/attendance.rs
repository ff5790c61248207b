//! Attendance submission flows.
//!
//! Every path that marks a student present ends the same way: an accepted
//! capture is recognized, then the write goes to the database. The flows
//! differ in what they check first:
//!
//! - `DirectAttendance`: the student picks one of their approved classes; the
//!   slot comes from the face service's clock.
//! - `InstantAttendance`: the student types the teacher's six-digit code,
//!   which fixes class and slot, then verifies their face.
//! - `ManualAttendance`: a teacher marks a roster entry, no face involved.
//!
//! Recognition misses and liveness failures are outcomes, not errors. Errors
//! are left for refused writes and transport trouble, and are shown through
//! `AttendanceError::user_message` with the matching `Stage`.

use chrono::NaiveDate;
use image::DynamicImage;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::CameraSession;
use crate::common::{AttendanceError, Clock, Config, Result};
use crate::core::cooldown::Cooldown;
use crate::core::liveness::{LivenessChecker, LivenessProgress, SimulatedLiveness};
use crate::core::messages::FailureKind;
use crate::core::password::InstantCode;
use crate::core::quality::{FrameQuality, QualityGate, QualityVerdict};
use crate::core::slots::SlotSchedule;
use crate::service::database::RemoteDatabase;
use crate::service::face_api::RecognitionService;
use crate::service::protocol::{
    AttendanceKey, AttendanceReceipt, AttendanceRecord, AttendanceStatus, EnrollmentStatus,
    MarkAttendance, MarkingMethod, MembershipStatus, RecognizeResponse, Role, RosterEntry,
    StudentClass, UserProfile, ValidatedPassword,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Tick(LivenessProgress),
    Rejected {
        attempt: u32,
        quality: FrameQuality,
        verdict: QualityVerdict,
    },
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Accepted {
        frame: DynamicImage,
        quality: FrameQuality,
    },
    Rejected {
        quality: FrameQuality,
        verdict: QualityVerdict,
    },
}

/// Liveness stepper in front of the quality gate
pub struct CapturePipeline {
    liveness: Box<dyn LivenessChecker>,
    gate: QualityGate,
    tick: Duration,
    attempts: u32,
}

impl CapturePipeline {
    pub fn new(liveness: Box<dyn LivenessChecker>, gate: QualityGate, tick: Duration, attempts: u32) -> Self {
        Self {
            liveness,
            gate,
            tick,
            attempts: attempts.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Box::new(SimulatedLiveness::new(config.liveness.blink_countdown)),
            QualityGate::from_config(&config.quality),
            config.liveness.tick(),
            config.liveness.capture_attempts,
        )
    }

    pub fn liveness(&self) -> &dyn LivenessChecker {
        self.liveness.as_ref()
    }

    /// One pass from `Idle` to `Capture`. A rejected frame resets the
    /// stepper so the next pass starts from the beginning.
    pub fn run_once(
        &mut self,
        session: &mut CameraSession<'_>,
        observer: &mut dyn FnMut(&CaptureEvent),
        attempt: u32,
    ) -> Result<CaptureOutcome> {
        self.liveness.reset();
        observer(&CaptureEvent::Tick(self.liveness.progress()));

        while !self.liveness.is_ready() {
            if !self.tick.is_zero() {
                std::thread::sleep(self.tick);
            }
            let frame = session.capture_frame()?;
            let step = self.liveness.advance(Some(&frame));
            tracing::debug!("Liveness step: {}", step);
            observer(&CaptureEvent::Tick(self.liveness.progress()));
        }

        let frame = session.capture_frame()?;
        let quality = self.gate.measure(&frame);
        let verdict = self.gate.check(&quality);
        if !verdict.is_acceptable() {
            tracing::warn!("Capture {} rejected: {:?} ({})", attempt, verdict, quality.describe());
            self.liveness.reset();
            observer(&CaptureEvent::Rejected { attempt, quality, verdict });
            return Ok(CaptureOutcome::Rejected { quality, verdict });
        }

        tracing::info!("Capture accepted ({})", quality.describe());
        Ok(CaptureOutcome::Accepted { frame, quality })
    }

    /// Up to the configured number of passes; the last rejection is returned
    /// when none is accepted.
    pub fn capture(
        &mut self,
        session: &mut CameraSession<'_>,
        observer: &mut dyn FnMut(&CaptureEvent),
    ) -> Result<CaptureOutcome> {
        let mut attempt = 1;
        loop {
            let outcome = self.run_once(session, observer, attempt)?;
            if matches!(outcome, CaptureOutcome::Accepted { .. }) || attempt >= self.attempts {
                return Ok(outcome);
            }
            attempt += 1;
        }
    }
}

/// What the face service concluded about one frame
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Recognized {
        confidence: Option<f32>,
    },
    NotRecognized {
        message: Option<String>,
    },
    LivenessFailed {
        message: Option<String>,
        details: Option<serde_json::Value>,
    },
}

impl From<RecognizeResponse> for RecognitionOutcome {
    fn from(response: RecognizeResponse) -> Self {
        // Liveness first: a spoofed frame must never read as a mere miss
        if response.liveness_check == Some(false) {
            RecognitionOutcome::LivenessFailed {
                message: response.message,
                details: response.liveness_details,
            }
        } else if response.recognized {
            RecognitionOutcome::Recognized {
                confidence: response.confidence,
            }
        } else {
            RecognitionOutcome::NotRecognized {
                message: response.message,
            }
        }
    }
}

impl RecognitionOutcome {
    pub fn is_recognized(&self) -> bool {
        matches!(self, RecognitionOutcome::Recognized { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            RecognitionOutcome::Recognized { confidence: Some(c) } => {
                format!("Face recognized ({:.0}% confidence)", c * 100.0)
            }
            RecognitionOutcome::Recognized { confidence: None } => "Face recognized".to_string(),
            RecognitionOutcome::NotRecognized { .. } => {
                "Face not recognized. Please try again or contact your teacher.".to_string()
            }
            RecognitionOutcome::LivenessFailed { message, .. } => match message {
                Some(m) if !m.trim().is_empty() => format!("Liveness check failed: {}", m.trim()),
                _ => "Liveness check failed. Please look at the camera and try again.".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum AttendanceOutcome {
    Marked(AttendanceReceipt),
    /// Found before any capture; nothing was sent
    AlreadyMarked(AttendanceRecord),
    CaptureRejected(QualityVerdict),
    NotVerified(RecognitionOutcome),
}

impl AttendanceOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, AttendanceOutcome::Marked(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            AttendanceOutcome::Marked(receipt) => format!(
                "Attendance marked {} for {} (slot {})",
                receipt.status, receipt.student_name, receipt.slot_number
            ),
            AttendanceOutcome::AlreadyMarked(record) => format!(
                "Attendance already marked for this class today (slot {}, {})",
                record.slot_number, record.status
            ),
            AttendanceOutcome::CaptureRejected(verdict) => verdict.instruction().to_string(),
            AttendanceOutcome::NotVerified(outcome) => outcome.user_message(),
        }
    }
}

fn require_role(profile: &UserProfile, role: Role, message: &str) -> Result<()> {
    if profile.role != role {
        return Err(AttendanceError::Validation(message.to_string()));
    }
    Ok(())
}

/// Face-verified attendance for one of the student's approved classes
pub struct DirectAttendance {
    db: Arc<dyn RemoteDatabase>,
    recognizer: Arc<dyn RecognitionService>,
    pipeline: CapturePipeline,
    schedule: SlotSchedule,
    default_slot: u8,
    clock: Clock,
}

impl DirectAttendance {
    pub fn new(
        config: &Config,
        db: Arc<dyn RemoteDatabase>,
        recognizer: Arc<dyn RecognitionService>,
        clock: Clock,
    ) -> Self {
        Self {
            db,
            recognizer,
            pipeline: CapturePipeline::from_config(config),
            schedule: SlotSchedule::campus(config.schedule.utc_offset_minutes),
            default_slot: config.schedule.default_slot,
            clock,
        }
    }

    pub fn with_pipeline(mut self, pipeline: CapturePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Classes the student may mark attendance for
    pub fn classes(&self, student: &UserProfile) -> Result<Vec<StudentClass>> {
        let classes = self.db.get_classes_by_student(&student.firebase_id)?;
        Ok(classes.into_iter().filter(StudentClass::is_approved).collect())
    }

    /// The face service's current slot, or the configured default when it
    /// reports none or cannot be reached
    pub fn current_slot(&self) -> u8 {
        match self.recognizer.current_slot() {
            Ok(current) => current.current_slot.unwrap_or_else(|| {
                tracing::debug!("No active slot at {}, using slot {}", current.current_time, self.default_slot);
                self.default_slot
            }),
            Err(e) => {
                tracing::warn!("Could not fetch current slot, using slot {}: {}", self.default_slot, e);
                self.default_slot
            }
        }
    }

    pub fn mark(
        &mut self,
        student: &UserProfile,
        class_id: i64,
        session: &mut CameraSession<'_>,
        observer: &mut dyn FnMut(&CaptureEvent),
    ) -> Result<AttendanceOutcome> {
        require_role(student, Role::Student, "Only students can mark their own attendance")?;

        let classes = self.db.get_classes_by_student(&student.firebase_id)?;
        let class = match classes.into_iter().find(|c| c.id == class_id) {
            Some(class) if class.status == MembershipStatus::Approved => class,
            Some(_) => {
                return Err(AttendanceError::Validation(
                    "Your enrollment is pending teacher approval.".into(),
                ))
            }
            None => {
                return Err(AttendanceError::Validation(
                    "You are not enrolled in this class. Please contact your teacher.".into(),
                ))
            }
        };

        let today = self.schedule.today((self.clock)());
        if let Some(record) = self
            .db
            .check_attendance(&student.firebase_id, class_id, today, None)?
        {
            tracing::info!("Attendance for class {} already marked today", class_id);
            return Ok(AttendanceOutcome::AlreadyMarked(record));
        }

        let frame = match self.pipeline.capture(session, observer)? {
            CaptureOutcome::Accepted { frame, .. } => frame,
            CaptureOutcome::Rejected { verdict, .. } => {
                return Ok(AttendanceOutcome::CaptureRejected(verdict))
            }
        };

        let outcome = RecognitionOutcome::from(self.recognizer.recognize(&student.firebase_id, &frame)?);
        if !outcome.is_recognized() {
            tracing::warn!("Direct attendance not verified: {:?}", outcome);
            return Ok(AttendanceOutcome::NotVerified(outcome));
        }

        let request = MarkAttendance {
            student_firebase_id: student.firebase_id.clone(),
            class_id,
            slot_number: self.current_slot(),
            attendance_date: today,
            status: AttendanceStatus::Present,
            marked_by: MarkingMethod::FaceRecognition,
            teacher_firebase_id: class.teacher_firebase_id,
        };
        let receipt = self.db.mark_attendance(&request)?;
        tracing::info!(
            "Attendance marked for {} in class {} slot {}",
            student.firebase_id,
            class_id,
            receipt.slot_number
        );
        Ok(AttendanceOutcome::Marked(receipt))
    }
}

#[derive(Debug, Clone)]
pub enum InstantStep {
    PasswordEntry,
    FaceCapture {
        code: InstantCode,
        validated: ValidatedPassword,
    },
}

/// Password-then-face attendance against a teacher's instant code
pub struct InstantAttendance {
    db: Arc<dyn RemoteDatabase>,
    recognizer: Arc<dyn RecognitionService>,
    pipeline: CapturePipeline,
    schedule: SlotSchedule,
    clock: Clock,
    student_uid: String,
    step: InstantStep,
    submit_cooldown: Cooldown,
    capture_cooldown: Cooldown,
}

impl InstantAttendance {
    pub fn new(
        config: &Config,
        db: Arc<dyn RemoteDatabase>,
        recognizer: Arc<dyn RecognitionService>,
        clock: Clock,
        student: &UserProfile,
    ) -> Result<Self> {
        require_role(student, Role::Student, "Only students can mark attendance using instant passwords")?;
        Ok(Self {
            db,
            recognizer,
            pipeline: CapturePipeline::from_config(config),
            schedule: SlotSchedule::campus(config.schedule.utc_offset_minutes),
            clock,
            student_uid: student.firebase_id.clone(),
            step: InstantStep::PasswordEntry,
            submit_cooldown: Cooldown::from_millis(config.instant.submit_cooldown_ms),
            capture_cooldown: Cooldown::from_millis(config.instant.capture_cooldown_ms),
        })
    }

    pub fn with_pipeline(mut self, pipeline: CapturePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn step(&self) -> &InstantStep {
        &self.step
    }

    /// Check the code's format locally, then with the server. `Ok(None)`
    /// means the tap landed inside the cooldown and was ignored.
    pub fn submit_password(&mut self, input: &str, now: Instant) -> Result<Option<ValidatedPassword>> {
        if let InstantStep::FaceCapture { validated, .. } = &self.step {
            return Ok(Some(validated.clone()));
        }

        let code = InstantCode::parse(input)?;
        if !self.submit_cooldown.try_acquire(now) {
            tracing::debug!("Password submit ignored inside cooldown");
            return Ok(None);
        }

        let validated = self.db.validate_instant_password(&code, &self.student_uid)?;
        tracing::info!("Instant code accepted for class {}", validated.class_id);
        self.step = InstantStep::FaceCapture {
            code,
            validated: validated.clone(),
        };
        Ok(Some(validated))
    }

    /// Recognize `frame` and, when verified, mark attendance with the code.
    /// A miss keeps the face step open for another try.
    pub fn submit_frame(&mut self, frame: &DynamicImage, now: Instant) -> Result<Option<AttendanceOutcome>> {
        let (code, validated) = match &self.step {
            InstantStep::FaceCapture { code, validated } => (code.clone(), validated.clone()),
            InstantStep::PasswordEntry => {
                return Err(AttendanceError::Validation(
                    "Please enter the attendance password".into(),
                ))
            }
        };
        if !self.capture_cooldown.try_acquire(now) {
            tracing::debug!("Capture ignored inside cooldown");
            return Ok(None);
        }

        let outcome = RecognitionOutcome::from(self.recognizer.recognize(&self.student_uid, frame)?);
        if !outcome.is_recognized() {
            tracing::warn!("Instant attendance not verified: {:?}", outcome);
            return Ok(Some(AttendanceOutcome::NotVerified(outcome)));
        }

        let key = AttendanceKey {
            student: self.student_uid.clone(),
            class_id: validated.class_id,
            slot_number: validated.slot_number.unwrap_or(0),
            date: self.schedule.today((self.clock)()),
            method: MarkingMethod::InstantPassword,
            instant_code: Some(code.as_str().to_string()),
        };
        match self.db.mark_instant_attendance(&code, &self.student_uid, &key) {
            Ok(receipt) => {
                tracing::info!("Instant attendance marked for class {}", validated.class_id);
                self.back_to_password();
                Ok(Some(AttendanceOutcome::Marked(receipt)))
            }
            Err(e) => {
                // A dead code cannot succeed on retry
                if matches!(
                    e.failure_kind(),
                    FailureKind::Expired | FailureKind::AlreadyMarked | FailureKind::InvalidPassword
                ) {
                    self.back_to_password();
                }
                Err(e)
            }
        }
    }

    /// Run the capture pipeline and submit the accepted frame
    pub fn capture_and_submit(
        &mut self,
        session: &mut CameraSession<'_>,
        observer: &mut dyn FnMut(&CaptureEvent),
    ) -> Result<Option<AttendanceOutcome>> {
        if matches!(self.step, InstantStep::PasswordEntry) {
            return Err(AttendanceError::Validation(
                "Please enter the attendance password".into(),
            ));
        }
        match self.pipeline.capture(session, observer)? {
            CaptureOutcome::Accepted { frame, .. } => self.submit_frame(&frame, Instant::now()),
            CaptureOutcome::Rejected { verdict, .. } => Ok(Some(AttendanceOutcome::CaptureRejected(verdict))),
        }
    }

    pub fn back_to_password(&mut self) {
        self.step = InstantStep::PasswordEntry;
        self.capture_cooldown.clear();
    }
}

/// Teacher-entered attendance for a roster entry
pub struct ManualAttendance {
    db: Arc<dyn RemoteDatabase>,
    schedule: SlotSchedule,
    clock: Clock,
}

impl ManualAttendance {
    pub fn new(config: &Config, db: Arc<dyn RemoteDatabase>, clock: Clock) -> Self {
        Self {
            db,
            schedule: SlotSchedule::campus(config.schedule.utc_offset_minutes),
            clock,
        }
    }

    pub fn roster(&self, teacher: &UserProfile, class_id: i64) -> Result<Vec<RosterEntry>> {
        self.owned_class(teacher, class_id)?;
        self.db.get_class_students(class_id)
    }

    fn owned_class(&self, teacher: &UserProfile, class_id: i64) -> Result<()> {
        require_role(teacher, Role::Teacher, "Only teachers can mark attendance manually")?;
        let owns = self
            .db
            .get_classes_by_teacher(&teacher.firebase_id)?
            .iter()
            .any(|c| c.id == class_id);
        if !owns {
            return Err(AttendanceError::Validation("Unauthorized or class not found".into()));
        }
        Ok(())
    }

    /// Marks (or corrects) one student's slot. `date` defaults to today on
    /// the campus clock.
    pub fn mark(
        &self,
        teacher: &UserProfile,
        class_id: i64,
        student: &RosterEntry,
        slot_number: u8,
        status: AttendanceStatus,
        date: Option<NaiveDate>,
    ) -> Result<AttendanceReceipt> {
        if !(1..=9).contains(&slot_number) {
            return Err(AttendanceError::Validation(
                "Slot number must be between 1 and 9".into(),
            ));
        }
        self.owned_class(teacher, class_id)?;

        let request = MarkAttendance {
            student_firebase_id: student.firebase_id.clone(),
            class_id,
            slot_number,
            attendance_date: date.unwrap_or_else(|| self.schedule.today((self.clock)())),
            status,
            marked_by: MarkingMethod::Teacher,
            teacher_firebase_id: Some(teacher.firebase_id.clone()),
        };
        let receipt = self.db.mark_attendance(&request)?;
        tracing::info!(
            "{} marked {} in class {} slot {}",
            teacher.name,
            student.name,
            class_id,
            slot_number
        );
        Ok(receipt)
    }
}

#[derive(Debug, Clone)]
pub enum EnrollmentOutcome {
    Enrolled { message: String },
    CaptureRejected(QualityVerdict),
    /// The face service turned the frame down, usually on liveness
    Refused {
        message: String,
        details: Option<serde_json::Value>,
    },
}

/// Face enrollment through the recognition service
pub struct Enrollment {
    recognizer: Arc<dyn RecognitionService>,
    pipeline: CapturePipeline,
}

impl Enrollment {
    pub fn new(config: &Config, recognizer: Arc<dyn RecognitionService>) -> Self {
        Self {
            recognizer,
            pipeline: CapturePipeline::from_config(config),
        }
    }

    pub fn with_pipeline(mut self, pipeline: CapturePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn enroll_face(
        &mut self,
        student: &UserProfile,
        session: &mut CameraSession<'_>,
        observer: &mut dyn FnMut(&CaptureEvent),
    ) -> Result<EnrollmentOutcome> {
        require_role(student, Role::Student, "Face enrollment is only available for students.")?;

        let frame = match self.pipeline.capture(session, observer)? {
            CaptureOutcome::Accepted { frame, .. } => frame,
            CaptureOutcome::Rejected { verdict, .. } => {
                return Ok(EnrollmentOutcome::CaptureRejected(verdict))
            }
        };

        let response = self.recognizer.enroll(&student.firebase_id, &frame)?;
        if !response.success {
            tracing::warn!("Enrollment refused for {}: {}", student.firebase_id, response.message);
            return Ok(EnrollmentOutcome::Refused {
                message: response.message,
                details: response.liveness_details,
            });
        }
        tracing::info!("Face enrolled for {}", student.firebase_id);
        Ok(EnrollmentOutcome::Enrolled {
            message: response.message,
        })
    }

    pub fn enrollment_status(&self, student: &UserProfile) -> Result<EnrollmentStatus> {
        self.recognizer.enrollment_status(&student.firebase_id)
    }

    pub fn remove_enrollment(&self, student: &UserProfile) -> Result<()> {
        self.recognizer.delete_enrollment(&student.firebase_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, StaticFrameSource};
    use image::{Rgb, RgbImage};

    fn solid(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([value, value, value])))
    }

    fn pipeline(attempts: u32) -> CapturePipeline {
        CapturePipeline::new(
            Box::new(SimulatedLiveness::new(3)),
            QualityGate::default(),
            Duration::ZERO,
            attempts,
        )
    }

    #[test]
    fn dark_capture_is_rejected_and_resets_to_idle() {
        let mut camera = Camera::new(Box::new(StaticFrameSource::new(solid(10))));
        let mut session = camera.start_session().unwrap();
        let mut pipeline = pipeline(1);
        let mut events = Vec::new();

        let outcome = pipeline.capture(&mut session, &mut |e| events.push(e.clone())).unwrap();
        match outcome {
            CaptureOutcome::Rejected { verdict, .. } => assert_eq!(verdict, QualityVerdict::TooDark),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(
            pipeline.liveness().step(),
            crate::core::liveness::LivenessStep::Idle
        );
        assert!(matches!(events.last(), Some(CaptureEvent::Rejected { attempt: 1, .. })));
    }

    #[test]
    fn later_attempt_can_succeed() {
        // 12 frames per pass: 11 ticks plus the capture itself
        let mut frames = vec![solid(10); 12];
        frames.extend(vec![solid(128); 12]);
        let mut camera = Camera::new(Box::new(StaticFrameSource::sequence(frames)));
        let mut session = camera.start_session().unwrap();
        let mut pipeline = pipeline(3);
        let mut rejected = 0;

        let outcome = pipeline
            .capture(&mut session, &mut |e| {
                if matches!(e, CaptureEvent::Rejected { .. }) {
                    rejected += 1;
                }
            })
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Accepted { .. }));
        assert_eq!(rejected, 1);
    }

    #[test]
    fn ticks_walk_every_liveness_step() {
        let mut camera = Camera::new(Box::new(StaticFrameSource::new(solid(128))));
        let mut session = camera.start_session().unwrap();
        let mut pipeline = pipeline(1);
        let mut countdown = Vec::new();

        pipeline
            .capture(&mut session, &mut |e| {
                if let CaptureEvent::Tick(progress) = e {
                    if let Some(n) = progress.countdown() {
                        countdown.push(n);
                    }
                }
            })
            .unwrap();
        assert_eq!(countdown, vec![3, 2, 1, 0]);
    }

    #[test]
    fn liveness_failure_wins_over_recognition() {
        let response = RecognizeResponse {
            success: true,
            recognized: false,
            liveness_check: Some(false),
            message: Some("screen glare detected".into()),
            ..Default::default()
        };
        let outcome = RecognitionOutcome::from(response);
        assert!(matches!(outcome, RecognitionOutcome::LivenessFailed { .. }));
        assert_eq!(outcome.user_message(), "Liveness check failed: screen glare detected");

        let response = RecognizeResponse {
            success: true,
            recognized: true,
            liveness_check: Some(true),
            confidence: Some(0.91),
            ..Default::default()
        };
        assert!(RecognitionOutcome::from(response).is_recognized());
    }
}
