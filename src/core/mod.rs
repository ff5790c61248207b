pub mod attendance;
pub mod cooldown;
pub mod countdown;
pub mod instant;
pub mod liveness;
pub mod messages;
pub mod password;
pub mod quality;
pub mod slots;

pub use attendance::{
    AttendanceOutcome, CaptureEvent, CaptureOutcome, CapturePipeline, DirectAttendance,
    Enrollment, EnrollmentOutcome, InstantAttendance, InstantStep, ManualAttendance,
    RecognitionOutcome,
};
pub use cooldown::Cooldown;
pub use countdown::{format_clock, PasswordCountdown};
pub use instant::InstantWindow;
pub use liveness::{LivenessChecker, LivenessChecks, LivenessProgress, LivenessStep, SimulatedLiveness};
pub use messages::{FailureKind, Stage};
pub use password::InstantCode;
pub use quality::{FrameQuality, QualityGate, QualityVerdict};
pub use slots::{SlotSchedule, SlotTime};
