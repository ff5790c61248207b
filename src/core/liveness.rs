//! Liveness stepper driving the capture instructions.
//!
//! `LivenessChecker` is the seam for a real detector. The only implementation
//! shipped here, `SimulatedLiveness`, flips one check per tick and never looks
//! at the frame: it paces the user, it does not verify anything. Real liveness
//! verification happens in the recognition service.

use image::DynamicImage;
use std::fmt;

pub const DEFAULT_BLINK_COUNTDOWN: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStep {
    Idle,
    FaceDetected,
    FaceSize,
    Lighting,
    HeadPose,
    EyesOpen,
    /// Seconds left before the blink is expected
    BlinkCountdown(u8),
    BlinkDetected,
    Capture,
}

impl fmt::Display for LivenessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessStep::Idle => write!(f, "idle"),
            LivenessStep::FaceDetected => write!(f, "faceDetected"),
            LivenessStep::FaceSize => write!(f, "faceSize"),
            LivenessStep::Lighting => write!(f, "lighting"),
            LivenessStep::HeadPose => write!(f, "headPose"),
            LivenessStep::EyesOpen => write!(f, "eyesOpen"),
            LivenessStep::BlinkCountdown(n) => write!(f, "blinkCountdown({})", n),
            LivenessStep::BlinkDetected => write!(f, "blinkDetected"),
            LivenessStep::Capture => write!(f, "capture"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LivenessChecks {
    pub face_detected: bool,
    pub face_size: bool,
    pub lighting: bool,
    pub head_pose: bool,
    pub eyes_open: bool,
    pub blink_detected: bool,
}

impl LivenessChecks {
    pub fn any(&self) -> bool {
        self.face_detected
            || self.face_size
            || self.lighting
            || self.head_pose
            || self.eyes_open
            || self.blink_detected
    }

    pub fn all(&self) -> bool {
        self.face_detected
            && self.face_size
            && self.lighting
            && self.head_pose
            && self.eyes_open
            && self.blink_detected
    }
}

/// Snapshot handed to observers after every tick
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessProgress {
    pub step: LivenessStep,
    pub checks: LivenessChecks,
    pub instruction: String,
}

impl LivenessProgress {
    pub fn countdown(&self) -> Option<u8> {
        match self.step {
            LivenessStep::BlinkCountdown(n) => Some(n),
            _ => None,
        }
    }
}

pub trait LivenessChecker: Send {
    fn step(&self) -> LivenessStep;

    fn checks(&self) -> LivenessChecks;

    fn instruction(&self) -> String;

    /// Move forward by one tick. `frame` is the latest camera frame, if any;
    /// detectors that inspect pixels use it, the simulated one ignores it.
    fn advance(&mut self, frame: Option<&DynamicImage>) -> LivenessStep;

    /// Back to `Idle` with every check cleared
    fn reset(&mut self);

    fn is_ready(&self) -> bool {
        self.step() == LivenessStep::Capture
    }

    fn progress(&self) -> LivenessProgress {
        LivenessProgress {
            step: self.step(),
            checks: self.checks(),
            instruction: self.instruction(),
        }
    }
}

const IDLE_INSTRUCTION: &str = "Position your face in the circle";

#[derive(Debug, Clone)]
pub struct SimulatedLiveness {
    step: LivenessStep,
    checks: LivenessChecks,
    countdown_start: u8,
}

impl Default for SimulatedLiveness {
    fn default() -> Self {
        Self::new(DEFAULT_BLINK_COUNTDOWN)
    }
}

impl SimulatedLiveness {
    pub fn new(countdown_start: u8) -> Self {
        Self {
            step: LivenessStep::Idle,
            checks: LivenessChecks::default(),
            countdown_start,
        }
    }
}

impl LivenessChecker for SimulatedLiveness {
    fn step(&self) -> LivenessStep {
        self.step
    }

    fn checks(&self) -> LivenessChecks {
        self.checks
    }

    fn instruction(&self) -> String {
        match self.step {
            LivenessStep::Idle => IDLE_INSTRUCTION.to_string(),
            LivenessStep::FaceDetected => "Face detected! Keep looking at the camera".to_string(),
            LivenessStep::FaceSize => "Good face size. Checking lighting...".to_string(),
            LivenessStep::Lighting => {
                "Lighting looks good. Please face the camera directly".to_string()
            }
            LivenessStep::HeadPose => {
                "Perfect head position. Keep your eyes open naturally".to_string()
            }
            LivenessStep::EyesOpen => "Eyes detected! Now please blink naturally".to_string(),
            LivenessStep::BlinkCountdown(n) => format!("Blink in {}s", n),
            LivenessStep::BlinkDetected => "Blink detected! Capturing image...".to_string(),
            LivenessStep::Capture => "Hold still...".to_string(),
        }
    }

    fn advance(&mut self, _frame: Option<&DynamicImage>) -> LivenessStep {
        self.step = match self.step {
            LivenessStep::Idle => {
                self.checks.face_detected = true;
                LivenessStep::FaceDetected
            }
            LivenessStep::FaceDetected => {
                self.checks.face_size = true;
                LivenessStep::FaceSize
            }
            LivenessStep::FaceSize => {
                self.checks.lighting = true;
                LivenessStep::Lighting
            }
            LivenessStep::Lighting => {
                self.checks.head_pose = true;
                LivenessStep::HeadPose
            }
            LivenessStep::HeadPose => {
                self.checks.eyes_open = true;
                LivenessStep::EyesOpen
            }
            LivenessStep::EyesOpen => LivenessStep::BlinkCountdown(self.countdown_start),
            LivenessStep::BlinkCountdown(0) => {
                self.checks.blink_detected = true;
                LivenessStep::BlinkDetected
            }
            LivenessStep::BlinkCountdown(n) => LivenessStep::BlinkCountdown(n - 1),
            LivenessStep::BlinkDetected => LivenessStep::Capture,
            LivenessStep::Capture => LivenessStep::Capture,
        };
        self.step
    }

    fn reset(&mut self) {
        self.step = LivenessStep::Idle;
        self.checks = LivenessChecks::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_capture(checker: &mut dyn LivenessChecker) -> Vec<LivenessStep> {
        let mut visited = vec![checker.step()];
        while !checker.is_ready() {
            visited.push(checker.advance(None));
            assert!(visited.len() < 64, "stepper never reached capture");
        }
        visited
    }

    #[test]
    fn visits_steps_in_fixed_order() {
        let mut checker = SimulatedLiveness::default();
        let visited = run_to_capture(&mut checker);
        assert_eq!(
            visited,
            vec![
                LivenessStep::Idle,
                LivenessStep::FaceDetected,
                LivenessStep::FaceSize,
                LivenessStep::Lighting,
                LivenessStep::HeadPose,
                LivenessStep::EyesOpen,
                LivenessStep::BlinkCountdown(3),
                LivenessStep::BlinkCountdown(2),
                LivenessStep::BlinkCountdown(1),
                LivenessStep::BlinkCountdown(0),
                LivenessStep::BlinkDetected,
                LivenessStep::Capture,
            ]
        );
        assert!(checker.checks().all());
    }

    #[test]
    fn countdown_starts_at_configured_value_and_reaches_zero() {
        let mut checker = SimulatedLiveness::new(3);
        let countdown: Vec<u8> = run_to_capture(&mut checker)
            .into_iter()
            .filter_map(|step| match step {
                LivenessStep::BlinkCountdown(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, vec![3, 2, 1, 0]);
    }

    #[test]
    fn reset_from_any_step_returns_to_idle() {
        for ticks in 0..12 {
            let mut checker = SimulatedLiveness::default();
            for _ in 0..ticks {
                checker.advance(None);
            }
            checker.reset();
            assert_eq!(checker.step(), LivenessStep::Idle);
            assert!(!checker.checks().any());
            assert_eq!(checker.instruction(), IDLE_INSTRUCTION);
        }
    }

    #[test]
    fn capture_is_terminal() {
        let mut checker = SimulatedLiveness::new(1);
        run_to_capture(&mut checker);
        assert_eq!(checker.advance(None), LivenessStep::Capture);
    }

    #[test]
    fn progress_reports_countdown_and_instruction() {
        let mut checker = SimulatedLiveness::default();
        for _ in 0..7 {
            checker.advance(None);
        }
        let progress = checker.progress();
        assert_eq!(progress.step, LivenessStep::BlinkCountdown(2));
        assert_eq!(progress.countdown(), Some(2));
        assert_eq!(progress.instruction, "Blink in 2s");
        assert!(progress.checks.eyes_open);
        assert!(!progress.checks.blink_detected);
    }
}
