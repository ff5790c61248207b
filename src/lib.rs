// Core modules
pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod service;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use camera::{Camera, CameraSession, FrameSource};
pub use common::{AttendanceError, Clock, Config, DevMode, Result};
pub use core::{
    AttendanceOutcome, CapturePipeline, DirectAttendance, Enrollment, FailureKind, InstantAttendance,
    InstantCode, InstantWindow, ManualAttendance, QualityGate, Stage,
};
pub use service::{protocol, FaceApiClient, MemoryBackend, RecognitionService, RemoteDatabase, RestDatabase};
pub use session::{AuthProvider, Identity, RestAuthProvider, SessionContext};
pub use storage::SessionStore;
