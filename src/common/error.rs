use thiserror::Error;

use crate::core::messages::{FailureKind, Stage};

#[derive(Error, Debug)]
pub enum AttendanceError {
    /// Rejected locally, before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote service answered with a business error
    #[error("Remote error ({kind:?}): {message}")]
    Remote { kind: FailureKind, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Profile incomplete")]
    ProfileIncomplete,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl AttendanceError {
    pub fn remote(message: impl Into<String>) -> Self {
        let message = message.into();
        AttendanceError::Remote {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AttendanceError::Remote { kind, .. } => *kind,
            AttendanceError::Network(_) => FailureKind::Network,
            AttendanceError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Generic,
        }
    }

    /// Friendly text for the user, picked by the stage the error surfaced in
    pub fn user_message(&self, stage: Stage) -> String {
        match self {
            AttendanceError::Validation(msg) => msg.clone(),
            AttendanceError::Remote { kind, message } => kind.user_message(stage, message),
            AttendanceError::Network(_) => FailureKind::Network.user_message(stage, ""),
            AttendanceError::Timeout(_) => FailureKind::Timeout.user_message(stage, ""),
            AttendanceError::CameraUnavailable(msg) => {
                format!("Camera unavailable: {}. Check camera permissions and try again.", msg)
            }
            AttendanceError::NotSignedIn => "Please sign in first.".to_string(),
            AttendanceError::ProfileIncomplete => {
                "Please complete your profile before continuing.".to_string()
            }
            _ => stage.default_failure().to_string(),
        }
    }
}

impl From<reqwest::Error> for AttendanceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AttendanceError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            AttendanceError::Network(err.to_string())
        } else if err.is_decode() {
            AttendanceError::Other(anyhow::anyhow!("Malformed response: {}", err))
        } else {
            AttendanceError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_are_classified_on_construction() {
        let err = AttendanceError::remote("Attendance already marked for slot 2 today at 09:12 AM");
        assert_eq!(err.failure_kind(), FailureKind::AlreadyMarked);
        assert_eq!(
            err.user_message(Stage::PasswordValidation),
            "You have already marked attendance today."
        );
    }

    #[test]
    fn validation_errors_pass_their_text_through() {
        let err = AttendanceError::Validation("Password must be exactly 6 digits".into());
        assert_eq!(err.user_message(Stage::PasswordValidation), "Password must be exactly 6 digits");
        assert_eq!(err.failure_kind(), FailureKind::Generic);
    }

    #[test]
    fn transport_errors_map_to_retry_messages() {
        let err = AttendanceError::Network("connection refused".into());
        assert!(err.user_message(Stage::PasswordValidation).starts_with("Network error"));
        let err = AttendanceError::Timeout("30s".into());
        assert_eq!(err.user_message(Stage::PasswordValidation), "Request timed out. Please try again.");
        assert_eq!(err.user_message(Stage::InstantMark), "Face recognition timed out. Please try again.");
    }
}
