//! Maps remote failure messages onto the labels shown to students and teachers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Expired,
    AlreadyMarked,
    NotEnrolled,
    PendingApproval,
    InvalidPassword,
    /// The backend reported its own database connection trouble
    Connection,
    /// Transport failure between us and the backend
    Network,
    Timeout,
    Generic,
}

/// Where in a flow a failure surfaced. The same server message reads
/// differently before and after the face capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PasswordValidation,
    InstantMark,
    DirectMark,
    ManualMark,
    Enrollment,
    Session,
}

impl Stage {
    pub fn default_failure(&self) -> &'static str {
        match self {
            Stage::PasswordValidation => "Failed to validate password. Please try again.",
            Stage::InstantMark => "Face recognition failed. Please try again.",
            Stage::DirectMark => "Failed to process attendance. Please try again.",
            Stage::ManualMark => "Failed to mark attendance. Please try again.",
            Stage::Enrollment => "Face enrollment failed. Please try again.",
            Stage::Session => "Authentication failed. Please try again.",
        }
    }
}

impl FailureKind {
    /// Substring match in the order the backend's messages overlap:
    /// "Invalid or expired password" must land on `Expired`.
    pub fn classify(message: &str) -> FailureKind {
        let lower = message.to_lowercase();

        if lower.contains("expired") {
            FailureKind::Expired
        } else if lower.contains("already marked") {
            FailureKind::AlreadyMarked
        } else if lower.contains("not enrolled") {
            FailureKind::NotEnrolled
        } else if lower.contains("pending") && lower.contains("approval") {
            FailureKind::PendingApproval
        } else if lower.contains("invalid") {
            FailureKind::InvalidPassword
        } else if lower.contains("database connection") {
            FailureKind::Connection
        } else if lower.contains("timed out") || lower.contains("timeout") {
            FailureKind::Timeout
        } else if lower.contains("networkerror") || lower.contains("failed to fetch") {
            FailureKind::Network
        } else {
            FailureKind::Generic
        }
    }

    pub fn user_message(&self, stage: Stage, server_message: &str) -> String {
        // Sign-in errors are already worded for people; only transport
        // failures get the generic retry text.
        if stage == Stage::Session
            && !matches!(self, FailureKind::Network | FailureKind::Timeout | FailureKind::Connection)
        {
            let trimmed = server_message.trim();
            return if trimmed.is_empty() {
                stage.default_failure().to_string()
            } else {
                trimmed.to_string()
            };
        }

        let text = match (self, stage) {
            (FailureKind::Expired, Stage::InstantMark) => {
                "Password has expired during face recognition. Please ask your teacher for a new one."
            }
            (FailureKind::Expired, _) => "Password has expired. Please ask your teacher for a new one.",
            (FailureKind::AlreadyMarked, Stage::InstantMark) => {
                "Attendance was already marked during face recognition."
            }
            (FailureKind::AlreadyMarked, Stage::DirectMark) => {
                "Attendance already marked for this class today."
            }
            (FailureKind::AlreadyMarked, _) => "You have already marked attendance today.",
            (FailureKind::NotEnrolled, _) => {
                "You are not enrolled in this class. Please contact your teacher."
            }
            (FailureKind::PendingApproval, _) => "Your enrollment is pending teacher approval.",
            (FailureKind::InvalidPassword, _) => "Invalid password. Please check with your teacher.",
            (FailureKind::Connection, _) => "Connection error. Please try again in a moment.",
            (FailureKind::Network, Stage::InstantMark) => {
                "Network error during face recognition. Please check your connection."
            }
            (FailureKind::Network, _) => {
                "Network error. Please check your internet connection and try again."
            }
            (FailureKind::Timeout, Stage::InstantMark) => "Face recognition timed out. Please try again.",
            (FailureKind::Timeout, _) => "Request timed out. Please try again.",
            (FailureKind::Generic, _) => {
                let trimmed = server_message.trim();
                if trimmed.is_empty() {
                    stage.default_failure()
                } else {
                    trimmed
                }
            }
        };
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_follows_backend_wording() {
        assert_eq!(
            FailureKind::classify("Invalid or expired password. Please check with your teacher."),
            FailureKind::Expired
        );
        assert_eq!(
            FailureKind::classify("Attendance already marked for slot 3 today at 10:55 AM"),
            FailureKind::AlreadyMarked
        );
        assert_eq!(
            FailureKind::classify("You are not enrolled in this class. Please join the class first"),
            FailureKind::NotEnrolled
        );
        assert_eq!(
            FailureKind::classify("Your enrollment in this class is pending approval."),
            FailureKind::PendingApproval
        );
        assert_eq!(FailureKind::classify("Invalid password format"), FailureKind::InvalidPassword);
        assert_eq!(
            FailureKind::classify("Database connection error. Please try again."),
            FailureKind::Connection
        );
        assert_eq!(FailureKind::classify("Teacher not found"), FailureKind::Generic);
    }

    #[test]
    fn labels_depend_on_stage() {
        assert_eq!(
            FailureKind::AlreadyMarked.user_message(Stage::PasswordValidation, "already marked"),
            "You have already marked attendance today."
        );
        assert_eq!(
            FailureKind::AlreadyMarked.user_message(Stage::InstantMark, "already marked"),
            "Attendance was already marked during face recognition."
        );
        assert!(FailureKind::Expired
            .user_message(Stage::InstantMark, "")
            .contains("during face recognition"));
    }

    #[test]
    fn generic_failures_keep_the_server_text() {
        assert_eq!(
            FailureKind::Generic.user_message(Stage::ManualMark, "Unauthorized or class not found"),
            "Unauthorized or class not found"
        );
        assert_eq!(
            FailureKind::Generic.user_message(Stage::ManualMark, "  "),
            Stage::ManualMark.default_failure()
        );
    }

    #[test]
    fn sign_in_errors_are_not_relabelled() {
        assert_eq!(
            FailureKind::InvalidPassword.user_message(Stage::Session, "Invalid email or password"),
            "Invalid email or password"
        );
        assert!(FailureKind::Network
            .user_message(Stage::Session, "")
            .starts_with("Network error"));
    }

    #[test]
    fn empty_sign_in_errors_fall_back_to_the_stage_text() {
        assert_eq!(
            FailureKind::Generic.user_message(Stage::Session, " "),
            Stage::Session.default_failure()
        );
        assert_eq!(
            FailureKind::Expired.user_message(Stage::Session, "Token has expired"),
            "Token has expired"
        );
    }

    #[test]
    fn pending_teacher_approval_is_recognised() {
        assert_eq!(
            FailureKind::classify("Your enrollment is pending teacher approval."),
            FailureKind::PendingApproval
        );
    }
}
