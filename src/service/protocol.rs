//! JSON shapes exchanged with the attendance backend and the face API.
//!
//! Database routes wrap their payload in `ApiEnvelope`; the face API's
//! routes answer with flat objects (`RecognizeResponse`, `EnrollResponse`,
//! `EnrollmentStatus`, `EnrolledImage`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::common::error::{AttendanceError, Result};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// `success: false` becomes a classified `Remote` error
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(AttendanceError::remote(
                self.message.unwrap_or_else(|| "Request failed".to_string()),
            ))
        }
    }

    pub fn into_data(self) -> Result<T> {
        let message = self.message.clone();
        self.into_result()?.ok_or_else(|| {
            AttendanceError::Other(anyhow::anyhow!(
                "Response carried no data ({})",
                message.unwrap_or_default()
            ))
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Teacher => write!(f, "teacher"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub id: i64,
    pub firebase_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub profile_photo_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewUserProfile {
    pub firebase_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub id: i64,
    pub name: String,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<i64>,
    #[serde(default)]
    pub student_count: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewClass {
    pub name: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub teacher_firebase_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Approved,
    Rejected,
}

/// A class as seen from one student's side, with their membership status
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentClass {
    pub id: i64,
    pub name: String,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub teacher_firebase_id: Option<String>,
    pub status: MembershipStatus,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
}

impl StudentClass {
    pub fn is_approved(&self) -> bool {
        self.status == MembershipStatus::Approved
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AvailableClass {
    pub id: i64,
    pub name: String,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub enrolled_students: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub student_id: Option<String>,
    pub firebase_id: String,
    pub status: MembershipStatus,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Absent => write!(f, "absent"),
            AttendanceStatus::Late => write!(f, "late"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarkingMethod {
    FaceRecognition,
    Teacher,
    InstantPassword,
    Manual,
}

impl MarkingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkingMethod::FaceRecognition => "face_recognition",
            MarkingMethod::Teacher => "teacher",
            MarkingMethod::InstantPassword => "instant_password",
            MarkingMethod::Manual => "manual",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub slot_number: u8,
    #[serde(default)]
    pub day_of_week: Option<u8>,
    pub attendance_date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: MarkingMethod,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
}

/// Body of a direct or manual attendance write
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MarkAttendance {
    pub student_firebase_id: String,
    pub class_id: i64,
    pub slot_number: u8,
    pub attendance_date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: MarkingMethod,
    #[serde(default)]
    pub teacher_firebase_id: Option<String>,
}

impl MarkAttendance {
    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            student: self.student_firebase_id.clone(),
            class_id: self.class_id,
            slot_number: self.slot_number,
            date: self.attendance_date,
            method: self.marked_by,
            instant_code: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttendanceReceipt {
    pub student_name: String,
    pub status: AttendanceStatus,
    pub slot_number: u8,
    pub marked_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstantPasswordGrant {
    pub password: String,
    pub expires_at: DateTime<Utc>,
    pub class_id: i64,
    #[serde(default)]
    pub class_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidatedPassword {
    pub class_id: i64,
    pub class_name: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub slot_number: Option<u8>,
    #[serde(default)]
    pub valid: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimetableClass {
    pub id: i64,
    pub name: String,
    pub subject: String,
}

/// One weekly slot. Teacher listings nest the class, student listings
/// flatten it alongside the teacher's name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimetableSlot {
    pub id: i64,
    pub day_of_week: u8,
    pub slot_number: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub class_id: Option<i64>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub class: Option<TimetableClass>,
}

impl TimetableSlot {
    pub fn class_label(&self) -> String {
        match (&self.class, &self.class_name) {
            (Some(class), _) => class.name.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => "Unknown Class".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewTimetableSlot {
    pub class_id: i64,
    pub day_of_week: u8,
    pub slot_number: u8,
    pub teacher_firebase_id: String,
}

pub type Subject = String;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AddedStudents {
    pub added_count: u32,
    #[serde(default)]
    pub total_eligible: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RecognizeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub recognized: bool,
    #[serde(default)]
    pub liveness_check: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub liveness_details: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EnrollResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub liveness_details: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EnrollmentStatus {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub enrolled: bool,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EnrolledImage {
    #[serde(default)]
    pub success: bool,
    /// `data:` URL of the image captured at enrollment
    #[serde(default)]
    pub enrolled_image_url: Option<String>,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProfilePhoto {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub profile_photo_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SlotWindow {
    pub slot: u8,
    pub start_24hr: String,
    pub end_24hr: String,
    pub start_12hr: String,
    pub end_12hr: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CurrentSlot {
    pub current_slot: Option<u8>,
    pub current_day: u8,
    pub current_time: String,
    pub current_date: NaiveDate,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub slot_times: Vec<SlotWindow>,
}

/// Identity of one attendance write. The server refuses a second write
/// with the same key, so retries and double submits cannot duplicate rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    pub student: String,
    pub class_id: i64,
    pub slot_number: u8,
    pub date: NaiveDate,
    pub method: MarkingMethod,
    /// Set for instant marks, so each window gets its own key
    pub instant_code: Option<String>,
}

impl AttendanceKey {
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.student.as_bytes());
        hasher.update(b"|");
        hasher.update(self.class_id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.slot_number.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.date.format("%Y-%m-%d").to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.method.as_str().as_bytes());
        if let Some(code) = &self.instant_code {
            hasher.update(b"|");
            hasher.update(code.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::messages::FailureKind;

    #[test]
    fn failed_envelope_becomes_classified_remote_error() {
        let body = r#"{"success": false, "message": "Your enrollment is pending teacher approval."}"#;
        let envelope: ApiEnvelope<ValidatedPassword> = serde_json::from_str(body).unwrap();
        let err = envelope.into_data().unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::PendingApproval);
    }

    #[test]
    fn parses_grant_with_campus_offset() {
        let body = r#"{
            "success": true,
            "message": "Instant password generated successfully",
            "data": {
                "password": "482913",
                "expires_at": "2025-03-10T09:33:00+05:30",
                "class_id": 7,
                "class_name": "Physics 201"
            }
        }"#;
        let envelope: ApiEnvelope<InstantPasswordGrant> = serde_json::from_str(body).unwrap();
        let grant = envelope.into_data().unwrap();
        assert_eq!(grant.expires_at.to_rfc3339(), "2025-03-10T04:03:00+00:00");
        assert_eq!(grant.class_name.as_deref(), Some("Physics 201"));
    }

    #[test]
    fn successful_envelope_without_data_is_none() {
        let body = r#"{"success": true, "data": null, "message": "No attendance found"}"#;
        let envelope: ApiEnvelope<AttendanceRecord> = serde_json::from_str(body).unwrap();
        assert!(envelope.into_result().unwrap().is_none());
    }

    #[test]
    fn marking_methods_use_backend_names() {
        let json = serde_json::to_string(&MarkingMethod::InstantPassword).unwrap();
        assert_eq!(json, "\"instant_password\"");
        let method: MarkingMethod = serde_json::from_str("\"face_recognition\"").unwrap();
        assert_eq!(method, MarkingMethod::FaceRecognition);
    }

    #[test]
    fn idempotency_key_depends_on_every_field() {
        let base = AttendanceKey {
            student: "uid-1".into(),
            class_id: 3,
            slot_number: 2,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            method: MarkingMethod::FaceRecognition,
            instant_code: None,
        };
        let key = base.idempotency_key();
        assert_eq!(key.len(), 64);
        assert_eq!(key, base.clone().idempotency_key());

        let mut other_slot = base.clone();
        other_slot.slot_number = 3;
        assert_ne!(key, other_slot.idempotency_key());

        let mut other_method = base.clone();
        other_method.method = MarkingMethod::Teacher;
        assert_ne!(key, other_method.idempotency_key());

        let mut with_code = base;
        with_code.instant_code = Some("482913".into());
        let mut other_code = with_code.clone();
        other_code.instant_code = Some("105562".into());
        assert_ne!(key, with_code.idempotency_key());
        assert_ne!(with_code.idempotency_key(), other_code.idempotency_key());
    }

    #[test]
    fn keys_can_index_a_set() {
        let key = AttendanceKey {
            student: "uid-1".into(),
            class_id: 3,
            slot_number: 2,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            method: MarkingMethod::InstantPassword,
            instant_code: Some("482913".into()),
        };
        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(key.clone()));
        assert!(!seen.insert(key));
    }

    #[test]
    fn envelope_without_data_parses_for_any_payload() {
        let body = r#"{"success": true, "message": "Password invalidated"}"#;
        let envelope: ApiEnvelope<ValidatedPassword> = serde_json::from_str(body).unwrap();
        assert!(envelope.data.is_none());
        assert!(envelope.into_result().unwrap().is_none());
    }

    #[test]
    fn recognize_response_tolerates_missing_fields() {
        let body = r#"{"success": true, "recognized": false, "liveness_check": true, "message": "No face detected in the image."}"#;
        let resp: RecognizeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.liveness_check, Some(true));
        assert!(resp.confidence.is_none());
    }
}
