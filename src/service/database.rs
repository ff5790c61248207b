use chrono::NaiveDate;
use image::DynamicImage;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde_json::json;

use crate::common::config::DatabaseConfig;
use crate::common::error::{AttendanceError, Result};
use crate::core::password::InstantCode;
use crate::service::face_api::encode_jpeg;
use crate::service::http::{build_client, join_url, read_envelope, read_json};
use crate::service::protocol::*;

/// Everything the client reads from or writes to the attendance store.
///
/// Implementations enforce the store's own rules (ownership, one row per
/// student, class, slot and day); callers only see the outcome. A refused
/// request comes back as `AttendanceError::Remote` with the message
/// classified into a `FailureKind`.
pub trait RemoteDatabase: Send + Sync {
    fn create_user(&self, profile: &NewUserProfile) -> Result<UserProfile>;

    /// `Ok(None)` when the identity has no profile yet
    fn get_user_by_external_id(&self, uid: &str) -> Result<Option<UserProfile>>;

    fn update_user_profile(&self, uid: &str, update: &ProfileUpdate) -> Result<UserProfile>;

    fn get_students(&self) -> Result<Vec<UserProfile>>;

    fn create_class(&self, class: &NewClass) -> Result<ClassInfo>;

    fn update_class(&self, class_id: i64, class: &NewClass) -> Result<ClassInfo>;

    fn delete_class(&self, class_id: i64, teacher_uid: &str) -> Result<()>;

    fn get_classes_by_teacher(&self, teacher_uid: &str) -> Result<Vec<ClassInfo>>;

    fn get_classes_by_student(&self, student_uid: &str) -> Result<Vec<StudentClass>>;

    fn get_available_classes(&self) -> Result<Vec<AvailableClass>>;

    /// Returns the server's confirmation text
    fn join_class(&self, class_id: i64, student_uid: &str) -> Result<String>;

    fn get_class_students(&self, class_id: i64) -> Result<Vec<RosterEntry>>;

    fn approve_student(&self, class_id: i64, student_id: i64, teacher_uid: &str) -> Result<()>;

    /// Enroll every student whose student ID sorts within `start..=end`
    fn add_students_to_class(
        &self,
        class_id: i64,
        start_student_id: &str,
        end_student_id: &str,
        teacher_uid: &str,
    ) -> Result<AddedStudents>;

    /// Direct (face) and teacher writes. Teacher writes overwrite an
    /// existing row for the slot; every other method is refused once the
    /// slot is marked. Replaying the same idempotency key returns the
    /// original receipt.
    fn mark_attendance(&self, request: &MarkAttendance) -> Result<AttendanceReceipt>;

    fn check_attendance(
        &self,
        student_uid: &str,
        class_id: i64,
        date: NaiveDate,
        slot_number: Option<u8>,
    ) -> Result<Option<AttendanceRecord>>;

    fn get_attendance_by_user(
        &self,
        uid: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>>;

    fn get_all_attendance(
        &self,
        teacher_uid: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>>;

    fn generate_instant_password(
        &self,
        class_id: i64,
        slot_number: u8,
        teacher_uid: &str,
    ) -> Result<InstantPasswordGrant>;

    fn validate_instant_password(&self, code: &InstantCode, student_uid: &str)
        -> Result<ValidatedPassword>;

    fn mark_instant_attendance(
        &self,
        code: &InstantCode,
        student_uid: &str,
        key: &AttendanceKey,
    ) -> Result<AttendanceReceipt>;

    fn invalidate_instant_password(&self, code: &str, teacher_uid: &str) -> Result<()>;

    fn create_timetable(&self, slot: &NewTimetableSlot) -> Result<TimetableSlot>;

    fn get_timetable_by_teacher(&self, teacher_uid: &str) -> Result<Vec<TimetableSlot>>;

    fn get_timetable_by_student(&self, student_uid: &str) -> Result<Vec<TimetableSlot>>;

    fn get_all_subjects(&self) -> Result<Vec<Subject>>;

    /// Returns the stored photo URL
    fn save_profile_photo(&self, uid: &str, photo: &DynamicImage) -> Result<String>;

    fn get_profile_photo(&self, uid: &str) -> Result<Option<String>>;
}

/// `RemoteDatabase` over the backend's `/api/*` routes
pub struct RestDatabase {
    base_url: String,
    http: Client,
}

impl RestDatabase {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.clone(),
            http: build_client(config.timeout_seconds, config.api_key.as_deref())?,
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(start) = start {
            query.push(("start_date", start.to_string()));
        }
        if let Some(end) = end {
            query.push(("end_date", end.to_string()));
        }
        query
    }
}

impl RemoteDatabase for RestDatabase {
    fn create_user(&self, profile: &NewUserProfile) -> Result<UserProfile> {
        let response = self.http.post(self.url("/api/users")).json(profile).send()?;
        read_envelope(response)?.into_data()
    }

    fn get_user_by_external_id(&self, uid: &str) -> Result<Option<UserProfile>> {
        let response = self.http.get(self.url(&format!("/api/users/{}", uid))).send()?;
        let envelope: ApiEnvelope<UserProfile> = read_envelope(response)?;
        match envelope.into_result() {
            Ok(profile) => Ok(profile),
            Err(AttendanceError::Remote { message, .. }) if message == "User not found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn update_user_profile(&self, uid: &str, update: &ProfileUpdate) -> Result<UserProfile> {
        let response = self
            .http
            .put(self.url(&format!("/api/users/{}/profile", uid)))
            .json(update)
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn get_students(&self) -> Result<Vec<UserProfile>> {
        let response = self.http.get(self.url("/api/users/students")).send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn create_class(&self, class: &NewClass) -> Result<ClassInfo> {
        let response = self.http.post(self.url("/api/classes")).json(class).send()?;
        read_envelope(response)?.into_data()
    }

    fn update_class(&self, class_id: i64, class: &NewClass) -> Result<ClassInfo> {
        let response = self
            .http
            .put(self.url(&format!("/api/classes/{}", class_id)))
            .json(class)
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn delete_class(&self, class_id: i64, teacher_uid: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/classes/{}", class_id)))
            .json(&json!({ "teacher_firebase_id": teacher_uid }))
            .send()?;
        read_envelope::<serde_json::Value>(response)?.into_result()?;
        Ok(())
    }

    fn get_classes_by_teacher(&self, teacher_uid: &str) -> Result<Vec<ClassInfo>> {
        let response = self
            .http
            .get(self.url(&format!("/api/classes/teacher/{}", teacher_uid)))
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn get_classes_by_student(&self, student_uid: &str) -> Result<Vec<StudentClass>> {
        let response = self
            .http
            .get(self.url(&format!("/api/classes/student/{}", student_uid)))
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn get_available_classes(&self) -> Result<Vec<AvailableClass>> {
        let response = self.http.get(self.url("/api/classes/available")).send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn join_class(&self, class_id: i64, student_uid: &str) -> Result<String> {
        let response = self
            .http
            .post(self.url("/api/classes/join"))
            .json(&json!({ "class_id": class_id, "firebase_id": student_uid }))
            .send()?;
        let envelope: ApiEnvelope<serde_json::Value> = read_envelope(response)?;
        let message = envelope.message.clone().unwrap_or_else(|| "Joined class".into());
        envelope.into_result()?;
        Ok(message)
    }

    fn get_class_students(&self, class_id: i64) -> Result<Vec<RosterEntry>> {
        let response = self
            .http
            .get(self.url(&format!("/api/classes/{}/students", class_id)))
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn approve_student(&self, class_id: i64, student_id: i64, teacher_uid: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/classes/{}/approve", class_id)))
            .json(&json!({ "student_id": student_id, "teacher_firebase_id": teacher_uid }))
            .send()?;
        read_envelope::<serde_json::Value>(response)?.into_result()?;
        Ok(())
    }

    fn add_students_to_class(
        &self,
        class_id: i64,
        start_student_id: &str,
        end_student_id: &str,
        teacher_uid: &str,
    ) -> Result<AddedStudents> {
        let response = self
            .http
            .post(self.url("/api/classes/add-students"))
            .json(&json!({
                "class_id": class_id,
                "start_student_id": start_student_id,
                "end_student_id": end_student_id,
                "teacher_firebase_id": teacher_uid,
            }))
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn mark_attendance(&self, request: &MarkAttendance) -> Result<AttendanceReceipt> {
        let path = match request.marked_by {
            MarkingMethod::Teacher => "/api/attendance/mark-manual",
            _ => "/api/attendance",
        };
        let response = self
            .http
            .post(self.url(path))
            .header(IDEMPOTENCY_HEADER, request.key().idempotency_key())
            .json(request)
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn check_attendance(
        &self,
        student_uid: &str,
        class_id: i64,
        date: NaiveDate,
        slot_number: Option<u8>,
    ) -> Result<Option<AttendanceRecord>> {
        let mut query = vec![
            ("student_firebase_id", student_uid.to_string()),
            ("class_id", class_id.to_string()),
            ("date", date.to_string()),
        ];
        if let Some(slot) = slot_number {
            query.push(("slot_number", slot.to_string()));
        }
        let response = self
            .http
            .get(self.url("/api/attendance/check"))
            .query(&query)
            .send()?;
        read_envelope(response)?.into_result()
    }

    fn get_attendance_by_user(
        &self,
        uid: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>> {
        let response = self
            .http
            .get(self.url(&format!("/api/attendance/{}", uid)))
            .query(&Self::date_range(start, end))
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn get_all_attendance(
        &self,
        teacher_uid: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut query = Self::date_range(start, end);
        if let Some(teacher) = teacher_uid {
            query.push(("teacher_firebase_id", teacher.to_string()));
        }
        let response = self
            .http
            .get(self.url("/api/attendance/all"))
            .query(&query)
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn generate_instant_password(
        &self,
        class_id: i64,
        slot_number: u8,
        teacher_uid: &str,
    ) -> Result<InstantPasswordGrant> {
        let response = self
            .http
            .post(self.url("/api/instant-password/generate"))
            .json(&json!({
                "class_id": class_id,
                "slot_number": slot_number,
                "teacher_firebase_id": teacher_uid,
            }))
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn validate_instant_password(
        &self,
        code: &InstantCode,
        student_uid: &str,
    ) -> Result<ValidatedPassword> {
        let response = self
            .http
            .post(self.url("/api/instant-attendance/validate"))
            .json(&json!({ "password": code.as_str(), "student_firebase_id": student_uid }))
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn mark_instant_attendance(
        &self,
        code: &InstantCode,
        student_uid: &str,
        key: &AttendanceKey,
    ) -> Result<AttendanceReceipt> {
        let response = self
            .http
            .post(self.url("/api/instant-attendance/mark"))
            .header(IDEMPOTENCY_HEADER, key.idempotency_key())
            .json(&json!({ "password": code.as_str(), "student_firebase_id": student_uid }))
            .send()?;
        read_envelope(response)?.into_data()
    }

    fn invalidate_instant_password(&self, code: &str, teacher_uid: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/api/instant-password/invalidate"))
            .json(&json!({ "password": code, "teacher_firebase_id": teacher_uid }))
            .send()?;
        read_envelope::<serde_json::Value>(response)?.into_result()?;
        Ok(())
    }

    fn create_timetable(&self, slot: &NewTimetableSlot) -> Result<TimetableSlot> {
        let response = self.http.post(self.url("/api/timetables")).json(slot).send()?;
        read_envelope(response)?.into_data()
    }

    fn get_timetable_by_teacher(&self, teacher_uid: &str) -> Result<Vec<TimetableSlot>> {
        let response = self
            .http
            .get(self.url(&format!("/api/timetables/teacher/{}", teacher_uid)))
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn get_timetable_by_student(&self, student_uid: &str) -> Result<Vec<TimetableSlot>> {
        let response = self
            .http
            .get(self.url(&format!("/api/timetables/student/{}", student_uid)))
            .send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn get_all_subjects(&self) -> Result<Vec<Subject>> {
        let response = self.http.get(self.url("/api/subjects")).send()?;
        Ok(read_envelope(response)?.into_result()?.unwrap_or_default())
    }

    fn save_profile_photo(&self, uid: &str, photo: &DynamicImage) -> Result<String> {
        let part = Part::bytes(encode_jpeg(photo)?)
            .file_name("profile.jpg")
            .mime_str("image/jpeg")?;
        let response = self
            .http
            .post(self.url(&format!("/api/profile-photo/{}", uid)))
            .multipart(Form::new().part("image", part))
            .send()?;
        let saved: ProfilePhoto = read_json(response)?;
        if !saved.success {
            return Err(AttendanceError::remote(
                saved.message.unwrap_or_else(|| "Failed to save profile photo".into()),
            ));
        }
        saved.profile_photo_url.ok_or_else(|| {
            AttendanceError::Other(anyhow::anyhow!("Profile photo saved without a URL"))
        })
    }

    fn get_profile_photo(&self, uid: &str) -> Result<Option<String>> {
        let response = self
            .http
            .get(self.url(&format!("/api/profile-photo/{}", uid)))
            .send()?;
        let photo: ProfilePhoto = read_json(response)?;
        if !photo.success {
            return Err(AttendanceError::remote(
                photo.message.unwrap_or_else(|| "Failed to fetch profile photo".into()),
            ));
        }
        Ok(photo.profile_photo_url)
    }
}
