//! In-process stand-in for the attendance backend, the face service and the
//! auth provider.
//!
//! It enforces the same rules the hosted services do (ownership checks, one
//! attendance row per student, class, slot and day, three-minute instant
//! codes, idempotent writes) so the flows can be exercised offline. With a
//! snapshot path the whole state is written back as JSON after every change,
//! which is how `--dev` runs keep their data between invocations.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Utc};
use image::imageops::FilterType;
use image::DynamicImage;
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::clock::Clock;
use crate::common::config::Config;
use crate::common::error::{AttendanceError, Result};
use crate::core::password::InstantCode;
use crate::core::quality::FrameQuality;
use crate::core::slots::SlotSchedule;
use crate::service::database::RemoteDatabase;
use crate::service::face_api::RecognitionService;
use crate::service::protocol::*;
use crate::session::events::{AuthEvent, Subscribers, Subscription};
use crate::session::rest::friendly_auth_error;
use crate::session::{AuthProvider, Identity};

pub const PASSWORD_LIFETIME_MINUTES: i64 = 3;

/// Hamming distance (out of 64) at which two face fingerprints still match
const MATCH_DISTANCE: u32 = 12;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    uid: String,
    email: String,
    /// PHC string; `None` for accounts created through a provider token
    password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassRow {
    id: i64,
    name: String,
    subject: String,
    description: String,
    teacher_id: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnrollmentRow {
    class_id: i64,
    student_id: i64,
    status: MembershipStatus,
    enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttendanceRow {
    id: i64,
    student_id: i64,
    class_id: i64,
    slot_number: u8,
    day_of_week: u8,
    attendance_date: NaiveDate,
    status: AttendanceStatus,
    marked_by: MarkingMethod,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PasswordRow {
    class_id: i64,
    slot_number: u8,
    teacher_id: i64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimetableRow {
    id: i64,
    class_id: i64,
    teacher_id: i64,
    day_of_week: u8,
    slot_number: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncodingRow {
    fingerprint: u64,
    enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct State {
    version: u32,
    next_id: i64,
    accounts: Vec<Account>,
    users: Vec<UserProfile>,
    classes: Vec<ClassRow>,
    enrollments: Vec<EnrollmentRow>,
    attendance: Vec<AttendanceRow>,
    /// Receipts of accepted writes, keyed by idempotency key
    receipts: BTreeMap<String, AttendanceReceipt>,
    passwords: BTreeMap<String, PasswordRow>,
    timetable: Vec<TimetableRow>,
    encodings: BTreeMap<String, EncodingRow>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_id: 0,
            accounts: Vec::new(),
            users: Vec::new(),
            classes: Vec::new(),
            enrollments: Vec::new(),
            attendance: Vec::new(),
            receipts: BTreeMap::new(),
            passwords: BTreeMap::new(),
            timetable: Vec::new(),
            encodings: BTreeMap::new(),
        }
    }
}

fn not_found(what: &str) -> AttendanceError {
    AttendanceError::remote(format!("{} not found", what))
}

fn check_slot(slot_number: u8) -> Result<()> {
    if !(1..=9).contains(&slot_number) {
        return Err(AttendanceError::remote("Slot number must be between 1 and 9"));
    }
    Ok(())
}

fn already_marked(slot_number: u8, at: DateTime<FixedOffset>) -> AttendanceError {
    AttendanceError::remote(format!(
        "Attendance already marked for slot {} today at {}",
        slot_number,
        at.format("%I:%M %p")
    ))
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user(&self, uid: &str) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.firebase_id == uid)
    }

    fn user_by_id(&self, id: i64) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.id == id)
    }

    fn teacher(&self, uid: &str) -> Result<&UserProfile> {
        self.user(uid)
            .filter(|u| u.role == Role::Teacher)
            .ok_or_else(|| not_found("Teacher"))
    }

    fn student(&self, uid: &str) -> Result<&UserProfile> {
        self.user(uid)
            .filter(|u| u.role == Role::Student)
            .ok_or_else(|| not_found("Student"))
    }

    fn class(&self, class_id: i64) -> Option<&ClassRow> {
        self.classes.iter().find(|c| c.id == class_id)
    }

    fn owned_class(&self, class_id: i64, teacher_uid: &str) -> Result<&ClassRow> {
        let teacher_id = self.teacher(teacher_uid)?.id;
        self.class(class_id)
            .filter(|c| c.teacher_id == teacher_id)
            .ok_or_else(|| AttendanceError::remote("Unauthorized or class not found"))
    }

    fn teacher_name(&self, class: &ClassRow) -> Option<String> {
        self.user_by_id(class.teacher_id).map(|t| t.name.clone())
    }

    fn enrollment(&self, class_id: i64, student_id: i64) -> Option<&EnrollmentRow> {
        self.enrollments
            .iter()
            .find(|e| e.class_id == class_id && e.student_id == student_id)
    }

    fn approved_count(&self, class_id: i64) -> u32 {
        self.enrollments
            .iter()
            .filter(|e| e.class_id == class_id && e.status == MembershipStatus::Approved)
            .count() as u32
    }

    fn require_approved(&self, class_id: i64, student_id: i64) -> Result<()> {
        match self.enrollment(class_id, student_id).map(|e| e.status) {
            Some(MembershipStatus::Approved) => Ok(()),
            Some(MembershipStatus::Pending) => Err(AttendanceError::remote(
                "Your enrollment in this class is pending approval.",
            )),
            _ => Err(AttendanceError::remote(
                "You are not enrolled in this class. Please join the class first",
            )),
        }
    }

    /// Instant codes enroll and approve the student on the spot
    fn approve_on_the_spot(&mut self, class_id: i64, student_id: i64, now: DateTime<Utc>) {
        match self
            .enrollments
            .iter_mut()
            .find(|e| e.class_id == class_id && e.student_id == student_id)
        {
            Some(row) => row.status = MembershipStatus::Approved,
            None => self.enrollments.push(EnrollmentRow {
                class_id,
                student_id,
                status: MembershipStatus::Approved,
                enrolled_at: now,
            }),
        }
    }

    fn existing_mark(&self, student_id: i64, class_id: i64, slot: u8, date: NaiveDate) -> Option<&AttendanceRow> {
        self.attendance.iter().find(|a| {
            a.student_id == student_id
                && a.class_id == class_id
                && a.slot_number == slot
                && a.attendance_date == date
        })
    }

    fn insert_attendance(
        &mut self,
        student_id: i64,
        class_id: i64,
        slot_number: u8,
        date: NaiveDate,
        status: AttendanceStatus,
        marked_by: MarkingMethod,
        now: DateTime<Utc>,
    ) {
        let id = self.next_id();
        self.attendance.push(AttendanceRow {
            id,
            student_id,
            class_id,
            slot_number,
            day_of_week: SlotSchedule::day_of_week(date),
            attendance_date: date,
            status,
            marked_by,
            created_at: now,
            updated_at: None,
        });
    }

    fn record(&self, row: &AttendanceRow) -> AttendanceRecord {
        let class = self.class(row.class_id);
        AttendanceRecord {
            id: row.id,
            student_id: row.student_id,
            class_id: row.class_id,
            slot_number: row.slot_number,
            day_of_week: Some(row.day_of_week),
            attendance_date: row.attendance_date,
            status: row.status,
            marked_by: row.marked_by,
            created_at: Some(row.created_at),
            class_name: class.map(|c| c.name.clone()),
            subject: class.map(|c| c.subject.clone()),
            teacher_name: class.and_then(|c| self.teacher_name(c)),
        }
    }

    fn records<'a>(
        &self,
        rows: impl Iterator<Item = &'a AttendanceRow>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Vec<AttendanceRecord> {
        let mut records: Vec<AttendanceRecord> = rows
            .filter(|a| start.map_or(true, |s| a.attendance_date >= s))
            .filter(|a| end.map_or(true, |e| a.attendance_date <= e))
            .map(|a| self.record(a))
            .collect();
        records.sort_by(|a, b| {
            b.attendance_date
                .cmp(&a.attendance_date)
                .then(b.slot_number.cmp(&a.slot_number))
        });
        records
    }

    fn class_info(&self, class: &ClassRow) -> ClassInfo {
        ClassInfo {
            id: class.id,
            name: class.name.clone(),
            subject: class.subject.clone(),
            description: Some(class.description.clone()),
            teacher_id: Some(class.teacher_id),
            student_count: Some(self.approved_count(class.id)),
            created_at: Some(class.created_at),
        }
    }

    /// Receipts only answer retries made on the day of the write.
    fn prune_receipts(&mut self, today: NaiveDate, schedule: &SlotSchedule) {
        let before = self.receipts.len();
        self.receipts
            .retain(|_, receipt| schedule.today(receipt.marked_at) >= today);
        let pruned = before - self.receipts.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} attendance receipts from earlier days", pruned);
        }
    }

    /// A live code, or the backend's refusal. Expired codes are dropped.
    fn active_password(&mut self, code: &InstantCode, now: DateTime<Utc>) -> Result<PasswordRow> {
        let row = self.passwords.get(code.as_str()).cloned().ok_or_else(|| {
            AttendanceError::remote("Invalid or expired password. Please check with your teacher.")
        })?;
        if now >= row.expires_at {
            self.passwords.remove(code.as_str());
            return Err(AttendanceError::remote(
                "Password has expired. Please ask your teacher for a new one.",
            ));
        }
        Ok(row)
    }

    fn timetable_slot(&self, row: &TimetableRow, schedule: &SlotSchedule, nested: bool) -> TimetableSlot {
        let class = self.class(row.class_id);
        let times = schedule.slot(row.slot_number);
        TimetableSlot {
            id: row.id,
            day_of_week: row.day_of_week,
            slot_number: row.slot_number,
            start_time: times.map(|t| t.start.format("%H:%M").to_string()).unwrap_or_default(),
            end_time: times.map(|t| t.end.format("%H:%M").to_string()).unwrap_or_default(),
            class_id: Some(row.class_id),
            class_name: if nested { None } else { class.map(|c| c.name.clone()) },
            subject: if nested { None } else { class.map(|c| c.subject.clone()) },
            teacher_name: class.and_then(|c| self.teacher_name(c)),
            class: if nested {
                class.map(|c| TimetableClass {
                    id: c.id,
                    name: c.name.clone(),
                    subject: c.subject.clone(),
                })
            } else {
                None
            },
        }
    }
}

/// 8x8 average hash of the frame's luma
fn fingerprint(frame: &DynamicImage) -> u64 {
    let small = frame.resize_exact(8, 8, FilterType::Triangle).to_luma8();
    let mean = small.pixels().map(|p| p[0] as u32).sum::<u32>() / 64;
    small
        .pixels()
        .enumerate()
        .fold(0u64, |bits, (i, p)| if p[0] as u32 > mean { bits | (1 << i) } else { bits })
}

/// A frame with no edges at all is treated as a photo of a flat surface
fn liveness_failure(frame: &DynamicImage) -> Option<serde_json::Value> {
    let quality = FrameQuality::measure(frame);
    if quality.sharpness > 0.0 {
        return None;
    }
    Some(json!({
        "brightness": quality.brightness,
        "sharpness": quality.sharpness,
        "reason": "no facial texture detected",
    }))
}

fn random_hex() -> String {
    let bytes: [u8; 32] = thread_rng().gen();
    hex::encode(Sha256::digest(bytes))
}

pub struct MemoryBackend {
    state: Mutex<State>,
    snapshot: Option<PathBuf>,
    schedule: SlotSchedule,
    frozen_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    current: Mutex<Option<Identity>>,
    subscribers: Subscribers,
}

impl MemoryBackend {
    pub fn new(schedule: SlotSchedule) -> Self {
        Self {
            state: Mutex::new(State::default()),
            snapshot: None,
            schedule,
            frozen_at: Arc::new(Mutex::new(None)),
            current: Mutex::new(None),
            subscribers: Subscribers::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(SlotSchedule::campus(config.schedule.utc_offset_minutes))
    }

    /// Load the snapshot at `path` if there is one; every later change is
    /// written back to it.
    pub fn open(schedule: SlotSchedule, path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let bytes = fs::read(path)?;
            let state: State = serde_json::from_slice(&bytes)?;
            if state.version != SNAPSHOT_VERSION {
                return Err(AttendanceError::Storage(format!(
                    "Offline backend snapshot version mismatch: expected {}, got {}",
                    SNAPSHOT_VERSION, state.version
                )));
            }
            tracing::debug!(
                "Loaded offline backend: {} users, {} classes, {} attendance rows",
                state.users.len(),
                state.classes.len(),
                state.attendance.len()
            );
            state
        } else {
            State::default()
        };

        let mut backend = Self::new(schedule);
        backend.state = Mutex::new(state);
        backend.snapshot = Some(path.to_path_buf());
        Ok(backend)
    }

    pub fn schedule(&self) -> &SlotSchedule {
        &self.schedule
    }

    /// Pin the backend's clock. Unfrozen, it follows the system clock.
    pub fn freeze_clock(&self, at: DateTime<Utc>) {
        if let Ok(mut frozen) = self.frozen_at.lock() {
            *frozen = Some(at);
        }
    }

    pub fn advance_clock(&self, by: ChronoDuration) {
        if let Ok(mut frozen) = self.frozen_at.lock() {
            *frozen = Some(frozen.unwrap_or_else(Utc::now) + by);
        }
    }

    /// The backend's notion of "now", for flows that must agree with it
    pub fn clock(&self) -> Clock {
        let frozen_at = Arc::clone(&self.frozen_at);
        Arc::new(move || {
            frozen_at
                .lock()
                .ok()
                .and_then(|f| *f)
                .unwrap_or_else(Utc::now)
        })
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock())()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AttendanceError::Storage("Offline backend state is poisoned".into()))
    }

    fn read<T>(&self, op: impl FnOnce(&State, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let now = self.now();
        let state = self.lock()?;
        op(&state, now)
    }

    /// Run a mutation and persist the result, refused or not: a refusal may
    /// still have dropped an expired code.
    fn write<T>(&self, op: impl FnOnce(&mut State, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let now = self.now();
        let mut state = self.lock()?;
        state.prune_receipts(self.schedule.today(now), &self.schedule);
        let outcome = op(&mut state, now);
        self.persist(&state)?;
        outcome
    }

    fn persist(&self, state: &State) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(state)?)?;
        Ok(())
    }

    fn set_current(&self, identity: Option<Identity>) {
        if let Ok(mut current) = self.current.lock() {
            *current = identity.clone();
        }
        self.subscribers.notify(match identity {
            Some(identity) => AuthEvent::SignedIn(identity),
            None => AuthEvent::SignedOut,
        });
    }

    fn issue_identity(account: &Account) -> Identity {
        Identity {
            uid: account.uid.clone(),
            email: account.email.clone(),
            id_token: random_hex(),
        }
    }
}

impl RemoteDatabase for MemoryBackend {
    fn create_user(&self, profile: &NewUserProfile) -> Result<UserProfile> {
        self.write(|state, now| {
            if state.user(&profile.firebase_id).is_some() {
                return Err(AttendanceError::remote("User already exists"));
            }
            if profile.name.trim().chars().count() < 2 {
                return Err(AttendanceError::remote("Name must be at least 2 characters long"));
            }
            if let Some(student_id) = &profile.student_id {
                if state.users.iter().any(|u| u.student_id.as_ref() == Some(student_id)) {
                    return Err(AttendanceError::remote("Student ID is already taken by another user"));
                }
            }
            let user = UserProfile {
                id: state.next_id(),
                firebase_id: profile.firebase_id.clone(),
                email: profile.email.clone(),
                name: profile.name.clone(),
                role: profile.role,
                student_id: profile.student_id.clone(),
                subject: profile.subject.clone(),
                profile_photo_url: None,
                created_at: Some(now),
            };
            state.users.push(user.clone());
            tracing::debug!("Created {} profile {} ({})", user.role, user.id, user.name);
            Ok(user)
        })
    }

    fn get_user_by_external_id(&self, uid: &str) -> Result<Option<UserProfile>> {
        self.read(|state, _| Ok(state.user(uid).cloned()))
    }

    fn update_user_profile(&self, uid: &str, update: &ProfileUpdate) -> Result<UserProfile> {
        self.write(|state, _| {
            let id = state.user(uid).ok_or_else(|| not_found("User"))?.id;
            if let Some(name) = &update.name {
                if name.trim().chars().count() < 2 {
                    return Err(AttendanceError::remote("Name must be at least 2 characters long"));
                }
            }
            if let Some(student_id) = &update.student_id {
                let taken = state
                    .users
                    .iter()
                    .any(|u| u.id != id && u.student_id.as_ref() == Some(student_id));
                if taken {
                    return Err(AttendanceError::remote("Student ID is already taken by another user"));
                }
            }

            let user = state
                .users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or_else(|| not_found("User"))?;
            if let Some(name) = &update.name {
                user.name = name.trim().to_string();
            }
            if let Some(student_id) = &update.student_id {
                user.student_id = Some(student_id.trim().to_string());
            }
            if let Some(subject) = &update.subject {
                user.subject = Some(subject.trim().to_string());
            }
            Ok(user.clone())
        })
    }

    fn get_students(&self) -> Result<Vec<UserProfile>> {
        self.read(|state, _| {
            let mut students: Vec<UserProfile> = state
                .users
                .iter()
                .filter(|u| u.role == Role::Student)
                .cloned()
                .collect();
            students.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(students)
        })
    }

    fn create_class(&self, class: &NewClass) -> Result<ClassInfo> {
        self.write(|state, now| {
            let teacher_id = state.teacher(&class.teacher_firebase_id)?.id;
            if class.name.trim().is_empty() || class.subject.trim().is_empty() {
                return Err(AttendanceError::remote("Class name and subject are required"));
            }
            let row = ClassRow {
                id: state.next_id(),
                name: class.name.trim().to_string(),
                subject: class.subject.trim().to_string(),
                description: class.description.trim().to_string(),
                teacher_id,
                created_at: now,
            };
            let info = state.class_info(&row);
            state.classes.push(row);
            Ok(info)
        })
    }

    fn update_class(&self, class_id: i64, class: &NewClass) -> Result<ClassInfo> {
        self.write(|state, _| {
            state.owned_class(class_id, &class.teacher_firebase_id)?;
            let row = state
                .classes
                .iter_mut()
                .find(|c| c.id == class_id)
                .ok_or_else(|| not_found("Class"))?;
            row.name = class.name.trim().to_string();
            row.subject = class.subject.trim().to_string();
            row.description = class.description.trim().to_string();
            let row = row.clone();
            Ok(state.class_info(&row))
        })
    }

    fn delete_class(&self, class_id: i64, teacher_uid: &str) -> Result<()> {
        self.write(|state, _| {
            state.owned_class(class_id, teacher_uid)?;
            state.classes.retain(|c| c.id != class_id);
            state.enrollments.retain(|e| e.class_id != class_id);
            state.attendance.retain(|a| a.class_id != class_id);
            state.timetable.retain(|t| t.class_id != class_id);
            state.passwords.retain(|_, p| p.class_id != class_id);
            Ok(())
        })
    }

    fn get_classes_by_teacher(&self, teacher_uid: &str) -> Result<Vec<ClassInfo>> {
        self.read(|state, _| {
            let teacher_id = state.teacher(teacher_uid)?.id;
            Ok(state
                .classes
                .iter()
                .filter(|c| c.teacher_id == teacher_id)
                .map(|c| state.class_info(c))
                .collect())
        })
    }

    fn get_classes_by_student(&self, student_uid: &str) -> Result<Vec<StudentClass>> {
        self.read(|state, _| {
            let student_id = state.student(student_uid)?.id;
            Ok(state
                .enrollments
                .iter()
                .filter(|e| e.student_id == student_id)
                .filter_map(|e| {
                    let class = state.class(e.class_id)?;
                    let teacher = state.user_by_id(class.teacher_id);
                    Some(StudentClass {
                        id: class.id,
                        name: class.name.clone(),
                        subject: class.subject.clone(),
                        description: Some(class.description.clone()),
                        teacher_name: teacher.map(|t| t.name.clone()),
                        teacher_firebase_id: teacher.map(|t| t.firebase_id.clone()),
                        status: e.status,
                        enrolled_at: Some(e.enrolled_at),
                    })
                })
                .collect())
        })
    }

    fn get_available_classes(&self) -> Result<Vec<AvailableClass>> {
        self.read(|state, _| {
            Ok(state
                .classes
                .iter()
                .map(|c| AvailableClass {
                    id: c.id,
                    name: c.name.clone(),
                    subject: c.subject.clone(),
                    description: Some(c.description.clone()),
                    teacher_name: state.teacher_name(c),
                    enrolled_students: state.approved_count(c.id),
                })
                .collect())
        })
    }

    fn join_class(&self, class_id: i64, student_uid: &str) -> Result<String> {
        self.write(|state, now| {
            let student_id = state.student(student_uid)?.id;
            let name = state.class(class_id).ok_or_else(|| not_found("Class"))?.name.clone();
            if state.enrollment(class_id, student_id).is_some() {
                return Err(AttendanceError::remote("You are already enrolled in this class"));
            }
            state.enrollments.push(EnrollmentRow {
                class_id,
                student_id,
                status: MembershipStatus::Approved,
                enrolled_at: now,
            });
            Ok(format!("Successfully joined {}", name))
        })
    }

    fn get_class_students(&self, class_id: i64) -> Result<Vec<RosterEntry>> {
        self.read(|state, _| {
            state.class(class_id).ok_or_else(|| not_found("Class"))?;
            let mut roster: Vec<RosterEntry> = state
                .enrollments
                .iter()
                .filter(|e| e.class_id == class_id)
                .filter_map(|e| {
                    let student = state.user_by_id(e.student_id)?;
                    Some(RosterEntry {
                        id: student.id,
                        name: student.name.clone(),
                        email: student.email.clone(),
                        student_id: student.student_id.clone(),
                        firebase_id: student.firebase_id.clone(),
                        status: e.status,
                        enrolled_at: Some(e.enrolled_at),
                    })
                })
                .collect();
            roster.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(roster)
        })
    }

    fn approve_student(&self, class_id: i64, student_id: i64, teacher_uid: &str) -> Result<()> {
        self.write(|state, _| {
            state.owned_class(class_id, teacher_uid)?;
            let row = state
                .enrollments
                .iter_mut()
                .find(|e| e.class_id == class_id && e.student_id == student_id)
                .ok_or_else(|| not_found("Enrollment"))?;
            row.status = MembershipStatus::Approved;
            Ok(())
        })
    }

    fn add_students_to_class(
        &self,
        class_id: i64,
        start_student_id: &str,
        end_student_id: &str,
        teacher_uid: &str,
    ) -> Result<AddedStudents> {
        self.write(|state, now| {
            state.owned_class(class_id, teacher_uid)?;
            let eligible: Vec<i64> = state
                .users
                .iter()
                .filter(|u| u.role == Role::Student)
                .filter(|u| {
                    u.student_id
                        .as_deref()
                        .map_or(false, |sid| sid >= start_student_id && sid <= end_student_id)
                })
                .map(|u| u.id)
                .collect();
            if eligible.is_empty() {
                return Err(AttendanceError::remote(format!(
                    "No students found with IDs between {} and {}",
                    start_student_id, end_student_id
                )));
            }

            let mut added = 0;
            for student_id in &eligible {
                if state.enrollment(class_id, *student_id).is_none() {
                    state.enrollments.push(EnrollmentRow {
                        class_id,
                        student_id: *student_id,
                        status: MembershipStatus::Approved,
                        enrolled_at: now,
                    });
                    added += 1;
                }
            }
            Ok(AddedStudents {
                added_count: added,
                total_eligible: eligible.len() as u32,
            })
        })
    }

    fn mark_attendance(&self, request: &MarkAttendance) -> Result<AttendanceReceipt> {
        let key = request.key().idempotency_key();
        let schedule = &self.schedule;
        self.write(|state, now| {
            // Teacher writes are upserts; replaying them is already harmless
            // and a changed status must not be answered with the old receipt.
            if request.marked_by != MarkingMethod::Teacher {
                if let Some(receipt) = state.receipts.get(&key) {
                    tracing::debug!("Replayed attendance write, returning original receipt");
                    return Ok(receipt.clone());
                }
            }

            check_slot(request.slot_number)?;
            let student = state.student(&request.student_firebase_id)?.clone();
            state.class(request.class_id).ok_or_else(|| not_found("Class"))?;

            if request.marked_by == MarkingMethod::Teacher {
                let teacher_uid = request
                    .teacher_firebase_id
                    .as_deref()
                    .ok_or_else(|| not_found("Teacher"))?;
                state.owned_class(request.class_id, teacher_uid)?;
                if state.enrollment(request.class_id, student.id).is_none() {
                    return Err(AttendanceError::remote("Student is not enrolled in this class"));
                }
                let existing = state.attendance.iter_mut().find(|a| {
                    a.student_id == student.id
                        && a.class_id == request.class_id
                        && a.slot_number == request.slot_number
                        && a.attendance_date == request.attendance_date
                });
                match existing {
                    Some(row) => {
                        row.status = request.status;
                        row.marked_by = MarkingMethod::Teacher;
                        row.updated_at = Some(now);
                    }
                    None => state.insert_attendance(
                        student.id,
                        request.class_id,
                        request.slot_number,
                        request.attendance_date,
                        request.status,
                        MarkingMethod::Teacher,
                        now,
                    ),
                }
            } else {
                state.require_approved(request.class_id, student.id)?;
                if let Some(row) = state.existing_mark(
                    student.id,
                    request.class_id,
                    request.slot_number,
                    request.attendance_date,
                ) {
                    return Err(already_marked(row.slot_number, schedule.local(row.created_at)));
                }
                state.insert_attendance(
                    student.id,
                    request.class_id,
                    request.slot_number,
                    request.attendance_date,
                    request.status,
                    request.marked_by,
                    now,
                );
            }

            let receipt = AttendanceReceipt {
                student_name: student.name,
                status: request.status,
                slot_number: request.slot_number,
                marked_at: now,
            };
            if request.marked_by != MarkingMethod::Teacher {
                state.receipts.insert(key, receipt.clone());
            }
            Ok(receipt)
        })
    }

    fn check_attendance(
        &self,
        student_uid: &str,
        class_id: i64,
        date: NaiveDate,
        slot_number: Option<u8>,
    ) -> Result<Option<AttendanceRecord>> {
        self.read(|state, _| {
            let student_id = state.student(student_uid)?.id;
            Ok(state
                .attendance
                .iter()
                .find(|a| {
                    a.student_id == student_id
                        && a.class_id == class_id
                        && a.attendance_date == date
                        && slot_number.map_or(true, |s| a.slot_number == s)
                })
                .map(|a| state.record(a)))
        })
    }

    fn get_attendance_by_user(
        &self,
        uid: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>> {
        self.read(|state, _| {
            let student_id = state.user(uid).ok_or_else(|| not_found("User"))?.id;
            let rows = state.attendance.iter().filter(|a| a.student_id == student_id);
            Ok(state.records(rows, start, end))
        })
    }

    fn get_all_attendance(
        &self,
        teacher_uid: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>> {
        self.read(|state, _| {
            let owned: Option<BTreeSet<i64>> = match teacher_uid {
                Some(uid) => {
                    let teacher_id = state.teacher(uid)?.id;
                    Some(
                        state
                            .classes
                            .iter()
                            .filter(|c| c.teacher_id == teacher_id)
                            .map(|c| c.id)
                            .collect(),
                    )
                }
                None => None,
            };
            let rows = state
                .attendance
                .iter()
                .filter(|a| owned.as_ref().map_or(true, |ids| ids.contains(&a.class_id)));
            Ok(state.records(rows, start, end))
        })
    }

    fn generate_instant_password(
        &self,
        class_id: i64,
        slot_number: u8,
        teacher_uid: &str,
    ) -> Result<InstantPasswordGrant> {
        self.write(|state, now| {
            check_slot(slot_number)?;
            let class = state.owned_class(class_id, teacher_uid)?.clone();

            // One live code per class and slot
            state
                .passwords
                .retain(|_, p| !(p.class_id == class_id && p.slot_number == slot_number));

            let mut rng = thread_rng();
            let password = loop {
                let candidate = rng.gen_range(100_000..=999_999).to_string();
                if !state.passwords.contains_key(&candidate) {
                    break candidate;
                }
            };
            let expires_at = now + ChronoDuration::minutes(PASSWORD_LIFETIME_MINUTES);
            state.passwords.insert(
                password.clone(),
                PasswordRow {
                    class_id,
                    slot_number,
                    teacher_id: class.teacher_id,
                    expires_at,
                },
            );
            tracing::info!("Instant code issued for class {} slot {}", class_id, slot_number);
            Ok(InstantPasswordGrant {
                password,
                expires_at,
                class_id,
                class_name: Some(class.name),
            })
        })
    }

    fn validate_instant_password(
        &self,
        code: &InstantCode,
        student_uid: &str,
    ) -> Result<ValidatedPassword> {
        let schedule = &self.schedule;
        self.write(|state, now| {
            let password = state.active_password(code, now)?;
            let student = match state.user(student_uid) {
                Some(user) if user.role == Role::Student => user.clone(),
                Some(_) => {
                    return Err(AttendanceError::remote(
                        "Only students can mark attendance using instant passwords",
                    ))
                }
                None => return Err(not_found("Student")),
            };
            let class_name = state
                .class(password.class_id)
                .map(|c| c.name.clone())
                .ok_or_else(|| not_found("Class"))?;

            let today = schedule.today(now);
            if let Some(row) = state.existing_mark(student.id, password.class_id, password.slot_number, today) {
                return Err(already_marked(row.slot_number, schedule.local(row.created_at)));
            }

            Ok(ValidatedPassword {
                class_id: password.class_id,
                class_name,
                student_name: Some(student.name),
                slot_number: Some(password.slot_number),
                valid: true,
            })
        })
    }

    fn mark_instant_attendance(
        &self,
        code: &InstantCode,
        student_uid: &str,
        key: &AttendanceKey,
    ) -> Result<AttendanceReceipt> {
        let idempotency_key = key.idempotency_key();
        let schedule = &self.schedule;
        self.write(|state, now| {
            let password = state.active_password(code, now)?;
            if let Some(receipt) = state.receipts.get(&idempotency_key) {
                tracing::debug!("Replayed instant attendance, returning original receipt");
                return Ok(receipt.clone());
            }

            let student = match state.user(student_uid) {
                Some(user) if user.role == Role::Student => user.clone(),
                Some(_) => {
                    return Err(AttendanceError::remote(
                        "Only students can mark attendance using instant passwords",
                    ))
                }
                None => return Err(not_found("Student")),
            };

            let today = schedule.today(now);
            if let Some(row) = state.existing_mark(student.id, password.class_id, password.slot_number, today) {
                return Err(already_marked(row.slot_number, schedule.local(row.created_at)));
            }

            state.approve_on_the_spot(password.class_id, student.id, now);
            state.insert_attendance(
                student.id,
                password.class_id,
                password.slot_number,
                today,
                AttendanceStatus::Present,
                MarkingMethod::InstantPassword,
                now,
            );

            let receipt = AttendanceReceipt {
                student_name: student.name,
                status: AttendanceStatus::Present,
                slot_number: password.slot_number,
                marked_at: now,
            };
            state.receipts.insert(idempotency_key, receipt.clone());
            Ok(receipt)
        })
    }

    fn invalidate_instant_password(&self, code: &str, teacher_uid: &str) -> Result<()> {
        self.write(|state, _| {
            let teacher_id = state.teacher(teacher_uid)?.id;
            match state.passwords.get(code) {
                Some(row) if row.teacher_id != teacher_id => Err(AttendanceError::remote(
                    "Unauthorized to invalidate this password",
                )),
                Some(_) => {
                    state.passwords.remove(code);
                    Ok(())
                }
                // Already gone counts as invalidated
                None => Ok(()),
            }
        })
    }

    fn create_timetable(&self, slot: &NewTimetableSlot) -> Result<TimetableSlot> {
        let schedule = &self.schedule;
        self.write(|state, _| {
            let teacher_id = match state.user(&slot.teacher_firebase_id) {
                Some(user) if user.role == Role::Teacher => user.id,
                Some(_) => return Err(AttendanceError::remote("Only teachers can manage timetables")),
                None => return Err(not_found("Teacher")),
            };
            if !(1..=7).contains(&slot.day_of_week) {
                return Err(AttendanceError::remote("Day of week must be between 1 and 7"));
            }
            check_slot(slot.slot_number)?;
            if state
                .class(slot.class_id)
                .map_or(true, |c| c.teacher_id != teacher_id)
            {
                return Err(AttendanceError::remote(
                    "Class not found or you don't have permission to modify this class",
                ));
            }

            // A teacher teaches one class per day and slot; the new row wins
            state.timetable.retain(|t| {
                !(t.teacher_id == teacher_id
                    && t.day_of_week == slot.day_of_week
                    && t.slot_number == slot.slot_number)
            });
            let row = TimetableRow {
                id: state.next_id(),
                class_id: slot.class_id,
                teacher_id,
                day_of_week: slot.day_of_week,
                slot_number: slot.slot_number,
            };
            let created = state.timetable_slot(&row, schedule, true);
            state.timetable.push(row);
            Ok(created)
        })
    }

    fn get_timetable_by_teacher(&self, teacher_uid: &str) -> Result<Vec<TimetableSlot>> {
        let schedule = &self.schedule;
        self.read(|state, _| {
            let teacher_id = state.teacher(teacher_uid)?.id;
            let mut rows: Vec<&TimetableRow> =
                state.timetable.iter().filter(|t| t.teacher_id == teacher_id).collect();
            rows.sort_by_key(|t| (t.day_of_week, t.slot_number));
            Ok(rows
                .into_iter()
                .map(|t| state.timetable_slot(t, schedule, true))
                .collect())
        })
    }

    fn get_timetable_by_student(&self, student_uid: &str) -> Result<Vec<TimetableSlot>> {
        let schedule = &self.schedule;
        self.read(|state, _| {
            let student_id = state.student(student_uid)?.id;
            let mut rows: Vec<&TimetableRow> = state
                .timetable
                .iter()
                .filter(|t| {
                    state
                        .enrollment(t.class_id, student_id)
                        .map_or(false, |e| e.status == MembershipStatus::Approved)
                })
                .collect();
            rows.sort_by_key(|t| (t.day_of_week, t.slot_number));
            Ok(rows
                .into_iter()
                .map(|t| state.timetable_slot(t, schedule, false))
                .collect())
        })
    }

    fn get_all_subjects(&self) -> Result<Vec<Subject>> {
        self.read(|state, _| {
            let subjects: BTreeSet<Subject> = state
                .classes
                .iter()
                .map(|c| c.subject.clone())
                .chain(state.users.iter().filter_map(|u| u.subject.clone()))
                .filter(|s| !s.trim().is_empty())
                .collect();
            Ok(subjects.into_iter().collect())
        })
    }

    fn save_profile_photo(&self, uid: &str, photo: &DynamicImage) -> Result<String> {
        if photo.width() == 0 || photo.height() == 0 {
            return Err(AttendanceError::Validation("Profile photo is empty".into()));
        }
        self.write(|state, now| {
            let user = state
                .users
                .iter_mut()
                .find(|u| u.firebase_id == uid)
                .ok_or_else(|| not_found("User"))?;
            let url = format!("memory://profile-photos/{}/{}.jpg", uid, now.timestamp());
            user.profile_photo_url = Some(url.clone());
            Ok(url)
        })
    }

    fn get_profile_photo(&self, uid: &str) -> Result<Option<String>> {
        self.read(|state, _| {
            Ok(state
                .user(uid)
                .ok_or_else(|| not_found("User"))?
                .profile_photo_url
                .clone())
        })
    }
}

impl RecognitionService for MemoryBackend {
    fn enroll(&self, user_id: &str, frame: &DynamicImage) -> Result<EnrollResponse> {
        if let Some(details) = liveness_failure(frame) {
            return Ok(EnrollResponse {
                success: false,
                message: "Liveness check failed. Please use a live camera image.".into(),
                user_id: Some(user_id.to_string()),
                liveness_details: Some(details),
            });
        }
        let print = fingerprint(frame);
        self.write(|state, now| {
            match state.user(user_id) {
                Some(user) if user.role == Role::Student => {}
                Some(_) => {
                    return Err(AttendanceError::remote(
                        "Face enrollment is only available for students.",
                    ))
                }
                None => return Err(not_found("User")),
            }
            state.encodings.insert(
                user_id.to_string(),
                EncodingRow {
                    fingerprint: print,
                    enrolled_at: now,
                },
            );
            Ok(EnrollResponse {
                success: true,
                message: "Face enrolled successfully".into(),
                user_id: Some(user_id.to_string()),
                liveness_details: None,
            })
        })
    }

    fn recognize(&self, user_id: &str, frame: &DynamicImage) -> Result<RecognizeResponse> {
        if let Some(details) = liveness_failure(frame) {
            return Ok(RecognizeResponse {
                success: true,
                recognized: false,
                liveness_check: Some(false),
                confidence: None,
                message: Some("Liveness check failed. Please use a live camera image.".into()),
                liveness_details: Some(details),
            });
        }
        let probe = fingerprint(frame);
        self.read(|state, _| {
            let enrolled = state.encodings.get(user_id).ok_or_else(|| {
                AttendanceError::remote("No enrolled face found. Please enroll your face first.")
            })?;
            let distance = (enrolled.fingerprint ^ probe).count_ones();
            let recognized = distance <= MATCH_DISTANCE;
            tracing::debug!("Fingerprint distance {} for {}", distance, user_id);
            Ok(RecognizeResponse {
                success: true,
                recognized,
                liveness_check: Some(true),
                confidence: Some(1.0 - distance as f32 / 64.0),
                message: Some(if recognized {
                    "Face recognized".to_string()
                } else {
                    "Face not recognized".to_string()
                }),
                liveness_details: None,
            })
        })
    }

    fn enrollment_status(&self, user_id: &str) -> Result<EnrollmentStatus> {
        self.read(|state, _| {
            let row = state.encodings.get(user_id);
            Ok(EnrollmentStatus {
                success: true,
                enrolled: row.is_some(),
                enrolled_at: row.map(|r| r.enrolled_at),
                message: None,
            })
        })
    }

    fn enrolled_image(&self, user_id: &str) -> Result<EnrolledImage> {
        self.read(|state, _| {
            let row = state.encodings.get(user_id).ok_or_else(|| {
                AttendanceError::remote("No enrolled face found. Please enroll your face first.")
            })?;
            Ok(EnrolledImage {
                success: true,
                enrolled_image_url: Some(format!("memory://enrolled/{}.jpg", user_id)),
                enrolled_at: Some(row.enrolled_at),
                message: None,
            })
        })
    }

    fn delete_enrollment(&self, user_id: &str) -> Result<()> {
        self.write(|state, _| {
            state.encodings.remove(user_id);
            Ok(())
        })
    }

    fn current_slot(&self) -> Result<CurrentSlot> {
        let now = self.now();
        let local = self.schedule.local(now);
        Ok(CurrentSlot {
            current_slot: self.schedule.current_slot(now),
            current_day: SlotSchedule::day_of_week(local.date_naive()),
            current_time: local.format("%H:%M").to_string(),
            current_date: local.date_naive(),
            timezone: "IST".to_string(),
            slot_times: self
                .schedule
                .slots()
                .iter()
                .map(|s| SlotWindow {
                    slot: s.number,
                    start_24hr: s.start.format("%H:%M").to_string(),
                    end_24hr: s.end.format("%H:%M").to_string(),
                    start_12hr: s.start_label(),
                    end_12hr: s.end_label(),
                })
                .collect(),
        })
    }
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

impl AuthProvider for MemoryBackend {
    fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        let email = email.trim().to_lowercase();
        if !valid_email(&email) {
            return Err(AttendanceError::remote(friendly_auth_error("INVALID_EMAIL")));
        }
        if password.len() < 6 {
            return Err(AttendanceError::remote(friendly_auth_error("WEAK_PASSWORD")));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Pbkdf2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AttendanceError::Other(anyhow::anyhow!("Password hashing failed: {}", e)))?
            .to_string();

        let identity = self.write(|state, _| {
            if state.accounts.iter().any(|a| a.email == email) {
                return Err(AttendanceError::remote(friendly_auth_error("EMAIL_EXISTS")));
            }
            let account = Account {
                uid: random_hex()[..28].to_string(),
                email: email.clone(),
                password_hash: Some(hash),
            };
            let identity = Self::issue_identity(&account);
            state.accounts.push(account);
            Ok(identity)
        })?;
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let email = email.trim().to_lowercase();
        let account = self.read(|state, _| {
            Ok(state.accounts.iter().find(|a| a.email == email).cloned())
        })?;
        let rejected = || AttendanceError::remote(friendly_auth_error("INVALID_LOGIN_CREDENTIALS"));

        let account = account.ok_or_else(rejected)?;
        let stored = account.password_hash.as_deref().ok_or_else(rejected)?;
        let parsed = PasswordHash::new(stored)
            .map_err(|e| AttendanceError::Storage(format!("Corrupt password hash: {}", e)))?;
        if Pbkdf2.verify_password(password.as_bytes(), &parsed).is_err() {
            return Err(rejected());
        }

        let identity = Self::issue_identity(&account);
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    /// Offline, the provider token is taken to be the Google account's email
    fn sign_in_with_token(&self, provider_token: &str) -> Result<Identity> {
        let email = provider_token.trim().to_lowercase();
        if !valid_email(&email) {
            return Err(AttendanceError::remote("Invalid Google credential"));
        }
        let identity = self.write(|state, _| {
            if let Some(account) = state.accounts.iter().find(|a| a.email == email) {
                return Ok(Self::issue_identity(account));
            }
            let account = Account {
                uid: random_hex()[..28].to_string(),
                email: email.clone(),
                password_hash: None,
            };
            let identity = Self::issue_identity(&account);
            state.accounts.push(account);
            Ok(identity)
        })?;
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    fn sign_out(&self) -> Result<()> {
        self.set_current(None);
        Ok(())
    }

    fn delete_account(&self, identity: &Identity) -> Result<()> {
        self.write(|state, _| {
            let before = state.accounts.len();
            state.accounts.retain(|a| a.uid != identity.uid);
            if state.accounts.len() == before {
                return Err(AttendanceError::remote(friendly_auth_error("USER_NOT_FOUND")));
            }
            Ok(())
        })?;
        let was_current = self
            .current_identity()
            .map_or(false, |c| c.uid == identity.uid);
        if was_current {
            self.set_current(None);
        }
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn restore(&self, identity: Identity) -> Result<()> {
        let known = self.read(|state, _| Ok(state.accounts.iter().any(|a| a.uid == identity.uid)))?;
        if !known {
            return Err(AttendanceError::remote(
                "Your saved sign-in is no longer valid. Please sign in again.",
            ));
        }
        self.set_current(Some(identity));
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }
}
