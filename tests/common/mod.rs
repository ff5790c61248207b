#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use rollcall::camera::{Camera, StaticFrameSource};
use rollcall::core::slots::SlotSchedule;
use rollcall::protocol::{NewClass, NewUserProfile, Role, UserProfile};
use rollcall::{MemoryBackend, RemoteDatabase};
use std::sync::Arc;

/// 8-px bands; bright enough for the quality gate and textured enough for
/// the offline liveness check
pub fn stripes(vertical: bool) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
        let band = if vertical { x / 8 } else { y / 8 };
        let v = if band % 2 == 0 { 200 } else { 40 };
        Rgb([v, v, v])
    }))
}

pub fn flat(value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([value, value, value])))
}

pub fn camera(frame: DynamicImage) -> Camera {
    Camera::new(Box::new(StaticFrameSource::new(frame)))
}

/// Monday 2025-03-10, 10:00 IST: slot 2
pub fn backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new(SlotSchedule::campus(330)));
    backend.freeze_clock(Utc.with_ymd_and_hms(2025, 3, 10, 4, 30, 0).unwrap());
    backend
}

pub struct Campus {
    pub backend: Arc<MemoryBackend>,
    pub teacher: UserProfile,
    pub student: UserProfile,
    pub class_id: i64,
}

pub fn student_profile(uid: &str, student_id: &str, name: &str) -> NewUserProfile {
    NewUserProfile {
        firebase_id: uid.into(),
        email: format!("{}@example.edu", uid),
        name: name.into(),
        role: Role::Student,
        student_id: Some(student_id.into()),
        subject: None,
    }
}

/// One teacher, one class, one student already in it
pub fn campus() -> Campus {
    let backend = backend();
    let teacher = backend
        .create_user(&NewUserProfile {
            firebase_id: "t1".into(),
            email: "rao@example.edu".into(),
            name: "Dr. Rao".into(),
            role: Role::Teacher,
            student_id: None,
            subject: Some("Physics".into()),
        })
        .unwrap();
    let student = backend
        .create_user(&student_profile("s1", "21CS001", "Asha Menon"))
        .unwrap();
    let class = backend
        .create_class(&NewClass {
            name: "Physics 201".into(),
            subject: "Physics".into(),
            description: "Mechanics".into(),
            teacher_firebase_id: teacher.firebase_id.clone(),
        })
        .unwrap();
    backend.join_class(class.id, &student.firebase_id).unwrap();

    Campus {
        backend,
        teacher,
        student,
        class_id: class.id,
    }
}
