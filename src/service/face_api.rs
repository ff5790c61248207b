use image::{DynamicImage, ImageOutputFormat};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use std::io::Cursor;

use crate::common::config::FaceApiConfig;
use crate::common::error::{AttendanceError, Result};
use crate::service::http::{build_client, join_url, read_envelope, read_json};
use crate::service::protocol::{
    CurrentSlot, EnrollResponse, EnrolledImage, EnrollmentStatus, RecognizeResponse,
};

const JPEG_QUALITY: u8 = 90;

/// The face recognition service: encodings, matching and server-side
/// liveness all live behind this seam.
pub trait RecognitionService: Send + Sync {
    fn enroll(&self, user_id: &str, frame: &DynamicImage) -> Result<EnrollResponse>;

    fn recognize(&self, user_id: &str, frame: &DynamicImage) -> Result<RecognizeResponse>;

    fn enrollment_status(&self, user_id: &str) -> Result<EnrollmentStatus>;

    fn enrolled_image(&self, user_id: &str) -> Result<EnrolledImage>;

    fn delete_enrollment(&self, user_id: &str) -> Result<()>;

    fn current_slot(&self) -> Result<CurrentSlot>;
}

pub struct FaceApiClient {
    base_url: String,
    http: Client,
}

impl FaceApiClient {
    pub fn new(config: &FaceApiConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.clone(),
            http: build_client(config.timeout_seconds, None)?,
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn frame_form(user_id: &str, frame: &DynamicImage) -> Result<Form> {
        let jpeg = encode_jpeg(frame)?;
        let part = Part::bytes(jpeg)
            .file_name("face.jpg")
            .mime_str("image/jpeg")?;
        Ok(Form::new()
            .part("image", part)
            .text("user_id", user_id.to_string()))
    }
}

pub fn encode_jpeg(frame: &DynamicImage) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(frame.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
    Ok(buf.into_inner())
}

impl RecognitionService for FaceApiClient {
    fn enroll(&self, user_id: &str, frame: &DynamicImage) -> Result<EnrollResponse> {
        tracing::info!("Uploading enrollment frame for {}", user_id);
        let response = self
            .http
            .post(self.url("/enroll"))
            .multipart(Self::frame_form(user_id, frame)?)
            .send()?;
        read_json(response)
    }

    fn recognize(&self, user_id: &str, frame: &DynamicImage) -> Result<RecognizeResponse> {
        tracing::debug!("Sending frame for recognition ({}x{})", frame.width(), frame.height());
        let response = self
            .http
            .post(self.url("/recognize"))
            .multipart(Self::frame_form(user_id, frame)?)
            .send()?;
        let body: RecognizeResponse = read_json(response)?;
        if !body.success {
            // success=false is reserved for the service's own failures
            return Err(AttendanceError::remote(
                body.message.unwrap_or_else(|| "Recognition failed".into()),
            ));
        }
        Ok(body)
    }

    fn enrollment_status(&self, user_id: &str) -> Result<EnrollmentStatus> {
        let response = self
            .http
            .get(self.url(&format!("/api/face-encodings/{}", user_id)))
            .send()?;
        let status: EnrollmentStatus = read_json(response)?;
        if !status.success {
            return Err(AttendanceError::remote(
                status.message.unwrap_or_else(|| "Failed to check enrollment".into()),
            ));
        }
        Ok(status)
    }

    fn enrolled_image(&self, user_id: &str) -> Result<EnrolledImage> {
        let response = self
            .http
            .get(self.url(&format!("/api/enrolled-image/{}", user_id)))
            .send()?;
        let image: EnrolledImage = read_json(response)?;
        if !image.success {
            return Err(AttendanceError::remote(
                image.message.unwrap_or_else(|| "Failed to fetch enrolled image".into()),
            ));
        }
        Ok(image)
    }

    fn delete_enrollment(&self, user_id: &str) -> Result<()> {
        tracing::info!("Deleting face enrollment for {}", user_id);
        let response = self
            .http
            .delete(self.url(&format!("/api/face-encodings/{}", user_id)))
            .send()?;
        read_envelope::<serde_json::Value>(response)?.into_result()?;
        Ok(())
    }

    fn current_slot(&self) -> Result<CurrentSlot> {
        let response = self.http.get(self.url("/api/current-slot")).send()?;
        read_envelope(response)?.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn jpeg_encoding_drops_alpha() {
        let frame = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([120, 80, 40, 128])));
        let bytes = encode_jpeg(&frame).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 16);
    }
}
