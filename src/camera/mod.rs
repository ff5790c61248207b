//! Frame acquisition.
//!
//! A `Camera` owns one `FrameSource`. Captures go through a `CameraSession`,
//! which borrows the camera exclusively; the stream is closed when the
//! session is dropped, so a flow that bails out early never leaves it open.

pub mod source;

pub use source::{ImageFileSource, StaticFrameSource, StreamProbe};

use crate::common::{AttendanceError, Config, Result};
use image::DynamicImage;

pub trait FrameSource: Send {
    /// Acquire the underlying stream. Failures surface as `CameraUnavailable`.
    fn open(&mut self) -> Result<()>;

    fn next_frame(&mut self) -> Result<DynamicImage>;

    /// Release the stream. Must be safe to call on a closed source.
    fn close(&mut self);

    fn describe(&self) -> String;
}

pub struct Camera {
    source: Box<dyn FrameSource>,
}

impl Camera {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self { source }
    }

    /// Build from `[camera] source`, a still image or a directory of frames
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.camera.source.as_ref().ok_or_else(|| {
            AttendanceError::CameraUnavailable(
                "No camera source configured. Set [camera] source or pass --frames".into(),
            )
        })?;
        Ok(Self::new(Box::new(ImageFileSource::new(path))))
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    pub fn start_session(&mut self) -> Result<CameraSession<'_>> {
        tracing::debug!("Opening camera stream: {}", self.source.describe());
        self.source.open()?;
        Ok(CameraSession { camera: self, captured: 0 })
    }

    /// Capture a single frame in a throwaway session
    pub fn capture_frame(&mut self) -> Result<DynamicImage> {
        let mut session = self.start_session()?;
        session.capture_frame()
    }
}

pub struct CameraSession<'a> {
    camera: &'a mut Camera,
    captured: u64,
}

impl<'a> CameraSession<'a> {
    pub fn capture_frame(&mut self) -> Result<DynamicImage> {
        let frame = self.camera.source.next_frame()?;
        self.captured += 1;
        Ok(frame)
    }

    /// Close the current stream and continue on another source
    pub fn switch_source(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        self.camera.source.close();
        self.camera.source = source;
        tracing::debug!("Switched camera to {}", self.camera.source.describe());
        self.camera.source.open()
    }
}

impl Drop for CameraSession<'_> {
    fn drop(&mut self) {
        self.camera.source.close();
        tracing::debug!("Camera stream released after {} frames", self.captured);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([value, value, value])))
    }

    #[test]
    fn dropping_the_session_releases_the_stream() {
        let source = StaticFrameSource::new(frame(128));
        let probe = source.probe();
        let mut camera = Camera::new(Box::new(source));

        {
            let mut session = camera.start_session().unwrap();
            assert!(probe.is_open());
            session.capture_frame().unwrap();
        }
        assert!(!probe.is_open());
        assert_eq!(probe.opens(), 1);
    }

    #[test]
    fn early_errors_still_release_the_stream() {
        let source = StaticFrameSource::new(frame(128));
        let probe = source.probe();
        let mut camera = Camera::new(Box::new(source));

        let run = |camera: &mut Camera| -> Result<()> {
            let _session = camera.start_session()?;
            Err(AttendanceError::Validation("bail out".into()))
        };
        assert!(run(&mut camera).is_err());
        assert!(!probe.is_open());
    }

    #[test]
    fn switching_sources_closes_the_old_stream() {
        let first = StaticFrameSource::new(frame(10));
        let first_probe = first.probe();
        let second = StaticFrameSource::new(frame(200));
        let second_probe = second.probe();
        let mut camera = Camera::new(Box::new(first));

        let mut session = camera.start_session().unwrap();
        session.switch_source(Box::new(second)).unwrap();
        assert!(!first_probe.is_open());
        assert!(second_probe.is_open());

        let captured = session.capture_frame().unwrap();
        assert_eq!(captured.to_rgb8().get_pixel(0, 0)[0], 200);
        drop(session);
        assert!(!second_probe.is_open());
    }

    #[test]
    fn denied_camera_is_an_error_not_a_panic() {
        let mut camera = Camera::new(Box::new(StaticFrameSource::denied()));
        match camera.start_session() {
            Err(AttendanceError::CameraUnavailable(msg)) => assert_eq!(msg, "Camera permission denied"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("denied camera opened"),
        };
    }

    #[test]
    fn missing_configuration_reports_unavailable() {
        let config = Config::default();
        assert!(matches!(
            Camera::from_config(&config),
            Err(AttendanceError::CameraUnavailable(_))
        ));
    }
}
