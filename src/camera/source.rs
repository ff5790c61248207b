use crate::camera::FrameSource;
use crate::common::{AttendanceError, Result};
use image::DynamicImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const FRAME_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub(crate) fn open_error(err: io::Error, path: &Path) -> AttendanceError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            AttendanceError::CameraUnavailable("Camera permission denied".into())
        }
        io::ErrorKind::NotFound => {
            AttendanceError::CameraUnavailable(format!("No camera source at {}", path.display()))
        }
        _ => AttendanceError::CameraUnavailable(format!(
            "Failed to open {}: {}", path.display(), err
        )),
    }
}

/// Replays a still image, or every image in a directory in name order.
pub struct ImageFileSource {
    path: PathBuf,
    frames: Vec<PathBuf>,
    next: usize,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: Vec::new(),
            next: 0,
        }
    }

    fn is_frame(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

impl FrameSource for ImageFileSource {
    fn open(&mut self) -> Result<()> {
        let metadata = fs::metadata(&self.path).map_err(|e| open_error(e, &self.path))?;

        let mut frames = if metadata.is_dir() {
            let mut frames = Vec::new();
            for entry in fs::read_dir(&self.path).map_err(|e| open_error(e, &self.path))? {
                let path = entry?.path();
                if path.is_file() && Self::is_frame(&path) {
                    frames.push(path);
                }
            }
            frames
        } else {
            // Readability check up front so a locked file fails here, not mid-capture
            fs::File::open(&self.path).map_err(|e| open_error(e, &self.path))?;
            vec![self.path.clone()]
        };
        frames.sort();

        if frames.is_empty() {
            return Err(AttendanceError::CameraUnavailable(format!(
                "No frames found in {}", self.path.display()
            )));
        }

        tracing::debug!("Frame source {} has {} frame(s)", self.path.display(), frames.len());
        self.frames = frames;
        self.next = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<DynamicImage> {
        if self.frames.is_empty() {
            return Err(AttendanceError::CameraUnavailable("Camera stream is not open".into()));
        }
        let path = &self.frames[self.next % self.frames.len()];
        self.next += 1;
        Ok(image::open(path)?)
    }

    fn close(&mut self) {
        self.frames.clear();
        self.next = 0;
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Observes a `StaticFrameSource` after it has been moved into a camera
#[derive(Debug, Clone, Default)]
pub struct StreamProbe {
    open: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl StreamProbe {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

/// In-memory frames, cycled in order. Used by tests and demos.
pub struct StaticFrameSource {
    frames: Vec<DynamicImage>,
    next: usize,
    denied: bool,
    probe: StreamProbe,
}

impl StaticFrameSource {
    pub fn new(frame: DynamicImage) -> Self {
        Self::sequence(vec![frame])
    }

    pub fn sequence(frames: Vec<DynamicImage>) -> Self {
        Self {
            frames,
            next: 0,
            denied: false,
            probe: StreamProbe::default(),
        }
    }

    /// A source whose open fails the way a camera without permission does
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::sequence(Vec::new())
        }
    }

    pub fn probe(&self) -> StreamProbe {
        self.probe.clone()
    }
}

impl FrameSource for StaticFrameSource {
    fn open(&mut self) -> Result<()> {
        if self.denied {
            return Err(open_error(
                io::Error::from(io::ErrorKind::PermissionDenied),
                Path::new("static"),
            ));
        }
        if self.frames.is_empty() {
            return Err(AttendanceError::CameraUnavailable("No frames to replay".into()));
        }
        self.probe.open.store(true, Ordering::SeqCst);
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<DynamicImage> {
        if !self.probe.is_open() {
            return Err(AttendanceError::CameraUnavailable("Camera stream is not open".into()));
        }
        let frame = self.frames[self.next % self.frames.len()].clone();
        self.next += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.probe.open.store(false, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        format!("{} in-memory frame(s)", self.frames.len())
    }
}
