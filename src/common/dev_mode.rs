use std::path::PathBuf;
use std::fs;
use crate::common::error::{AttendanceError, Result};
use crate::common::paths;

/// Where state lives for this run. In dev mode everything goes under
/// `./dev_data`: the saved sign-in and the offline backend snapshot.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(&base_dir)?;
            fs::create_dir_all(base_dir.join("session"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn session_dir(&self) -> Result<PathBuf> {
        if self.enabled {
            Ok(self.base_dir.join("session"))
        } else {
            paths::user_session_dir()
                .ok_or_else(|| AttendanceError::Storage("Failed to get project dirs".into()))
        }
    }

    /// Snapshot file for the offline backend; only meaningful in dev mode
    pub fn backend_snapshot(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("backend.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_mode_keeps_everything_under_base_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dev = DevMode::with_base_dir(true, dir.path().to_path_buf()).unwrap();

        assert!(dev.session_dir().unwrap().starts_with(dir.path()));
        assert!(dev.session_dir().unwrap().is_dir());
        assert_eq!(dev.backend_snapshot(), Some(dir.path().join("backend.json")));
    }

    #[test]
    fn production_mode_has_no_offline_snapshot() {
        let dev = DevMode::new(false).unwrap();
        assert!(dev.backend_snapshot().is_none());
    }
}
