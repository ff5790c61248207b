use crate::common::{AttendanceError, DevMode, Result};
use crate::session::Identity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const STORAGE_VERSION: u32 = 1;
const SESSION_FILE: &str = "identity.bincode";

#[derive(Serialize, Deserialize)]
pub struct SavedSession {
    pub version: u32,
    pub identity: Identity,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

/// The signed-in identity, kept between CLI invocations
pub struct SessionStore {
    session_dir: PathBuf,
}

impl SessionStore {
    pub fn new_with_path(session_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&session_dir)?;
        Ok(Self { session_dir })
    }

    pub fn new_with_dev_mode(dev_mode: &DevMode) -> Result<Self> {
        let session_dir = dev_mode.session_dir()?;
        if dev_mode.is_enabled() {
            tracing::debug!("SessionStore using dev directory: {:?}", session_dir);
        }
        Self::new_with_path(session_dir)
    }

    fn session_file(&self) -> PathBuf {
        self.session_dir.join(SESSION_FILE)
    }

    pub fn save(&self, identity: &Identity) -> Result<()> {
        let saved = SavedSession {
            version: STORAGE_VERSION,
            identity: identity.clone(),
            saved_at: chrono::Utc::now(),
        };
        let encoded = bincode::serialize(&saved)
            .map_err(|e| AttendanceError::Storage(format!("Failed to serialize: {}", e)))?;
        fs::write(self.session_file(), encoded)?;
        Ok(())
    }

    /// `Ok(None)` when nobody is signed in. A file written by an
    /// incompatible version is discarded rather than trusted.
    pub fn load(&self) -> Result<Option<Identity>> {
        let path = self.session_file();
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let saved: SavedSession = match bincode::deserialize(&data) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Discarding unreadable session file: {}", e);
                self.clear()?;
                return Ok(None);
            }
        };

        if saved.version != STORAGE_VERSION {
            tracing::warn!(
                "Discarding session saved by storage version {} (current {})",
                saved.version,
                STORAGE_VERSION
            );
            self.clear()?;
            return Ok(None);
        }

        Ok(Some(saved.identity))
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.session_file();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            uid: "uid-42".into(),
            email: "ana@example.edu".into(),
            id_token: "token".into(),
        }
    }

    #[test]
    fn saved_identity_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new_with_path(dir.path().join("session")).unwrap();
        assert!(store.load().unwrap().is_none());

        store.save(&identity()).unwrap();
        assert_eq!(store.load().unwrap(), Some(identity()));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn garbage_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new_with_path(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join(SESSION_FILE), b"not bincode").unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(!dir.path().join(SESSION_FILE).exists());
    }
}
