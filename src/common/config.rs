use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{AttendanceError, Result};
use crate::common::paths::system_config_file;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub face_api: FaceApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub instant: InstantConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaceApiConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_recognition_timeout")]
    pub timeout_seconds: u64,
}

impl Default for FaceApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_seconds: default_recognition_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_database_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_key: None,
            timeout_seconds: default_database_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_auth_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_database_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_auth_url(),
            api_key: None,
            timeout_seconds: default_database_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_min_brightness")]
    pub min_brightness: f32,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: f32,
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: u32,
    /// Off by default: completing attendance matters more than a crisp frame
    #[serde(default)]
    pub enforce_sharpness: bool,
    #[serde(default = "default_min_sharpness")]
    pub min_sharpness: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_brightness: default_min_brightness(),
            max_brightness: default_max_brightness(),
            edge_threshold: default_edge_threshold(),
            enforce_sharpness: false,
            min_sharpness: default_min_sharpness(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LivenessConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_blink_countdown")]
    pub blink_countdown: u8,
    #[serde(default = "default_capture_attempts")]
    pub capture_attempts: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            blink_countdown: default_blink_countdown(),
            capture_attempts: default_capture_attempts(),
        }
    }
}

impl LivenessConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstantConfig {
    #[serde(default = "default_submit_cooldown")]
    pub submit_cooldown_ms: u64,
    #[serde(default = "default_capture_cooldown")]
    pub capture_cooldown_ms: u64,
}

impl Default for InstantConfig {
    fn default() -> Self {
        Self {
            submit_cooldown_ms: default_submit_cooldown(),
            capture_cooldown_ms: default_capture_cooldown(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_slot")]
    pub default_slot: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset(),
            default_slot: default_slot(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// Still image or a directory of frames to replay
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: None,
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_backend_url() -> String { "http://localhost:8000".to_string() }
fn default_auth_url() -> String { "https://identitytoolkit.googleapis.com/v1".to_string() }
fn default_recognition_timeout() -> u64 { 30 }
fn default_database_timeout() -> u64 { 15 }
fn default_min_brightness() -> f32 { 20.0 }
fn default_max_brightness() -> f32 { 240.0 }
fn default_edge_threshold() -> u32 { 30 }
fn default_min_sharpness() -> f32 { 0.05 }
fn default_tick_ms() -> u64 { 1000 }
fn default_blink_countdown() -> u8 { 3 }
fn default_capture_attempts() -> u32 { 3 }
fn default_submit_cooldown() -> u64 { 2000 }
fn default_capture_cooldown() -> u64 { 3000 }
fn default_utc_offset() -> i32 { 330 }
fn default_slot() -> u8 { 1 }
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }

const LOCAL_CONFIG: &str = "configs/rollcall.toml";

impl Config {
    /// `$ROLLCALL_CONFIG`, then the working copy, then the system file,
    /// falling back to defaults. Environment overrides apply last.
    pub fn load() -> Result<Self> {
        let candidates = std::env::var_os("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .into_iter()
            .chain([PathBuf::from(LOCAL_CONFIG), system_config_file()]);

        for path in candidates {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttendanceError::Config(format!(
                "Config file not found: {}. Please create it from configs/rollcall.toml.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AttendanceError::Config(format!("Config parse error: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ROLLCALL_FACE_API_URL") {
            self.face_api.base_url = url;
        }
        if let Some(url) = lookup("ROLLCALL_DATABASE_URL") {
            self.database.base_url = url;
        }
        if let Some(key) = lookup("ROLLCALL_DATABASE_KEY") {
            self.database.api_key = Some(key);
        }
        if let Some(url) = lookup("ROLLCALL_AUTH_URL") {
            self.auth.base_url = url;
        }
        if let Some(key) = lookup("ROLLCALL_AUTH_API_KEY") {
            self.auth.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("face_api.base_url", &self.face_api.base_url),
            ("database.base_url", &self.database.base_url),
            ("auth.base_url", &self.auth.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AttendanceError::Config(format!(
                    "{} must be an http(s) URL, got {:?}", name, url
                )));
            }
        }

        for (name, secs) in [
            ("face_api.timeout_seconds", self.face_api.timeout_seconds),
            ("database.timeout_seconds", self.database.timeout_seconds),
            ("auth.timeout_seconds", self.auth.timeout_seconds),
        ] {
            if secs < 1 || secs > 120 {
                return Err(AttendanceError::Config(format!(
                    "{} must be between 1 and 120 seconds, got {}", name, secs
                )));
            }
        }

        let q = &self.quality;
        if !(0.0..=255.0).contains(&q.min_brightness) || !(0.0..=255.0).contains(&q.max_brightness) {
            return Err(AttendanceError::Config(format!(
                "Brightness bounds must lie in [0, 255], got {} and {}",
                q.min_brightness, q.max_brightness
            )));
        }
        if q.min_brightness >= q.max_brightness {
            return Err(AttendanceError::Config(format!(
                "min_brightness ({}) must be below max_brightness ({})",
                q.min_brightness, q.max_brightness
            )));
        }
        if !(0.0..=1.0).contains(&q.min_sharpness) {
            return Err(AttendanceError::Config(format!(
                "min_sharpness must be between 0.0 and 1.0, got {}", q.min_sharpness
            )));
        }

        if self.liveness.blink_countdown < 1 || self.liveness.blink_countdown > 10 {
            return Err(AttendanceError::Config(format!(
                "Blink countdown must be between 1 and 10, got {}", self.liveness.blink_countdown
            )));
        }
        if self.liveness.capture_attempts == 0 {
            return Err(AttendanceError::Config("capture_attempts must be at least 1".into()));
        }

        if self.schedule.utc_offset_minutes.abs() > 14 * 60 {
            return Err(AttendanceError::Config(format!(
                "UTC offset must be within 14 hours, got {} minutes", self.schedule.utc_offset_minutes
            )));
        }
        if self.schedule.default_slot < 1 || self.schedule.default_slot > 9 {
            return Err(AttendanceError::Config(format!(
                "Default slot must be between 1 and 9, got {}", self.schedule.default_slot
            )));
        }

        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(AttendanceError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(AttendanceError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        Ok(())
    }

    /// Configuration for tests and demos: no pauses between liveness ticks.
    pub fn instant_ticks() -> Self {
        let mut config = Config::default();
        config.liveness.tick_ms = 0;
        config.instant.submit_cooldown_ms = 0;
        config.instant.capture_cooldown_ms = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_deployed_thresholds() {
        let config = Config::default();
        assert_eq!(config.quality.min_brightness, 20.0);
        assert_eq!(config.quality.max_brightness, 240.0);
        assert!(!config.quality.enforce_sharpness);
        assert_eq!(config.liveness.blink_countdown, 3);
        assert_eq!(config.instant.submit_cooldown_ms, 2000);
        assert_eq!(config.instant.capture_cooldown_ms, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config = Config::from_toml(
            r#"
            [face_api]
            base_url = "https://faces.example.edu"

            [quality]
            min_brightness = 25.0
            "#,
        )
        .unwrap();
        assert_eq!(config.face_api.base_url, "https://faces.example.edu");
        assert_eq!(config.face_api.timeout_seconds, 30);
        assert_eq!(config.quality.min_brightness, 25.0);
        assert_eq!(config.quality.max_brightness, 240.0);
        assert_eq!(config.schedule.utc_offset_minutes, 330);
    }

    #[test]
    fn rejects_inverted_brightness_bounds() {
        let mut config = Config::default();
        config.quality.min_brightness = 200.0;
        config.quality.max_brightness = 100.0;
        assert!(matches!(config.validate(), Err(AttendanceError::Config(_))));
    }

    #[test]
    fn rejects_non_http_urls() {
        let mut config = Config::default();
        config.face_api.base_url = "faces.local".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_replace_urls_and_keys() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "ROLLCALL_FACE_API_URL" => Some("https://faces.example.edu".into()),
            "ROLLCALL_DATABASE_KEY" => Some("service-key".into()),
            _ => None,
        });
        assert_eq!(config.face_api.base_url, "https://faces.example.edu");
        assert_eq!(config.database.api_key.as_deref(), Some("service-key"));
        assert_eq!(config.database.base_url, "http://localhost:8000");
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rollcall.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[liveness]\ntick_ms = 250\nblink_countdown = 5").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.liveness.tick_ms, 250);
        assert_eq!(config.liveness.blink_countdown, 5);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/rollcall.toml")).unwrap_err();
        assert!(matches!(err, AttendanceError::Config(_)));
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = Config::from_toml(include_str!("../../configs/rollcall.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.camera.source.is_none());
    }
}
