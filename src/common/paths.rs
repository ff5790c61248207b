use std::path::PathBuf;
use directories::ProjectDirs;

// System locations. Dev mode redirects everything under ./dev_data instead.

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/rollcall/rollcall.toml")
}

/// Per-user data directory, e.g. ~/.local/share/rollcall on Linux
pub fn user_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("edu", "rollcall", "rollcall").map(|dirs| dirs.data_dir().to_path_buf())
}

pub fn user_session_dir() -> Option<PathBuf> {
    user_data_dir().map(|dir| dir.join("session"))
}
