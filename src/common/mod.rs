pub mod clock;
pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use clock::{fixed_clock, system_clock, Clock};
pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{AttendanceError, Result};
pub use paths::{system_config_file, user_data_dir};
