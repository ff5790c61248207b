pub mod display;

pub use display::{
    check_for_escape, checklist, clear_screen, describe_capture_event, progress_bar, show_status,
    slot_table,
};
