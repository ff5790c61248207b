//! Terminal rendering for the capture and countdown screens.

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent},
    execute,
    style::Print,
    terminal::{self, ClearType},
};
use std::io::{self, Write};
use std::time::Duration;

use crate::core::attendance::CaptureEvent;
use crate::core::liveness::{LivenessChecks, LivenessProgress};
use crate::core::slots::SlotSchedule;

const CHECK_LABELS: [&str; 6] = ["Face", "Size", "Light", "Pose", "Eyes", "Blink"];

fn check_flags(checks: &LivenessChecks) -> [bool; 6] {
    [
        checks.face_detected,
        checks.face_size,
        checks.lighting,
        checks.head_pose,
        checks.eyes_open,
        checks.blink_detected,
    ]
}

/// One box per check, filled as the stepper passes it
pub fn progress_bar(checks: &LivenessChecks) -> String {
    let passed = check_flags(checks).iter().filter(|&&ok| ok).count();
    let filled = "■".repeat(passed);
    let empty = "□".repeat(CHECK_LABELS.len() - passed);
    format!("[{}{}]", filled, empty)
}

pub fn checklist(checks: &LivenessChecks) -> String {
    CHECK_LABELS
        .iter()
        .zip(check_flags(checks))
        .map(|(label, ok)| format!("{} {}", if ok { "✓" } else { "·" }, label))
        .collect::<Vec<_>>()
        .join("  ")
}

fn describe_progress(progress: &LivenessProgress) -> String {
    format!("{} {}", progress_bar(&progress.checks), progress.instruction)
}

pub fn describe_capture_event(event: &CaptureEvent) -> String {
    match event {
        CaptureEvent::Tick(progress) => describe_progress(progress),
        CaptureEvent::Rejected { attempt, quality, verdict } => format!(
            "Attempt {}: {} ({})",
            attempt,
            verdict.instruction(),
            quality.describe()
        ),
    }
}

/// Overwrite the current terminal line in place
fn redraw_line_on<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    execute!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        Print(text)
    )?;
    out.flush()
}

/// Status lines are cosmetic: a terminal that refuses the redraw is logged
/// and the flow carries on.
pub fn show_status(text: &str) {
    show_status_on(&mut io::stdout(), text);
}

fn show_status_on<W: Write>(out: &mut W, text: &str) -> bool {
    match redraw_line_on(out, text) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Could not redraw status line: {}", e);
            false
        }
    }
}

pub fn clear_screen() -> io::Result<()> {
    execute!(io::stdout(), terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    io::stdout().flush()
}

/// Non-blocking; only sees keys while the terminal is in raw mode
pub fn check_for_escape() -> io::Result<bool> {
    if event::poll(Duration::from_millis(0))? {
        if let Event::Key(KeyEvent { code, .. }) = event::read()? {
            return Ok(matches!(code, KeyCode::Esc | KeyCode::Char('q')));
        }
    }
    Ok(false)
}

pub fn slot_table(schedule: &SlotSchedule, current: Option<u8>) -> String {
    schedule
        .slots()
        .iter()
        .map(|slot| {
            let marker = if Some(slot.number) == current { "▶" } else { " " };
            format!(
                "{} Slot {}  {} - {}",
                marker,
                slot.number,
                slot.start_label(),
                slot.end_label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
