use std::time::{Duration, Instant};

/// Swallows repeat taps inside a window. This only smooths double clicks;
/// duplicate writes are refused by the server via the idempotency key.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last_accepted: None }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Accept and start a new window, or refuse without touching the window
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    pub fn clear(&mut self) {
        self.last_accepted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_repeats_inside_the_window() {
        let start = Instant::now();
        let mut cooldown = Cooldown::from_millis(2000);
        assert!(cooldown.try_acquire(start));
        assert!(!cooldown.try_acquire(start + Duration::from_millis(500)));
        assert!(!cooldown.try_acquire(start + Duration::from_millis(1999)));
        assert!(cooldown.try_acquire(start + Duration::from_millis(2000)));
    }

    #[test]
    fn refused_attempts_do_not_extend_the_window() {
        let start = Instant::now();
        let mut cooldown = Cooldown::from_millis(3000);
        assert!(cooldown.try_acquire(start));
        assert!(!cooldown.try_acquire(start + Duration::from_millis(2900)));
        assert!(cooldown.try_acquire(start + Duration::from_millis(3001)));
    }

    #[test]
    fn zero_window_never_blocks() {
        let start = Instant::now();
        let mut cooldown = Cooldown::from_millis(0);
        assert!(cooldown.try_acquire(start));
        assert!(cooldown.try_acquire(start));
    }

    #[test]
    fn clear_forgets_the_last_attempt() {
        let start = Instant::now();
        let mut cooldown = Cooldown::from_millis(2000);
        assert!(cooldown.try_acquire(start));
        cooldown.clear();
        assert!(cooldown.try_acquire(start + Duration::from_millis(10)));
    }
}
