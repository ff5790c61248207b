use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Countdown to an instant password's server-issued expiry.
///
/// Seconds are rounded up, so the display only reads `0:00` once
/// `expires_at` has actually been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordCountdown {
    expires_at: DateTime<Utc>,
}

impl PasswordCountdown {
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        Self { expires_at }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_secs_at(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.remaining_at(now);
        let secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn display_at(&self, now: DateTime<Utc>) -> String {
        format_clock(self.remaining_secs_at(now))
    }

    /// Instants at which the display changes: `now`, then each whole second
    /// before expiry, ending exactly on `expires_at`.
    pub fn ticks_from(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let total = self.remaining_secs_at(now);
        let mut ticks = vec![now];
        for left in (0..total).rev() {
            ticks.push(self.expires_at - ChronoDuration::seconds(left as i64));
        }
        ticks
    }
}

/// `m:ss`, as shown next to an open attendance window
pub fn format_clock(total_secs: u64) -> String {
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap() + ChronoDuration::milliseconds(ms as i64)
    }

    #[test]
    fn fresh_password_shows_three_minutes() {
        let issued = at(9, 0, 0, 0);
        let countdown = PasswordCountdown::new(issued + ChronoDuration::minutes(3));
        assert_eq!(countdown.display_at(issued), "3:00");
        assert_eq!(countdown.display_at(issued + ChronoDuration::seconds(61)), "1:59");
    }

    #[test]
    fn reads_zero_exactly_at_expiry() {
        let expires = at(9, 3, 0, 0);
        let countdown = PasswordCountdown::new(expires);
        assert_eq!(countdown.display_at(expires - ChronoDuration::milliseconds(400)), "0:01");
        assert_eq!(countdown.display_at(expires), "0:00");
        assert_eq!(countdown.display_at(expires + ChronoDuration::seconds(5)), "0:00");
        assert!(!countdown.is_expired_at(expires - ChronoDuration::milliseconds(1)));
        assert!(countdown.is_expired_at(expires));
    }

    #[test]
    fn ticks_strictly_decrease_and_end_on_expiry() {
        let expires = at(9, 3, 0, 0);
        let countdown = PasswordCountdown::new(expires);
        let now = at(9, 2, 55, 300);
        let ticks = countdown.ticks_from(now);

        assert_eq!(*ticks.last().unwrap(), expires);
        let displays: Vec<String> = ticks.iter().map(|t| countdown.display_at(*t)).collect();
        assert_eq!(displays, vec!["0:05", "0:04", "0:03", "0:02", "0:01", "0:00"]);
        for pair in ticks.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] - pair[0] <= ChronoDuration::seconds(1));
        }
    }

    #[test]
    fn expired_countdown_has_a_single_tick() {
        let expires = at(9, 3, 0, 0);
        let countdown = PasswordCountdown::new(expires);
        let ticks = countdown.ticks_from(expires + ChronoDuration::seconds(2));
        assert_eq!(ticks.len(), 1);
        assert_eq!(countdown.remaining_at(ticks[0]), Duration::ZERO);
    }

    #[test]
    fn clock_format_pads_seconds() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(9), "0:09");
        assert_eq!(format_clock(180), "3:00");
    }
}
