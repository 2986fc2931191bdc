//! Remaining lockout time for display

use std::fmt;

use chrono::{DateTime, Utc};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * 60;

/// Time left until a lockout ends, as shown on a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    /// Minutes within the current hour
    pub minutes: u8,
    /// Seconds within the current minute
    pub seconds: u8,
}

impl Countdown {
    /// Countdown from `now` to `until`, clamped at zero
    ///
    /// Whole seconds are compared, so sub-second remainders never show as an
    /// extra second.
    pub fn until(until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = (until.timestamp() - now.timestamp()).max(0);
        Self {
            minutes: (remaining % SECONDS_PER_HOUR / SECONDS_PER_MINUTE) as u8,
            seconds: (remaining % SECONDS_PER_MINUTE) as u8,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes, self.seconds)
    }
}

/// `MM:SS` until `until`
pub fn format_time_remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> String {
    Countdown::until(until, now).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_minutes_and_seconds_padded() {
        assert_eq!(format_time_remaining(t(19 * 60 + 42), t(0)), "19:42");
        assert_eq!(format_time_remaining(t(5), t(0)), "00:05");
    }

    #[test]
    fn test_past_deadline_is_zero() {
        assert_eq!(format_time_remaining(t(0), t(30)), "00:00");
    }

    #[test]
    fn test_hours_wrap() {
        assert_eq!(
            Countdown::until(t(SECONDS_PER_HOUR + 61), t(0)),
            Countdown {
                minutes: 1,
                seconds: 1
            }
        );
    }
}
