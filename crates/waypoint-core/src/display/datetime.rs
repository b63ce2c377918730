//! Timestamp formatting.

use std::fmt;

use jiff::{tz::TimeZone, Timestamp};

/// Formats a timestamp in the system time zone as `YYYY-MM-DD HH:MM:SS TZ`.
pub struct LocalDateTime<'a>(pub &'a Timestamp);

impl fmt::Display for LocalDateTime<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .to_zoned(TimeZone::system())
                .strftime("%Y-%m-%d %H:%M:%S %Z")
        )
    }
}

/// Time elapsed since a timestamp, coarse: `42s`, `3m 5s`, `2h 10m`.
pub struct Elapsed<'a>(pub &'a Timestamp);

impl Elapsed<'_> {
    fn render(seconds: i64) -> String {
        let seconds = seconds.max(0);
        match seconds {
            0..=59 => format!("{seconds}s"),
            60..=3599 => format!("{}m {}s", seconds / 60, seconds % 60),
            _ => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
        }
    }
}

impl fmt::Display for Elapsed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = Timestamp::now().duration_since(*self.0).as_secs();
        f.write_str(&Self::render(seconds))
    }
}
