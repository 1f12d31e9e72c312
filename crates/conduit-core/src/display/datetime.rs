//! Timestamp rendering.

use std::fmt;

use jiff::{tz::TimeZone, Timestamp};

/// Renders a `Timestamp` as `YYYY-MM-DD HH:MM:SS TZ` in the system time zone.
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

/// Renders an optional timestamp, with `-` for none.
pub(crate) struct MaybeDateTime<'a>(pub &'a Option<Timestamp>);

impl fmt::Display for MaybeDateTime<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ts) => LocalDateTime(ts).fmt(f),
            None => f.write_str("-"),
        }
    }
}
