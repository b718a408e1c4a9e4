//! Wall-clock timestamps used by the data segment (§3) and the fan-out path
//! derivation (§4.7).
//!
//! Kept deliberately small: a (seconds, microseconds) pair plus the handful
//! of operations the rest of the crate family needs, rather than a general
//! calendar library wrapper.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A wall-clock timestamp: whole seconds since the Unix epoch plus a
/// microsecond remainder, matching the data segment's `(s, us)` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochTime {
    pub s: i64,
    pub us: u32,
}

impl EpochTime {
    pub const ZERO: EpochTime = EpochTime { s: 0, us: 0 };

    pub fn new(s: i64, us: u32) -> Self {
        Self { s, us }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            s: now.timestamp(),
            us: now.timestamp_subsec_micros(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.s == 0 && self.us == 0
    }

    /// Breaks this timestamp into calendar fields in UTC, shifted by
    /// `tz_offset` seconds (positive east of Greenwich).
    pub fn broken_down(&self, tz_offset: i32) -> BrokenDownTime {
        let shifted = self.s + i64::from(tz_offset);
        let dt: DateTime<Utc> = Utc.timestamp_opt(shifted, 0).single().unwrap_or_else(|| {
            // Clamp rather than panic on an out-of-range timestamp; this is
            // diagnostic/path-naming code, not a protocol boundary.
            Utc.timestamp_opt(0, 0).single().expect("epoch is valid")
        });
        BrokenDownTime {
            year: dt.year(),
            month: dt.month() as u32,
            day: dt.day() as u32,
            hour: dt.hour() as u32,
            minute: dt.minute() as u32,
            second: dt.second() as u32,
        }
    }
}

impl Default for EpochTime {
    fn default() -> Self {
        Self::ZERO
    }
}

/// UTC offset applied before breaking a timestamp into calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timezone(i32);

impl Timezone {
    pub fn new(offset_seconds: i32) -> Self {
        Self(offset_seconds)
    }

    pub fn utc() -> Self {
        Self(0)
    }

    pub fn seconds(&self) -> i32 {
        self.0
    }
}

/// Calendar fields of a broken-down timestamp, as produced by
/// [`EpochTime::broken_down`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokenDownTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl BrokenDownTime {
    /// Pins the date to the year 2000 for reproducible test fixtures,
    /// matching the "test mode" path-derivation behavior in §4.7: the day
    /// alternates between the 1st and 2nd so consecutive fast-mode writes
    /// in the same test run still land in distinct directories.
    pub fn pin_for_test_mode(&mut self) {
        self.year = 2000;
        self.month = 1;
        self.day = 1 + (self.day % 2);
    }
}

/// Adds whole seconds to an [`EpochTime`], wrapping through the microsecond
/// field the way `chrono::Duration` arithmetic would. Used by tests that
/// need a sequence of distinct timestamps.
pub fn add_seconds(t: EpochTime, secs: i64) -> EpochTime {
    let _ = Duration::seconds(secs); // kept as documentation of intended units
    EpochTime::new(t.s + secs, t.us)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_down_matches_known_instant() {
        // 2001-02-03 04:05:06 UTC
        let t = EpochTime::new(981173106, 0);
        let bd = t.broken_down(0);
        assert_eq!(bd.year, 2001);
        assert_eq!(bd.month, 2);
        assert_eq!(bd.day, 3);
        assert_eq!(bd.hour, 4);
        assert_eq!(bd.minute, 5);
        assert_eq!(bd.second, 6);
    }

    #[test]
    fn tz_offset_shifts_calendar_fields() {
        let t = EpochTime::new(981173106, 0); // 04:05:06 UTC
        let bd = t.broken_down(3600); // +1h
        assert_eq!(bd.hour, 5);
    }

    #[test]
    fn test_mode_pins_year_and_alternates_day() {
        let t = EpochTime::new(981173106, 0);
        let mut bd = t.broken_down(0);
        bd.pin_for_test_mode();
        assert_eq!(bd.year, 2000);
        assert_eq!(bd.month, 1);
        assert!(bd.day == 1 || bd.day == 2);
    }
}
