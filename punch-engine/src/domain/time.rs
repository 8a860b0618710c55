//! Station clock time handling.
//!
//! Stations report punch times as seconds within a twelve-hour half-day plus
//! an optional PM flag and a 1/256 s fraction. This module turns those into
//! date-aware [`PunchTime`] values, anchored on the event date, so that
//! readouts spanning noon or midnight still order correctly.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds in one twelve-hour half-day.
pub const HALF_DAY_SECS: u32 = 12 * 60 * 60;

/// Error returned when parsing or building an invalid time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time: {reason}")]
pub struct TimeError {
    reason: &'static str,
}

impl TimeError {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// A date-aware punch timestamp with millisecond resolution.
///
/// # Examples
///
/// ```
/// use punch_engine::domain::PunchTime;
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
/// let t = PunchTime::parse_hms("10:15:30", date).unwrap();
/// assert_eq!(t.to_string(), "10:15:30");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PunchTime(NaiveDateTime);

impl PunchTime {
    /// Create a new PunchTime from a date and a time of day.
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self(date.and_time(time))
    }

    /// Wrap a full datetime.
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt)
    }

    /// Build a time from the station representation.
    ///
    /// `secs` counts seconds within the half-day selected by `pm`; `frac`
    /// is the sub-second part in 1/256 s units.
    pub fn from_half_day(
        date: NaiveDate,
        pm: bool,
        secs: u32,
        frac: u8,
    ) -> Result<Self, TimeError> {
        if secs >= HALF_DAY_SECS {
            return Err(TimeError::new("seconds exceed half-day"));
        }
        let total = secs + if pm { HALF_DAY_SECS } else { 0 };
        let millis = (u32::from(frac) * 1000) / 256;
        let time = NaiveTime::from_num_seconds_from_midnight_opt(total, millis * 1_000_000)
            .ok_or_else(|| TimeError::new("time out of range"))?;
        Ok(Self::new(date, time))
    }

    /// Parse a time from "HH:MM:SS" with a given date.
    ///
    /// # Examples
    ///
    /// ```
    /// use punch_engine::domain::PunchTime;
    /// use chrono::NaiveDate;
    ///
    /// let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
    /// assert!(PunchTime::parse_hms("00:00:00", date).is_ok());
    /// assert!(PunchTime::parse_hms("23:59:59", date).is_ok());
    /// assert!(PunchTime::parse_hms("24:00:00", date).is_err());
    /// assert!(PunchTime::parse_hms("10:15", date).is_err());
    /// ```
    pub fn parse_hms(s: &str, date: NaiveDate) -> Result<Self, TimeError> {
        if s.len() != 8 {
            return Err(TimeError::new("expected HH:MM:SS format"));
        }
        let bytes = s.as_bytes();
        if bytes[2] != b':' || bytes[5] != b':' {
            return Err(TimeError::new("expected colons at positions 2 and 5"));
        }

        let hour =
            parse_two_digits(&bytes[0..2]).ok_or_else(|| TimeError::new("invalid hour digits"))?;
        let minute = parse_two_digits(&bytes[3..5])
            .ok_or_else(|| TimeError::new("invalid minute digits"))?;
        let second = parse_two_digits(&bytes[6..8])
            .ok_or_else(|| TimeError::new("invalid second digits"))?;

        let time = NaiveTime::from_hms_opt(hour, minute, second)
            .ok_or_else(|| TimeError::new("time out of range"))?;
        Ok(Self::new(date, time))
    }

    /// Returns the date component.
    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    /// Returns the time of day.
    pub fn time(&self) -> NaiveTime {
        self.0.time()
    }

    /// Converts to a NaiveDateTime.
    pub fn to_datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Whether the time falls in the afternoon half-day.
    pub fn is_pm(&self) -> bool {
        self.0.hour() >= 12
    }

    /// Seconds elapsed within the current half-day.
    pub fn half_day_secs(&self) -> u32 {
        self.0.num_seconds_from_midnight() % HALF_DAY_SECS
    }

    /// Add a duration, returning `None` on overflow.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add_signed(duration).map(Self)
    }

    /// Subtract a duration, returning `None` on overflow.
    pub fn checked_sub(&self, duration: Duration) -> Option<Self> {
        self.0.checked_sub_signed(duration).map(Self)
    }

    /// Returns the duration between two times.
    ///
    /// Returns a negative duration if `other` is after `self`.
    pub fn signed_duration_since(&self, other: Self) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Absolute distance between two times.
    pub fn abs_diff(&self, other: Self) -> Duration {
        self.signed_duration_since(other).abs()
    }
}

impl fmt::Debug for PunchTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PunchTime({} {})", self.date(), self)
    }
}

impl fmt::Display for PunchTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.time();
        write!(f, "{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
    }
}

/// Parse two ASCII digit bytes into a u32.
fn parse_two_digits(bytes: &[u8]) -> Option<u32> {
    if bytes.len() != 2 {
        return None;
    }
    let d1 = (bytes[0] as char).to_digit(10)?;
    let d2 = (bytes[1] as char).to_digit(10)?;
    Some(d1 * 10 + d2)
}

/// Resolve a sequence of twelve-hour times that carry no PM flag.
///
/// Older cards store only seconds within a half-day. Times on one card are
/// chronological, so whenever a value drops below its predecessor the clock
/// has wrapped into the next half-day. The first time is placed in the
/// half-day of `reference`. `None` entries are preserved.
///
/// # Examples
///
/// ```
/// use punch_engine::domain::{PunchTime, unwrap_half_day_sequence};
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
/// let reference = PunchTime::parse_hms("09:00:00", date).unwrap();
///
/// // 11:50, then 00:10 on the twelve-hour dial, i.e. 12:10
/// let raw = [Some(11 * 3600 + 50 * 60), Some(10 * 60)];
/// let times = unwrap_half_day_sequence(&raw, reference).unwrap();
/// assert_eq!(times[0].unwrap().to_string(), "11:50:00");
/// assert_eq!(times[1].unwrap().to_string(), "12:10:00");
/// ```
pub fn unwrap_half_day_sequence(
    secs: &[Option<u32>],
    reference: PunchTime,
) -> Result<Vec<Option<PunchTime>>, TimeError> {
    let mut result = Vec::with_capacity(secs.len());
    let mut date = reference.date();
    let mut pm = reference.is_pm();
    let mut prev: Option<u32> = None;

    for entry in secs {
        match entry {
            None => result.push(None),
            Some(s) => {
                if prev.is_some_and(|p| *s < p) {
                    if pm {
                        date = date
                            .succ_opt()
                            .ok_or_else(|| TimeError::new("date overflow"))?;
                    }
                    pm = !pm;
                }
                result.push(Some(PunchTime::from_half_day(date, pm, *s, 0)?));
                prev = Some(*s);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 9).unwrap()
    }

    #[test]
    fn parse_valid_times() {
        let t = PunchTime::parse_hms("10:15:30", date()).unwrap();
        assert_eq!(t.time(), NaiveTime::from_hms_opt(10, 15, 30).unwrap());
        assert_eq!(t.date(), date());
    }

    #[test]
    fn parse_invalid_format() {
        assert!(PunchTime::parse_hms("101530", date()).is_err());
        assert!(PunchTime::parse_hms("10-15-30", date()).is_err());
        assert!(PunchTime::parse_hms("1a:15:30", date()).is_err());
        assert!(PunchTime::parse_hms("10:60:00", date()).is_err());
    }

    #[test]
    fn half_day_conversion() {
        let am = PunchTime::from_half_day(date(), false, 3600, 0).unwrap();
        assert_eq!(am.to_string(), "01:00:00");
        assert!(!am.is_pm());

        let pm = PunchTime::from_half_day(date(), true, 3600, 128).unwrap();
        assert_eq!(pm.to_string(), "13:00:00");
        assert_eq!(pm.time().nanosecond(), 500_000_000);
        assert!(pm.is_pm());
        assert_eq!(pm.half_day_secs(), 3600);
    }

    #[test]
    fn half_day_rejects_overflow() {
        assert!(PunchTime::from_half_day(date(), false, HALF_DAY_SECS, 0).is_err());
    }

    #[test]
    fn ordering_and_durations() {
        let a = PunchTime::parse_hms("10:00:00", date()).unwrap();
        let b = PunchTime::parse_hms("10:00:40", date()).unwrap();
        assert!(a < b);
        assert_eq!(b.signed_duration_since(a), Duration::seconds(40));
        assert_eq!(a.signed_duration_since(b), Duration::seconds(-40));
        assert_eq!(a.abs_diff(b), Duration::seconds(40));
        assert_eq!(a.checked_add(Duration::seconds(40)), Some(b));
        assert_eq!(b.checked_sub(Duration::seconds(40)), Some(a));
    }

    #[test]
    fn unwrap_sequence_crosses_midnight() {
        let reference = PunchTime::parse_hms("22:00:00", date()).unwrap();
        let raw = [Some(11 * 3600 + 59 * 60), None, Some(60)];
        let times = unwrap_half_day_sequence(&raw, reference).unwrap();

        assert_eq!(times[0].unwrap().to_string(), "23:59:00");
        assert!(times[1].is_none());
        let next = times[2].unwrap();
        assert_eq!(next.to_string(), "00:01:00");
        assert_eq!(next.date(), date().succ_opt().unwrap());
    }

    #[test]
    fn unwrap_sequence_same_half_day() {
        let reference = PunchTime::parse_hms("09:00:00", date()).unwrap();
        let raw = [Some(9 * 3600), Some(9 * 3600 + 10), Some(9 * 3600 + 10)];
        let times = unwrap_half_day_sequence(&raw, reference).unwrap();
        assert!(times.iter().all(|t| !t.unwrap().is_pm()));
    }

    #[test]
    fn unwrap_sequence_empty() {
        let reference = PunchTime::parse_hms("09:00:00", date()).unwrap();
        assert!(unwrap_half_day_sequence(&[], reference).unwrap().is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Station encoding preserves the seconds within the half-day
        #[test]
        fn half_day_roundtrip(secs in 0u32..HALF_DAY_SECS, pm in any::<bool>()) {
            let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
            let t = PunchTime::from_half_day(date, pm, secs, 0).unwrap();
            prop_assert_eq!(t.half_day_secs(), secs);
            prop_assert_eq!(t.is_pm(), pm);
        }

        /// Unwrapped sequences never go backwards
        #[test]
        fn unwrapped_sequence_monotonic(raw in proptest::collection::vec(0u32..HALF_DAY_SECS, 0..40)) {
            let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
            let reference = PunchTime::new(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
            let input: Vec<Option<u32>> = raw.iter().copied().map(Some).collect();
            let times = unwrap_half_day_sequence(&input, reference).unwrap();
            for pair in times.windows(2) {
                prop_assert!(pair[0].unwrap() <= pair[1].unwrap());
            }
        }
    }
}
