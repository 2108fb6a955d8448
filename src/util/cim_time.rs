//! CIM datetime handling for array-reported values.
//!
//! The management service encodes two kinds of values in the same fixed-width
//! layout:
//! - Timestamps: `YYYYMMDDHHMMSS.ffffff` followed by a UTC offset in
//!   minutes (`+000`, `-300`, or unsigned `0000`).
//! - Intervals: `ddddddddhhmmss.ffffff:000`, where the `:` marks an interval.
//!
//! Arrays are known to misreport their timezone and DST state, so timestamps
//! are normalized to UTC using the declared offset and then re-localized with
//! the collector's own UTC-to-local delta, never the array's.

use std::time::Duration;

use chrono::{LocalResult, NaiveDateTime, Offset, TimeDelta, TimeZone, Timelike, Utc};

/// Length of the date/time portion, `YYYYMMDDHHMMSS.ffffff`.
const STAMP_LEN: usize = 21;
/// Length of the offset / interval suffix, `+000` or `:000`.
const SUFFIX_LEN: usize = 4;

/// Error type for CIM datetime parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CimTimeError {
    pub input: String,
    pub message: String,
}

impl CimTimeError {
    fn new(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CimTimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to parse CIM datetime '{}': {}",
            self.input, self.message
        )
    }
}

impl std::error::Error for CimTimeError {}

/// A timestamp as reported by the array: wall-clock fields plus the
/// array's declared UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CimTimestamp {
    wall_clock: NaiveDateTime,
    offset_minutes: i32,
}

impl CimTimestamp {
    /// Parses `YYYYMMDDHHMMSS.ffffff+ooo`. Fractional seconds are dropped.
    pub fn parse(input: &str) -> Result<Self, CimTimeError> {
        let trimmed = input.trim();
        let (stamp, suffix) = split_fixed(trimmed)?;

        if suffix.starts_with(':') {
            return Err(CimTimeError::new(
                trimmed,
                "value is an interval, not a timestamp",
            ));
        }
        // Some firmware reports an unsigned `0000` instead of `+000`.
        let signed = suffix.starts_with(['+', '-']);
        if !signed && !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CimTimeError::new(
                trimmed,
                "offset must be signed minutes or four digits",
            ));
        }
        let offset_minutes = suffix
            .parse::<i32>()
            .map_err(|_| CimTimeError::new(trimmed, "offset is not a number of minutes"))?;

        let wall_clock = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S%.f")
            .map_err(|e| CimTimeError::new(trimmed, e.to_string()))?;
        let wall_clock = wall_clock
            .with_nanosecond(0)
            .ok_or_else(|| CimTimeError::new(trimmed, "invalid fractional seconds"))?;

        Ok(Self {
            wall_clock,
            offset_minutes,
        })
    }

    /// Wall-clock fields exactly as reported.
    pub fn wall_clock(&self) -> NaiveDateTime {
        self.wall_clock
    }

    /// Offset from UTC declared by the array, in minutes.
    pub fn offset_minutes(&self) -> i32 {
        self.offset_minutes
    }

    /// The array's offset convention is additive-from-UTC, so subtracting it
    /// recovers UTC.
    pub fn to_utc(&self) -> NaiveDateTime {
        self.wall_clock - TimeDelta::minutes(self.offset_minutes as i64)
    }

    /// UTC re-localized with the current UTC-to-local delta of `zone`.
    pub fn to_local_in<Tz: TimeZone>(&self, zone: &Tz) -> NaiveDateTime {
        let delta = zone
            .offset_from_utc_datetime(&Utc::now().naive_utc())
            .fix()
            .local_minus_utc();
        self.to_utc() + TimeDelta::seconds(delta as i64)
    }

    /// Local wall-clock time as seen by this process.
    pub fn to_local(&self) -> NaiveDateTime {
        self.to_local_in(&chrono::Local)
    }

    /// Epoch seconds of the re-localized wall clock, resolved in `zone`.
    ///
    /// Equals the UTC epoch except across a DST transition that happened
    /// between the sample and now, where the process's current delta wins.
    pub fn epoch_in<Tz: TimeZone>(&self, zone: &Tz) -> i64 {
        let local = self.to_local_in(zone);
        match zone.from_local_datetime(&local) {
            LocalResult::Single(dt) => dt.timestamp(),
            LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
            LocalResult::None => self.to_utc().and_utc().timestamp(),
        }
    }

    /// Epoch seconds in the process's local zone.
    pub fn epoch(&self) -> i64 {
        self.epoch_in(&chrono::Local)
    }
}

impl std::str::FromStr for CimTimestamp {
    type Err = CimTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Converts a CIM timestamp string to the collector's local wall clock.
pub fn convert_to_local(input: &str) -> Result<NaiveDateTime, CimTimeError> {
    CimTimestamp::parse(input).map(|ts| ts.to_local())
}

/// Parses a CIM interval (`ddddddddhhmmss.ffffff:000`).
pub fn parse_cim_interval(input: &str) -> Result<Duration, CimTimeError> {
    let trimmed = input.trim();
    let (stamp, suffix) = split_fixed(trimmed)?;
    if !suffix.starts_with(':') {
        return Err(CimTimeError::new(
            trimmed,
            "value is a timestamp, not an interval",
        ));
    }

    let field = |range: std::ops::Range<usize>, name: &str| -> Result<u64, CimTimeError> {
        stamp[range]
            .parse::<u64>()
            .map_err(|_| CimTimeError::new(trimmed, format!("invalid {} field", name)))
    };

    if stamp.as_bytes()[14] != b'.' {
        return Err(CimTimeError::new(trimmed, "missing '.' separator"));
    }
    let days = field(0..8, "days")?;
    let hours = field(8..10, "hours")?;
    let minutes = field(10..12, "minutes")?;
    let seconds = field(12..14, "seconds")?;
    let micros = field(15..21, "microseconds")?;

    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(CimTimeError::new(trimmed, "field out of range"));
    }

    let secs = days * 86_400 + hours * 3_600 + minutes * 60 + seconds;
    Ok(Duration::from_secs(secs) + Duration::from_micros(micros))
}

/// Formats a duration as a CIM interval.
pub fn format_cim_interval(interval: Duration) -> String {
    let total = interval.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!(
        "{:08}{:02}{:02}{:02}.{:06}:000",
        days,
        hours,
        minutes,
        seconds,
        interval.subsec_micros()
    )
}

fn split_fixed(input: &str) -> Result<(&str, &str), CimTimeError> {
    if !input.is_ascii() || input.len() != STAMP_LEN + SUFFIX_LEN {
        return Err(CimTimeError::new(
            input,
            format!("expected {} ASCII characters", STAMP_LEN + SUFFIX_LEN),
        ));
    }
    Ok(input.split_at(STAMP_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn parse_zero_offset() {
        let ts = CimTimestamp::parse("20230101120000.000000+000").unwrap();
        assert_eq!(ts.wall_clock(), at(2023, 1, 1, 12, 0, 0));
        assert_eq!(ts.offset_minutes(), 0);
    }

    #[test]
    fn parse_drops_fractional_seconds() {
        let ts = CimTimestamp::parse("20230101120005.750000+000").unwrap();
        assert_eq!(ts.wall_clock(), at(2023, 1, 1, 12, 0, 5));
    }

    #[test]
    fn negative_offset_moves_utc_forward() {
        let ts = CimTimestamp::parse("20230101120000.000000-300").unwrap();
        assert_eq!(ts.offset_minutes(), -300);
        assert_eq!(ts.to_utc(), at(2023, 1, 1, 17, 0, 0));
    }

    #[test]
    fn positive_offset_moves_utc_back() {
        let ts = CimTimestamp::parse("20230101120000.000000+060").unwrap();
        assert_eq!(ts.to_utc(), at(2023, 1, 1, 11, 0, 0));
    }

    #[test]
    fn local_equals_wall_clock_when_process_is_utc() {
        let ts = CimTimestamp::parse("20230101120000.000000+000").unwrap();
        assert_eq!(ts.to_local_in(&Utc), at(2023, 1, 1, 12, 0, 0));
        assert_eq!(ts.epoch_in(&Utc), 1_672_574_400);
    }

    // The array's declared offset is only used to reach UTC; the process
    // zone decides presentation. A wrong array offset therefore shifts the
    // result, which is the accepted best-effort behavior.
    #[test]
    fn relocalizes_with_process_delta_not_array_offset() {
        let ts = CimTimestamp::parse("20230101120000.000000-300").unwrap();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(ts.to_local_in(&plus_two), at(2023, 1, 1, 19, 0, 0));
        // Resolving the local wall clock in the same zone yields the UTC epoch.
        assert_eq!(
            ts.epoch_in(&plus_two),
            at(2023, 1, 1, 17, 0, 0).and_utc().timestamp()
        );
    }

    #[test]
    fn parse_unsigned_offset() {
        let ts = CimTimestamp::parse("20230101120000.0000000000").unwrap();
        assert_eq!(ts.offset_minutes(), 0);
        assert_eq!(ts.to_utc(), at(2023, 1, 1, 12, 0, 0));
        assert_eq!(ts, CimTimestamp::parse("20230101120000.000000+000").unwrap());
    }

    #[test]
    fn rejects_non_numeric_offset() {
        let err = CimTimestamp::parse("20230101120000.000000x000").unwrap_err();
        assert!(err.message.contains("offset"));
        assert!(CimTimestamp::parse("20230101120000.0000000a00").is_err());
    }

    #[test]
    fn rejects_interval_as_timestamp() {
        let err = CimTimestamp::parse("00000000001000.000000:000").unwrap_err();
        assert!(err.message.contains("interval"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(CimTimestamp::parse("").is_err());
        assert!(CimTimestamp::parse("2023-01-01T12:00:00").is_err());
        assert!(CimTimestamp::parse("20231301120000.000000+000").is_err());
        assert!(CimTimestamp::parse("20230101120000.000000*000").is_err());
        assert!(CimTimestamp::parse("20230101120000.000000+0x0").is_err());
    }

    #[test]
    fn convert_to_local_accepts_surrounding_whitespace() {
        assert!(convert_to_local(" 20230101120000.000000+000\n").is_ok());
    }

    #[test]
    fn interval_ten_minutes() {
        let d = parse_cim_interval("00000000001000.000000:000").unwrap();
        assert_eq!(d, Duration::from_secs(600));
        assert_eq!(format_cim_interval(d), "00000000001000.000000:000");
    }

    #[test]
    fn interval_with_days_and_hours() {
        let d = Duration::from_secs(2 * 86_400 + 3 * 3_600 + 5 * 60 + 7);
        let text = format_cim_interval(d);
        assert_eq!(text, "00000002030507.000000:000");
        assert_eq!(parse_cim_interval(&text).unwrap(), d);
    }

    #[test]
    fn interval_rejects_timestamp() {
        assert!(parse_cim_interval("20230101120000.000000+000").is_err());
        assert!(parse_cim_interval("00000000006100.000000:000").is_err());
    }
}
