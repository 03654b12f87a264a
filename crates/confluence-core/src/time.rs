//! Temporal dimension of components: calendars, datetimes, and the
//! [`TimeDomain`] describing a regular sequence of timestep bounds.
//!
//! All datetime arithmetic goes through a [`Calendar`]; calendars are never
//! mixed. The gregorian leg delegates to `chrono`, while the climate-model
//! calendars (`noleap`, `360_day`) use explicit day-count arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfluenceError, ConfluenceResult};

/// Supported calendars, in the CF-convention sense.
///
/// Aliases accepted on parsing: `standard` for gregorian, `365_day` for
/// noleap, and `all_leap` is intentionally not supported.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    Gregorian,
    Noleap,
    #[serde(rename = "360_day")]
    Day360,
}

impl Calendar {
    fn days_in_month(&self, year: i32, month: u32) -> u32 {
        const LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
        match self {
            Calendar::Day360 => 30,
            Calendar::Noleap => LENGTHS[month as usize - 1],
            Calendar::Gregorian => {
                if month == 2 && is_gregorian_leap(year) {
                    29
                } else {
                    LENGTHS[month as usize - 1]
                }
            }
        }
    }

    /// Number of days from the calendar's year 1 to the start of `year`.
    fn days_to_year(&self, year: i32) -> i64 {
        let y = i64::from(year) - 1;
        match self {
            Calendar::Day360 => y * 360,
            Calendar::Noleap => y * 365,
            Calendar::Gregorian => {
                // count of leap years strictly before `year`
                let leaps = |y: i64| y / 4 - y / 100 + y / 400;
                y * 365 + leaps(y)
            }
        }
    }

    /// Zero-based ordinal day of `dt` within its year.
    fn day_of_year(&self, dt: DateTime) -> u32 {
        let mut days = 0;
        for m in 1..dt.month {
            days += self.days_in_month(dt.year, m);
        }
        days + dt.day - 1
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Calendar::Gregorian => "gregorian",
            Calendar::Noleap => "noleap",
            Calendar::Day360 => "360_day",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Calendar {
    type Err = ConfluenceError;

    fn from_str(s: &str) -> ConfluenceResult<Self> {
        match s.to_lowercase().as_str() {
            "gregorian" | "standard" | "proleptic_gregorian" => Ok(Calendar::Gregorian),
            "noleap" | "365_day" => Ok(Calendar::Noleap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(ConfluenceError::Config(format!(
                "calendar '{other}' is not supported"
            ))),
        }
    }
}

fn is_gregorian_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// A civil datetime without an attached calendar.
///
/// Whether a given datetime is valid, and what lies one step after it,
/// depends on the [`Calendar`] doing the arithmetic; `DateTime` itself only
/// carries the civil fields. Ordering is lexicographic on the fields, which
/// is consistent within any single calendar.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl DateTime {
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Parse from `YYYY-MM-DD HH:MM:SS` (the seconds part may be omitted
    /// along with the minutes and hours).
    pub fn parse(text: &str) -> ConfluenceResult<Self> {
        let error = || ConfluenceError::Config(format!("cannot parse datetime '{text}'"));

        let (date, time) = match text.trim().split_once([' ', 'T']) {
            Some((d, t)) => (d, t),
            None => (text.trim(), "00:00:00"),
        };

        let mut ymd = date.splitn(3, '-');
        let year = ymd.next().and_then(|v| v.parse().ok()).ok_or_else(error)?;
        let month = ymd.next().and_then(|v| v.parse().ok()).ok_or_else(error)?;
        let day = ymd.next().and_then(|v| v.parse().ok()).ok_or_else(error)?;

        let mut hms = time.splitn(3, ':');
        let hour = hms.next().and_then(|v| v.parse().ok()).ok_or_else(error)?;
        let minute = hms.next().map_or(Some(0), |v| v.parse().ok()).ok_or_else(error)?;
        let second = hms.next().map_or(Some(0), |v| v.parse().ok()).ok_or_else(error)?;

        let dt = DateTime::new(year, month, day, hour, minute, second);
        if month == 0 || month > 12 || day == 0 || hour > 23 || minute > 59 || second > 59 {
            return Err(error());
        }
        Ok(dt)
    }

    /// Validate the datetime against a calendar.
    pub fn validate(&self, calendar: Calendar) -> ConfluenceResult<()> {
        if self.day > calendar.days_in_month(self.year, self.month) {
            return Err(ConfluenceError::Config(format!(
                "datetime {self} does not exist in calendar {calendar}"
            )));
        }
        Ok(())
    }

    /// Seconds since 1970-01-01 00:00:00 in the given calendar.
    pub fn timestamp(&self, calendar: Calendar) -> i64 {
        match calendar {
            Calendar::Gregorian => self.to_chrono().and_utc().timestamp(),
            _ => {
                let epoch_days = calendar.days_to_year(1970);
                let days = calendar.days_to_year(self.year)
                    + i64::from(calendar.day_of_year(*self))
                    - epoch_days;
                days * 86_400
                    + i64::from(self.hour) * 3_600
                    + i64::from(self.minute) * 60
                    + i64::from(self.second)
            }
        }
    }

    /// Reconstruct a datetime from seconds since 1970-01-01 00:00:00.
    pub fn from_timestamp(timestamp: i64, calendar: Calendar) -> Self {
        match calendar {
            Calendar::Gregorian => {
                let dt = chrono::DateTime::from_timestamp(timestamp, 0)
                    .expect("timestamp out of chrono range")
                    .naive_utc();
                DateTime::from_chrono(dt)
            }
            _ => {
                let days_per_year = match calendar {
                    Calendar::Noleap => 365,
                    _ => 360,
                };
                let total_days = timestamp.div_euclid(86_400) + calendar.days_to_year(1970);
                let secs = timestamp.rem_euclid(86_400);
                let year = (total_days.div_euclid(days_per_year) + 1) as i32;
                let mut doy = total_days.rem_euclid(days_per_year) as u32;
                let mut month = 1;
                while doy >= calendar.days_in_month(year, month) {
                    doy -= calendar.days_in_month(year, month);
                    month += 1;
                }
                DateTime::new(
                    year,
                    month,
                    doy + 1,
                    (secs / 3_600) as u32,
                    (secs / 60 % 60) as u32,
                    (secs % 60) as u32,
                )
            }
        }
    }

    /// The datetime `seconds` later in the given calendar.
    pub fn add_seconds(&self, seconds: i64, calendar: Calendar) -> Self {
        DateTime::from_timestamp(self.timestamp(calendar) + seconds, calendar)
    }

    /// Whole seconds separating `self` from `later` in the given calendar.
    pub fn seconds_until(&self, later: &DateTime, calendar: Calendar) -> i64 {
        later.timestamp(calendar) - self.timestamp(calendar)
    }

    fn to_chrono(self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .expect("gregorian datetime out of range")
            .and_hms_opt(self.hour, self.minute, self.second)
            .expect("time of day out of range")
    }

    fn from_chrono(dt: NaiveDateTime) -> Self {
        DateTime::new(
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// The bucket of a climatologic input that a datetime falls into.
pub fn climatology_bucket(dt: DateTime, calendar: Calendar, length: usize) -> usize {
    match length {
        // DJF, MAM, JJA, SON
        4 => (dt.month as usize % 12) / 3,
        12 => dt.month as usize - 1,
        _ => calendar.day_of_year(dt) as usize,
    }
}

/// The temporal dimension of a component: a monotone sequence of `length`
/// timesteps of constant `step_seconds`, starting at `start`, under a
/// given calendar.
///
/// The sequence has `length + 1` bounds; the first bound is the start of
/// the first timestep and the last bound the end of the last timestep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDomain {
    start: DateTime,
    step_seconds: i64,
    length: usize,
    calendar: Calendar,
}

impl TimeDomain {
    /// Build a time domain from the period `[start, end]` and a constant
    /// step. The period must be a whole number of steps; `end == start`
    /// yields an empty domain.
    pub fn from_start_end_step(
        start: DateTime,
        end: DateTime,
        step_seconds: i64,
        calendar: Calendar,
    ) -> ConfluenceResult<Self> {
        start.validate(calendar)?;
        end.validate(calendar)?;
        if step_seconds <= 0 {
            return Err(ConfluenceError::Config(format!(
                "timestep must be strictly positive, got {step_seconds}s"
            )));
        }
        let span = start.seconds_until(&end, calendar);
        if span < 0 {
            return Err(ConfluenceError::Config(format!(
                "end of period ({end}) is earlier than its start ({start})"
            )));
        }
        if span % step_seconds != 0 {
            return Err(ConfluenceError::Config(format!(
                "period [{start}, {end}] is not a whole number of {step_seconds}s timesteps"
            )));
        }
        Ok(Self {
            start,
            step_seconds,
            length: (span / step_seconds) as usize,
            calendar,
        })
    }

    pub fn start(&self) -> DateTime {
        self.start
    }

    pub fn end(&self) -> DateTime {
        self.start
            .add_seconds(self.step_seconds * self.length as i64, self.calendar)
    }

    pub fn step_seconds(&self) -> i64 {
        self.step_seconds
    }

    /// Number of timesteps enclosed by the bounds.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn period_seconds(&self) -> i64 {
        self.step_seconds * self.length as i64
    }

    /// Datetime of the lower bound of timestep `index`.
    pub fn datetime_at(&self, index: usize) -> DateTime {
        self.start
            .add_seconds(self.step_seconds * index as i64, self.calendar)
    }

    /// Lower and upper bounds of timestep `index`.
    pub fn bounds_at(&self, index: usize) -> (DateTime, DateTime) {
        (self.datetime_at(index), self.datetime_at(index + 1))
    }

    /// Timestep index whose lower bound is `at`, if `at` lies on one.
    pub fn index_of(&self, at: DateTime) -> Option<usize> {
        let offset = self.start.seconds_until(&at, self.calendar);
        if offset < 0 || offset % self.step_seconds != 0 {
            return None;
        }
        let index = (offset / self.step_seconds) as usize;
        (index <= self.length).then_some(index)
    }

    /// Whether the two domains cover exactly the same period.
    pub fn spans_same_period_as(&self, other: &TimeDomain) -> bool {
        self.calendar == other.calendar
            && self.start == other.start
            && self.period_seconds() == other.period_seconds()
    }

    /// Whether two domains may be coupled: same calendar, same period, and
    /// the coarser step a whole multiple of the finer one.
    pub fn aligns_with(&self, other: &TimeDomain) -> bool {
        let (fast, slow) = if self.step_seconds <= other.step_seconds {
            (self.step_seconds, other.step_seconds)
        } else {
            (other.step_seconds, self.step_seconds)
        };
        self.spans_same_period_as(other) && slow % fast == 0
    }

    /// A domain with the same step and calendar over the sub-period
    /// `[start, end]`, used for spin-up cycles.
    pub fn subperiod(&self, start: DateTime, end: DateTime) -> ConfluenceResult<TimeDomain> {
        TimeDomain::from_start_end_step(start, end, self.step_seconds, self.calendar)
    }
}

impl fmt::Display for TimeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimeDomain({} to {}, step {}s, {} steps, {})",
            self.start,
            self.end(),
            self.step_seconds,
            self.length,
            self.calendar
        )
    }
}
