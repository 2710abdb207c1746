//! Weekly time slots and interval overlap.

pub mod conflict;

use chrono::{NaiveTime, Timelike, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

// e.g. "Mon 09:00-10:30", "tuesday 13:00 - 14:15"
static SLOT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\s+(\d{1,2}):(\d{2})\s*-\s*(\d{1,2}):(\d{2})\s*$").unwrap()
});

/// Errors raised while building a [`TimeSlot`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Slot must start before it ends (start {start}, end {end})")]
    InvalidRange { start: NaiveTime, end: NaiveTime },

    #[error("Could not parse time slot: {input:?}")]
    Unparsable { input: String },
}

/// One weekly meeting: a weekday plus a same-day `[start, end)` interval.
///
/// Fields are private so every slot in the system satisfies `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TimeSlot {
    day: Weekday,
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeSlot {
    /// Creates a slot, rejecting empty or inverted intervals.
    pub fn new(day: Weekday, start: NaiveTime, end: NaiveTime) -> Result<Self, ScheduleError> {
        if start >= end {
            return Err(ScheduleError::InvalidRange { start, end });
        }

        Ok(Self { day, start, end })
    }

    /// Convenience constructor from hour/minute pairs.
    pub fn from_hm(
        day: Weekday,
        (start_hr, start_min): (u32, u32),
        (end_hr, end_min): (u32, u32),
    ) -> Result<Self, ScheduleError> {
        let start = NaiveTime::from_hms_opt(start_hr, start_min, 0);
        let end = NaiveTime::from_hms_opt(end_hr, end_min, 0);
        match (start, end) {
            (Some(start), Some(end)) => Self::new(day, start, end),
            _ => Err(ScheduleError::Unparsable {
                input: format!("{start_hr}:{start_min:02}-{end_hr}:{end_min:02}"),
            }),
        }
    }

    pub fn day(&self) -> Weekday {
        self.day
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Day as stored in the database: 1 (Monday) through 7 (Sunday).
    pub fn day_number(&self) -> u32 {
        self.day.number_from_monday()
    }

    /// Minutes since midnight for the start and end of the slot.
    pub fn minute_range(&self) -> (u32, u32) {
        (
            self.start.num_seconds_from_midnight() / 60,
            self.end.num_seconds_from_midnight() / 60,
        )
    }
}

/// Returns true iff both slots fall on the same weekday and their half-open
/// intervals intersect. Touching endpoints do not overlap.
pub fn overlaps(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.day == b.day && a.start < b.end && b.start < a.end
}

/// Maps a stored day number (1 = Monday) back to a weekday.
pub fn weekday_from_number(n: u32) -> Option<Weekday> {
    match n {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.day,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl FromStr for TimeSlot {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unparsable = || ScheduleError::Unparsable {
            input: s.to_string(),
        };

        let caps = SLOT_REGEX.captures(s).ok_or_else(unparsable)?;
        let day = Weekday::from_str(&caps[1]).map_err(|_| unparsable())?;

        let num = |i: usize| caps[i].parse::<u32>().map_err(|_| unparsable());
        Self::from_hm(day, (num(2)?, num(3)?), (num(4)?, num(5)?))
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
