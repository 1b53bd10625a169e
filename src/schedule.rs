//! Weekly backup schedules.
//!
//! A schedule is a set of enabled weekdays plus one trigger time. The time is
//! stored in 24-hour form only; the 12-hour view is derived on demand.

use crate::error::{BackupError, Result};
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SUNDAY_FIRST: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Bitmask of enabled days, bit 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Weekday>", into = "Vec<Weekday>")]
pub struct Weekdays(u8);

impl Weekdays {
    pub const NONE: Weekdays = Weekdays(0);
    pub const EVERY_DAY: Weekdays = Weekdays(0b111_1111);

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_sunday()
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn set(&mut self, day: Weekday, enabled: bool) {
        if enabled {
            self.0 |= Self::bit(day);
        } else {
            self.0 &= !Self::bit(day);
        }
    }

    pub fn with(mut self, day: Weekday) -> Self {
        self.set(day, true);
        self
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Enabled days, Sunday first.
    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        SUNDAY_FIRST.into_iter().filter(move |day| self.contains(*day))
    }
}

impl From<Vec<Weekday>> for Weekdays {
    fn from(days: Vec<Weekday>) -> Self {
        days.into_iter().fold(Weekdays::NONE, Weekdays::with)
    }
}

impl From<Weekdays> for Vec<Weekday> {
    fn from(days: Weekdays) -> Self {
        days.iter().collect()
    }
}

impl FromStr for Weekdays {
    type Err = BackupError;

    /// Accepts `daily`, `weekdays`, `weekends`, `none`, or a comma separated
    /// list of day names (`mon,wed,fri`).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "all" | "every day" => return Ok(Weekdays::EVERY_DAY),
            "none" | "" => return Ok(Weekdays::NONE),
            "weekdays" => {
                return Ok([Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
                    .into_iter()
                    .fold(Weekdays::NONE, Weekdays::with))
            }
            "weekends" => return Ok(Weekdays::NONE.with(Weekday::Sat).with(Weekday::Sun)),
            _ => {}
        }

        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Weekdays::NONE, |days, part| {
                Weekday::from_str(part)
                    .map(|day| days.with(day))
                    .map_err(|_| BackupError::InvalidSchedule(format!("unknown weekday '{part}'")))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meridiem {
    Am,
    Pm,
}

impl fmt::Display for Meridiem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Meridiem::Am => f.write_str("AM"),
            Meridiem::Pm => f.write_str("PM"),
        }
    }
}

/// 12-hour rendering of a [`TimeOfDay`]. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwelveHourTime {
    /// 1..=12
    pub hour: u8,
    pub minute: u8,
    pub meridiem: Meridiem,
}

impl fmt::Display for TwelveHourTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02} {}", self.hour, self.minute, self.meridiem)
    }
}

/// Wall-clock time with minute resolution, 24-hour form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(BackupError::InvalidSchedule(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn from_twelve_hour(hour: u8, minute: u8, meridiem: Meridiem) -> Result<Self> {
        if !(1..=12).contains(&hour) {
            return Err(BackupError::InvalidSchedule(format!("{hour:02}:{minute:02} {meridiem}")));
        }
        let hour24 = match (meridiem, hour) {
            (Meridiem::Am, 12) => 0,
            (Meridiem::Am, h) => h,
            (Meridiem::Pm, 12) => 12,
            (Meridiem::Pm, h) => h + 12,
        };
        Self::new(hour24, minute)
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }

    pub fn to_twelve_hour(self) -> TwelveHourTime {
        let (hour, meridiem) = match self.hour {
            0 => (12, Meridiem::Am),
            h @ 1..=11 => (h, Meridiem::Am),
            12 => (12, Meridiem::Pm),
            h => (h - 12, Meridiem::Pm),
        };
        TwelveHourTime {
            hour,
            minute: self.minute,
            meridiem,
        }
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self { hour: 6, minute: 0 }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = BackupError;

    /// Parses `HH:MM` (24-hour) or `h:MM AM` / `h:MM PM`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BackupError::InvalidSchedule(s.to_string());
        let trimmed = s.trim();

        let upper = trimmed.to_ascii_uppercase();
        let (clock, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
            (rest.trim_end().to_string(), Some(Meridiem::Am))
        } else if let Some(rest) = upper.strip_suffix("PM") {
            (rest.trim_end().to_string(), Some(Meridiem::Pm))
        } else {
            (upper.clone(), None)
        };

        let (hour, minute) = clock.split_once(':').ok_or_else(invalid)?;
        let hour: u8 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u8 = minute.trim().parse().map_err(|_| invalid())?;

        match meridiem {
            Some(meridiem) => Self::from_twelve_hour(hour, minute, meridiem),
            None => Self::new(hour, minute),
        }
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = BackupError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(time: TimeOfDay) -> Self {
        time.to_string()
    }
}

fn minutes_of(time: &NaiveDateTime) -> u32 {
    time.hour() * 60 + time.minute()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub days: Weekdays,
    pub time: TimeOfDay,
}

impl Schedule {
    pub fn new(days: Weekdays, time: TimeOfDay) -> Self {
        Self { days, time }
    }

    pub fn daily(time: TimeOfDay) -> Self {
        Self::new(Weekdays::EVERY_DAY, time)
    }

    pub fn is_day_enabled(&self, day: Weekday) -> bool {
        self.days.contains(day)
    }

    pub fn is_time_reached(&self, now: &NaiveDateTime) -> bool {
        minutes_of(now) >= self.time.minutes_since_midnight()
    }

    /// Whether `last_run` happened today at or after the trigger time.
    pub fn already_ran_today(&self, last_run: Option<&NaiveDateTime>, now: &NaiveDateTime) -> bool {
        last_run.is_some_and(|last| {
            last.date() == now.date() && minutes_of(last) >= self.time.minutes_since_midnight()
        })
    }

    /// The schedule has fired for today and has not been served yet.
    pub fn is_due(&self, now: &NaiveDateTime, last_run: Option<&NaiveDateTime>) -> bool {
        self.is_time_reached(now)
            && self.is_day_enabled(now.weekday())
            && !self.already_ran_today(last_run, now)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LABELS: [&str; 7] = ["Su", "M", "Tu", "W", "Th", "F", "Sa"];

        for (label, day) in LABELS.iter().zip(SUNDAY_FIRST) {
            let flag = if self.days.contains(day) { "(T)" } else { "(F)" };
            write!(f, "{label}: {flag} ")?;
        }
        write!(f, "Time: {}", self.time.to_twelve_hour())
    }
}
