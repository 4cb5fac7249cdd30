//! Open windows and the time-window evaluator.
//!
//! An open window is a recurring local-time interval during which a class's
//! students may interact with the system. Evaluation is pure: callers pass
//! the local wall-clock time explicitly.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::errors::CourierError;
use super::ids::{ClassId, WindowId};

/// Local time of day at minute resolution (`HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, CourierError> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(TimeOfDay)
            .ok_or_else(|| CourierError::validation(format!("invalid time {hour:02}:{minute:02}")))
    }

    /// Truncate a wall-clock time to its minute.
    pub fn of(time: NaiveTime) -> Self {
        // hour/minute from a valid NaiveTime always form a valid time
        TimeOfDay(NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time))
    }

    pub fn as_time(self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CourierError::validation(format!("malformed time '{s}' (expected HH:MM)"));
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Set of weekdays. Empty means "every day".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DaySet(u8);

impl DaySet {
    pub const fn every_day() -> Self {
        DaySet(0)
    }

    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, CourierError> {
        names.iter().try_fold(DaySet::default(), |set, name| {
            let day = name.as_ref().trim().parse::<Weekday>().map_err(|_| {
                CourierError::validation(format!("unknown weekday '{}'", name.as_ref()))
            })?;
            Ok(set.with(day))
        })
    }

    pub fn with(self, day: Weekday) -> Self {
        DaySet(self.0 | (1 << day.num_days_from_monday()))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Does `day` qualify? An empty set admits every day.
    pub fn admits(self, day: Weekday) -> bool {
        self.is_empty() || self.admits_exactly(day)
    }

    pub fn days(self) -> Vec<Weekday> {
        WEEK.into_iter().filter(|day| self.admits_exactly(*day)).collect()
    }

    fn admits_exactly(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }
}

impl Serialize for DaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.days().into_iter().map(weekday_name))
    }
}

impl<'de> Deserialize<'de> for DaySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
        DaySet::parse(&names).map_err(serde::de::Error::custom)
    }
}

/// Short English weekday name (`Mon` .. `Sun`), the form stored with windows.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Recurring access window of a class.
///
/// - `start == end`: open all day on the admitted days
/// - `start < end`: same-day window, bounds inclusive
/// - `start > end`: crosses midnight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenWindow {
    pub id: WindowId,
    pub class_id: ClassId,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    #[serde(default)]
    pub days: DaySet,
}

impl OpenWindow {
    /// Build a window from its stored textual form.
    pub fn parse<S: AsRef<str>>(
        id: WindowId,
        class_id: ClassId,
        start: &str,
        end: &str,
        days: &[S],
    ) -> Result<Self, CourierError> {
        Ok(Self {
            id,
            class_id,
            start: start.parse()?,
            end: end.parse()?,
            days: DaySet::parse(days)?,
        })
    }

    pub fn crosses_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Is `now` (local wall-clock) inside this window?
    ///
    /// For a midnight-crossing window today's membership gates the late
    /// segment and yesterday's membership gates the early segment.
    pub fn matches(&self, now: NaiveDateTime) -> bool {
        let today = now.weekday();
        let yesterday = today.pred();
        let time = now.time();
        let (start, end) = (self.start.as_time(), self.end.as_time());

        if start == end {
            return self.days.admits(today);
        }
        if start < end {
            return self.days.admits(today) && start <= time && time <= end;
        }
        (self.days.admits(today) && time >= start) || (self.days.admits(yesterday) && time <= end)
    }
}

/// Aggregate evaluator: true iff some window matches.
///
/// No windows means closed.
pub fn is_open(windows: &[OpenWindow], now: NaiveDateTime) -> bool {
    windows.iter().any(|w| w.matches(now))
}
