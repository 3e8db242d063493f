use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive window over device-local timestamps.
///
/// `end` is the last millisecond of the end date: a punch at 23:59:59.999 on
/// the end date is inside, one at 00:00:00.000 the next day is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("end date {end} is before start date {start}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("end date {0} is out of range")]
    OutOfRange(NaiveDate),
}

impl DateRange {
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if end < start {
            return Err(DateRangeError::Inverted { start, end });
        }

        let next_day = end
            .checked_add_days(Days::new(1))
            .ok_or(DateRangeError::OutOfRange(end))?;

        Ok(Self {
            start: start.and_time(NaiveTime::MIN),
            end: next_day.and_time(NaiveTime::MIN) - TimeDelta::milliseconds(1),
        })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, DateRangeError> {
        Self::from_dates(parse_date(start)?, parse_date(end)?)
    }

    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        self.start <= *timestamp && *timestamp <= self.end
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| DateRangeError::InvalidDate(raw.to_string()))
}
