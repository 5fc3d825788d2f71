//! Slot labels and date arithmetic for the rolling summary window.
//!
//! A domain's window is `MONTHS_IN_WINDOW` calendar-month slots, each labelled
//! by the first day of its month, plus one always-current thirty-day slot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing calendar months kept per domain.
pub const MONTHS_IN_WINDOW: usize = 12;

/// Monthly slots plus the rolling thirty-day slot.
pub const EXPECTED_SLOT_COUNT: usize = MONTHS_IN_WINDOW + 1;

/// Stored label of the rolling thirty-day slot.
pub const THIRTY_DAYS_LABEL: &str = "thirtyDays";

pub const THIRTY_DAY_SPAN_DAYS: i64 = 30;

/// Position of a slot in a domain's window.
///
/// Ordering puts every month (oldest first) before the thirty-day slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SlotLabel {
    Month(NaiveDate),
    ThirtyDays,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid slot label {0:?}: expected YYYY-MM-01 or \"thirtyDays\"")]
pub struct LabelParseError(pub String);

impl SlotLabel {
    pub fn is_thirty_days(&self) -> bool {
        matches!(self, SlotLabel::ThirtyDays)
    }

    pub fn as_month(&self) -> Option<NaiveDate> {
        match self {
            SlotLabel::Month(date) => Some(*date),
            SlotLabel::ThirtyDays => None,
        }
    }

    /// Report date range summarised by this slot when filled at `now`.
    pub fn range(&self, now: DateTime<Utc>) -> DateRange {
        match self {
            SlotLabel::Month(start) => DateRange::month(*start),
            SlotLabel::ThirtyDays => DateRange::thirty_days_ending(now.date_naive()),
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotLabel::Month(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            SlotLabel::ThirtyDays => f.write_str(THIRTY_DAYS_LABEL),
        }
    }
}

impl FromStr for SlotLabel {
    type Err = LabelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == THIRTY_DAYS_LABEL {
            return Ok(SlotLabel::ThirtyDays);
        }
        match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            Ok(date) if date.day() == 1 => Ok(SlotLabel::Month(date)),
            _ => Err(LabelParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for SlotLabel {
    type Error = LabelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotLabel> for String {
    fn from(label: SlotLabel) -> Self {
        label.to_string()
    }
}

/// Half-open report date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn month(start: NaiveDate) -> Self {
        let start = month_start(start);
        Self {
            start,
            end: shift_months(start, 1),
        }
    }

    /// Thirty days back from `today`, `today` included.
    pub fn thirty_days_ending(today: NaiveDate) -> Self {
        Self {
            start: today - Duration::days(THIRTY_DAY_SPAN_DAYS),
            end: today + Duration::days(1),
        }
    }
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Month start `months` months away from the month containing `date`.
pub fn shift_months(date: NaiveDate, months: i32) -> NaiveDate {
    let index = date.year() * 12 + date.month0() as i32 + months;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_else(|| month_start(date))
}

/// Month starts of the `MONTHS_IN_WINDOW` months before the month containing
/// `now`, oldest first.
pub fn trailing_month_starts(now: DateTime<Utc>) -> Vec<NaiveDate> {
    let current = month_start(now.date_naive());
    (1..=MONTHS_IN_WINDOW as i32)
        .rev()
        .map(|back| shift_months(current, -back))
        .collect()
}
