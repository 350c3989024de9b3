//! Calendar month arithmetic for target periods and list filters.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::ops::RangeInclusive;

use crate::errors::StoreError;

/// Years a period may fall in. Dates are stored as `YYYY-MM-DD` text, which
/// only orders correctly for four-digit years.
pub const YEARS: RangeInclusive<i32> = 1..=9999;

/// A calendar month. Holds its first and last day, so `month` is always in
/// `1..=12` and the year is always in [`YEARS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    first: NaiveDate,
    last: NaiveDate,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !YEARS.contains(&year) || !(1..=12).contains(&month) {
            return None;
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let last = if month == 12 {
            NaiveDate::from_ymd_opt(year, 12, 31)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?.pred_opt()?
        };
        Some(Self { first, last })
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    /// The month immediately before the one containing `today`.
    ///
    /// January rolls back to December of the previous year. `None` when
    /// that month falls outside [`YEARS`].
    pub fn previous_of(today: NaiveDate) -> Option<Self> {
        let prev = today.with_day(1)?.pred_opt()?;
        Self::new(prev.year(), prev.month())
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last
    }

    /// Inclusive `[first day, last day]` range.
    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        (self.first, self.last)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first <= date && date <= self.last
    }

    /// Build a filter from optional parts. Both or neither must be given.
    pub fn from_parts(year: Option<i32>, month: Option<u32>) -> Result<Option<Self>, StoreError> {
        match (year, month) {
            (None, None) => Ok(None),
            (Some(y), Some(m)) => {
                if !(1..=12).contains(&m) {
                    return Err(StoreError::InvalidFilter(format!(
                        "month must be between 1 and 12, got {}",
                        m
                    )));
                }
                YearMonth::new(y, m).map(Some).ok_or_else(|| {
                    StoreError::InvalidFilter(format!(
                        "year must be between {} and {}, got {}",
                        YEARS.start(),
                        YEARS.end(),
                        y
                    ))
                })
            }
            _ => Err(StoreError::InvalidFilter(
                "Both month and year must be provided for filtering.".to_string(),
            )),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{}", self.month(), self.year())
    }
}
