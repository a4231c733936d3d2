//! Date parsing, including dates printed without a year.

use super::{Filter, Scope};
use crate::error::FilterError;
use chrono::{Datelike, Duration, Local, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn numeric_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,4})\D{1,3}(\d{1,2})\D{1,3}(\d{1,4})").expect("date regex is valid")
    })
}

fn compact_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})(\d{2})(\d{2})\b").expect("compact date regex is valid"))
}

fn day_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2})\D(\d{1,2})").expect("day/month regex is valid"))
}

fn expand_year(token: &str) -> Option<i32> {
    let value: i32 = token.parse().ok()?;
    match token.len() {
        // Same pivot as chrono's %y
        1 | 2 if value <= 68 => Some(2000 + value),
        1 | 2 => Some(1900 + value),
        4 => Some(value),
        _ => None,
    }
}

/// Parse a numeric date (`31/01/2024`, `31.01.24`, `2024-01-31`, `20240131`).
///
/// A four-digit leading token is read year first. Otherwise `day_first`
/// decides between `D/M/Y` and `M/D/Y`.
pub fn parse_date(text: &str, day_first: bool) -> Result<NaiveDate, FilterError> {
    let invalid = || FilterError::InvalidDate(text.to_string());

    let (year, month, day) = if let Some(caps) = numeric_date_re().captures(text) {
        let (a, b, c) = (&caps[1], &caps[2], &caps[3]);
        if a.len() == 4 {
            (expand_year(a), b.parse().ok(), c.parse().ok())
        } else if day_first {
            (expand_year(c), b.parse().ok(), a.parse().ok())
        } else {
            (expand_year(c), a.parse().ok(), b.parse().ok())
        }
    } else if let Some(caps) = compact_date_re().captures(text) {
        (caps[1].parse().ok(), caps[2].parse().ok(), caps[3].parse().ok())
    } else {
        return Err(invalid());
    };

    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Date read from the text produced by `inner`.
#[derive(Debug, Clone)]
pub struct Date<F> {
    inner: F,
    day_first: bool,
    format: Option<String>,
}

impl<F> Date<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            day_first: true,
            format: None,
        }
    }

    /// Read ambiguous numeric dates as `M/D/Y`.
    pub fn month_first(mut self) -> Self {
        self.day_first = false;
        self
    }

    /// Parse with an explicit chrono format (`"%d %b %Y"`) instead of the
    /// numeric heuristics.
    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

impl<F: Filter<Output = String>> Filter for Date<F> {
    type Output = NaiveDate;

    fn apply(&self, scope: &Scope<'_>) -> Result<NaiveDate, FilterError> {
        let text = self.inner.apply(scope)?;
        match &self.format {
            Some(format) => NaiveDate::parse_from_str(text.trim(), format)
                .map_err(|_| FilterError::InvalidDate(text.clone())),
            None => parse_date(&text, self.day_first),
        }
    }
}

/// Most recent existing date with the given day and month that is not after
/// `reference + tolerance_days`.
///
/// Searches back up to eight years so that 29 February always resolves.
/// Returns `None` when the day/month pair never exists or the tolerance
/// pushes the limit out of the calendar range.
pub fn guess_date(
    day: u32,
    month: u32,
    reference: NaiveDate,
    tolerance_days: i64,
) -> Option<NaiveDate> {
    let limit = reference.checked_add_signed(Duration::try_days(tolerance_days)?)?;
    (0..=8)
        .filter_map(|back| NaiveDate::from_ymd_opt(limit.year() - back, month, day))
        .find(|date| *date <= limit)
}

/// Where a [`DateGuesser`] takes its reference date from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reference {
    /// The local date at extraction time.
    #[default]
    Today,
    Fixed(NaiveDate),
    /// An `Env` value formatted `%Y-%m-%d`.
    Env(String),
}

impl Reference {
    fn resolve(&self, scope: &Scope<'_>) -> Result<NaiveDate, FilterError> {
        match self {
            Reference::Today => Ok(Local::now().date_naive()),
            Reference::Fixed(date) => Ok(*date),
            Reference::Env(key) => {
                let raw = scope
                    .env()
                    .get(key)
                    .ok_or_else(|| FilterError::EnvMissing(key.clone()))?;
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| FilterError::InvalidDate(raw.to_string()))
            }
        }
    }
}

/// Completes a `day/month` text with the year that makes it the most recent
/// such date relative to a reference (statement lines rarely print years).
#[derive(Debug, Clone)]
pub struct DateGuesser<F> {
    inner: F,
    reference: Reference,
    tolerance_days: i64,
}

impl<F> DateGuesser<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            reference: Reference::Today,
            tolerance_days: 0,
        }
    }

    pub fn reference(mut self, date: NaiveDate) -> Self {
        self.reference = Reference::Fixed(date);
        self
    }

    pub fn reference_from_env(mut self, key: &str) -> Self {
        self.reference = Reference::Env(key.to_string());
        self
    }

    /// Accept dates up to `days` after the reference (deferred card debits).
    pub fn tolerance(mut self, days: i64) -> Self {
        self.tolerance_days = days;
        self
    }
}

impl<F: Filter<Output = String>> Filter for DateGuesser<F> {
    type Output = NaiveDate;

    fn apply(&self, scope: &Scope<'_>) -> Result<NaiveDate, FilterError> {
        let text = self.inner.apply(scope)?;
        let invalid = || FilterError::InvalidDate(text.clone());

        let caps = day_month_re().captures(&text).ok_or_else(invalid)?;
        let day: u32 = caps[1].parse().map_err(|_| invalid())?;
        let month: u32 = caps[2].parse().map_err(|_| invalid())?;

        let reference = self.reference.resolve(scope)?;
        guess_date(day, month, reference, self.tolerance_days).ok_or_else(invalid)
    }
}
