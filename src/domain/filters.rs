//! Dashboard filter set and per-indicator options.

use thiserror::Error;
use time::{Date, macros::format_description};

use super::error::DomainError;

pub const MIN_TOP_N: u32 = 5;
pub const MAX_TOP_N: u32 = 50;
pub const DEFAULT_TOP_N: u32 = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: Date, end: Date },
    #[error("`{value}` is not a valid date for `{field}` (expected YYYY-MM-DD)")]
    InvalidDate { field: &'static str, value: String },
    #[error("`{value}` is not a valid identifier for `{field}`")]
    InvalidIdentifier { field: &'static str, value: String },
}

impl From<FilterError> for DomainError {
    fn from(err: FilterError) -> Self {
        DomainError::validation(err.to_string())
    }
}

/// Date range plus optional buyer/supplier restriction shared by every indicator page.
///
/// Both dates are inclusive calendar days in the dashboard timezone. The range is
/// validated on construction, so a `FilterSet` with `start > end` cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterSet {
    start: Date,
    end: Date,
    buyer: Option<i64>,
    supplier: Option<i64>,
}

impl FilterSet {
    pub fn new(
        start: Date,
        end: Date,
        buyer: Option<i64>,
        supplier: Option<i64>,
    ) -> Result<Self, FilterError> {
        if start > end {
            return Err(FilterError::InvertedRange { start, end });
        }

        Ok(Self {
            start,
            end,
            buyer,
            supplier,
        })
    }

    /// First day of `today`'s month through `today`, without buyer/supplier restriction.
    pub fn month_to_date(today: Date) -> Self {
        let start = today.replace_day(1).unwrap_or(today);
        Self {
            start,
            end: today,
            buyer: None,
            supplier: None,
        }
    }

    /// Parse raw form values. Blank identifiers mean "no restriction".
    pub fn parse(
        start: &str,
        end: &str,
        buyer: &str,
        supplier: &str,
    ) -> Result<Self, FilterError> {
        let start = parse_date("start", start)?;
        let end = parse_date("end", end)?;
        let buyer = parse_identifier("buyer", buyer)?;
        let supplier = parse_identifier("supplier", supplier)?;
        Self::new(start, end, buyer, supplier)
    }

    pub fn start(&self) -> Date {
        self.start
    }

    pub fn end(&self) -> Date {
        self.end
    }

    pub fn buyer(&self) -> Option<i64> {
        self.buyer
    }

    pub fn supplier(&self) -> Option<i64> {
        self.supplier
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<Date, FilterError> {
    let trimmed = value.trim();
    Date::parse(trimmed, format_description!("[year]-[month]-[day]")).map_err(|_| {
        FilterError::InvalidDate {
            field,
            value: trimmed.to_string(),
        }
    })
}

fn parse_identifier(field: &'static str, value: &str) -> Result<Option<i64>, FilterError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|_| FilterError::InvalidIdentifier {
            field,
            value: trimmed.to_string(),
        })
}

/// Presentation switches that change the query an indicator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndicatorOptions {
    show_names: bool,
    top_n: u32,
}

impl IndicatorOptions {
    /// `top_n` is clamped to the supported ranking length.
    pub fn new(show_names: bool, top_n: u32) -> Self {
        Self {
            show_names,
            top_n: top_n.clamp(MIN_TOP_N, MAX_TOP_N),
        }
    }

    pub fn show_names(&self) -> bool {
        self.show_names
    }

    pub fn top_n(&self) -> u32 {
        self.top_n
    }
}

impl Default for IndicatorOptions {
    fn default() -> Self {
        Self::new(true, DEFAULT_TOP_N)
    }
}
