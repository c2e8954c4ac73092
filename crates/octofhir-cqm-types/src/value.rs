//! CQL Value types - runtime representation of evaluation results
//!
//! This module defines the CqlValue enum and its supporting types. Values are
//! immutable once built; resources coming from a data bundle are shared
//! through `Arc` so retrieves and query projections stay cheap.

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// The primary value type for CQL runtime values.
#[derive(Debug, Clone)]
pub enum CqlValue {
    // === Primitive Types ===
    /// Null value (represents missing/unknown)
    Null,
    /// Boolean value
    Boolean(bool),
    /// 32-bit signed integer
    Integer(i32),
    /// Arbitrary precision decimal
    Decimal(Decimal),
    /// String value
    String(String),

    // === Temporal Types ===
    /// Date with precision
    Date(CqlDate),
    /// DateTime with precision and timezone
    DateTime(CqlDateTime),

    // === Clinical Types ===
    /// Quantity with value and UCUM unit
    Quantity(CqlQuantity),
    /// Code from a code system
    Code(CqlCode),
    /// Concept (collection of codes)
    Concept(CqlConcept),

    // === Collection Types ===
    /// Ordered list of values
    List(CqlList),
    /// Interval between two points
    Interval(CqlInterval),
    /// Tuple with named elements
    Tuple(CqlTuple),

    // === Model Types ===
    /// A FHIR resource read from a data bundle
    Resource(Arc<FhirResource>),
}

impl CqlValue {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this value is boolean true
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Boolean(true))
    }

    /// Check if this value is boolean false
    pub fn is_false(&self) -> bool {
        matches!(self, Self::Boolean(false))
    }

    /// Name of the runtime type, used in diagnostics
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "Any".to_string(),
            Self::Boolean(_) => "Boolean".to_string(),
            Self::Integer(_) => "Integer".to_string(),
            Self::Decimal(_) => "Decimal".to_string(),
            Self::String(_) => "String".to_string(),
            Self::Date(_) => "Date".to_string(),
            Self::DateTime(_) => "DateTime".to_string(),
            Self::Quantity(_) => "Quantity".to_string(),
            Self::Code(_) => "Code".to_string(),
            Self::Concept(_) => "Concept".to_string(),
            Self::List(_) => "List".to_string(),
            Self::Interval(_) => "Interval".to_string(),
            Self::Tuple(_) => "Tuple".to_string(),
            Self::Resource(r) => r.resource_type.clone(),
        }
    }

    /// Try to get as Boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as Integer
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as Decimal (integers promote)
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    /// Try to get as String
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as List
    pub fn as_list(&self) -> Option<&CqlList> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Try to get as Interval
    pub fn as_interval(&self) -> Option<&CqlInterval> {
        match self {
            Self::Interval(i) => Some(i),
            _ => None,
        }
    }

    /// Try to get as Tuple
    pub fn as_tuple(&self) -> Option<&CqlTuple> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Try to get as a FHIR resource
    pub fn as_resource(&self) -> Option<&Arc<FhirResource>> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    /// Flatten a value into its elements: lists yield their items, null yields
    /// nothing and any other value yields itself.
    pub fn into_elements(self) -> Vec<CqlValue> {
        match self {
            Self::List(list) => list.elements,
            Self::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Create a null value
    pub fn null() -> Self {
        Self::Null
    }

    /// Create a boolean value
    pub fn boolean(value: bool) -> Self {
        Self::Boolean(value)
    }

    /// Create an integer value
    pub fn integer(value: i32) -> Self {
        Self::Integer(value)
    }

    /// Create a decimal value
    pub fn decimal(value: Decimal) -> Self {
        Self::Decimal(value)
    }

    /// Create a string value
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Create a list value
    pub fn list(values: impl IntoIterator<Item = CqlValue>) -> Self {
        Self::List(CqlList::from_elements(values.into_iter().collect()))
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Decimal(d) => {
                let s = d.to_string();
                if s.contains('.') {
                    write!(f, "{}", s)
                } else {
                    write!(f, "{}.0", s)
                }
            }
            Self::String(s) => write!(f, "'{}'", s),
            Self::Date(d) => write!(f, "@{}", d),
            Self::DateTime(dt) => write!(f, "@{}", dt),
            Self::Quantity(q) => write!(f, "{}", q),
            Self::Code(c) => write!(f, "{}", c),
            Self::Concept(c) => write!(f, "{}", c),
            Self::List(l) => write!(f, "{}", l),
            Self::Interval(i) => write!(f, "Interval{}", i),
            Self::Tuple(t) => write!(f, "{}", t),
            Self::Resource(r) => write!(f, "{}", r),
        }
    }
}

impl PartialEq for CqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Quantity(a), Self::Quantity(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => a == b,
            (Self::Concept(a), Self::Concept(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Interval(a), Self::Interval(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Resource(a), Self::Resource(b)) => a == b,
            // Cross-type numeric comparisons
            (Self::Integer(a), Self::Decimal(b)) => Decimal::from(*a) == *b,
            (Self::Decimal(a), Self::Integer(b)) => *a == Decimal::from(*b),
            _ => false,
        }
    }
}

impl Eq for CqlValue {}

// ============================================================================
// Temporal Types
// ============================================================================

/// Precision for temporal values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateTimePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl fmt::Display for DateTimePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year => write!(f, "year"),
            Self::Month => write!(f, "month"),
            Self::Day => write!(f, "day"),
            Self::Hour => write!(f, "hour"),
            Self::Minute => write!(f, "minute"),
            Self::Second => write!(f, "second"),
            Self::Millisecond => write!(f, "millisecond"),
        }
    }
}

/// Number of days in a month, leap years included
pub fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0) {
                29
            } else {
                28
            }
        }
        _ => 31,
    }
}

/// CQL Date with precision
///
/// Represents a date with varying precision (year, month, or day).
/// Dates without full precision are called "partial dates".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlDate {
    /// Year component (required)
    pub year: i32,
    /// Month component (1-12, optional)
    pub month: Option<u8>,
    /// Day component (1-31, optional)
    pub day: Option<u8>,
}

impl CqlDate {
    /// Create a new date with full precision
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        Self {
            year,
            month: Some(month),
            day: Some(day),
        }
    }

    /// Create a year-only date
    pub fn year_only(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    /// Create a year-month date
    pub fn year_month(year: i32, month: u8) -> Self {
        Self {
            year,
            month: Some(month),
            day: None,
        }
    }

    /// Get the precision of this date
    pub fn precision(&self) -> DateTimePrecision {
        match (&self.month, &self.day) {
            (None, _) => DateTimePrecision::Year,
            (Some(_), None) => DateTimePrecision::Month,
            (Some(_), Some(_)) => DateTimePrecision::Day,
        }
    }

    /// Convert to chrono NaiveDate (if fully precise)
    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        match (self.month, self.day) {
            (Some(month), Some(day)) => NaiveDate::from_ymd_opt(self.year, month as u32, day as u32),
            _ => None,
        }
    }

    /// Build from a chrono date
    pub fn from_naive_date(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month() as u8, date.day() as u8)
    }

    /// Parse from ISO 8601 date string
    /// Also handles @ prefix: @2024-01-15
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix('@').unwrap_or(s);

        let parts: Vec<&str> = s.split('-').collect();
        let date = match parts.as_slice() {
            [year] => Self::year_only(year.parse().ok()?),
            [year, month] => Self::year_month(year.parse().ok()?, month.parse().ok()?),
            [year, month, day] => Self::new(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?),
            _ => return None,
        };

        let month_ok = date.month.is_none_or(|m| (1..=12).contains(&m));
        let day_ok = match (date.month, date.day) {
            (Some(m), Some(d)) => d >= 1 && d <= days_in_month(date.year, m),
            _ => true,
        };
        (month_ok && day_ok).then_some(date)
    }
}

impl fmt::Display for CqlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{:02}", month)?;
            if let Some(day) = self.day {
                write!(f, "-{:02}", day)?;
            }
        }
        Ok(())
    }
}

impl PartialOrd for CqlDate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        // Compare at the lowest common precision
        let cmp_year = self.year.cmp(&other.year);
        if cmp_year != Ordering::Equal {
            return Some(cmp_year);
        }

        match (self.month, other.month) {
            (None, None) => Some(Ordering::Equal),
            (None, Some(_)) | (Some(_), None) => None,
            (Some(m1), Some(m2)) => {
                let cmp_month = m1.cmp(&m2);
                if cmp_month != Ordering::Equal {
                    return Some(cmp_month);
                }

                match (self.day, other.day) {
                    (None, None) => Some(Ordering::Equal),
                    (None, Some(_)) | (Some(_), None) => None,
                    (Some(d1), Some(d2)) => Some(d1.cmp(&d2)),
                }
            }
        }
    }
}

/// CQL DateTime with precision and timezone
///
/// Components below the stated precision are `None`. The timezone offset is
/// kept in minutes east of UTC; a missing offset means "evaluation local".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlDateTime {
    pub year: i32,
    pub month: Option<u8>,
    pub day: Option<u8>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub second: Option<u8>,
    pub millisecond: Option<u16>,
    /// Offset from UTC in minutes
    pub offset_minutes: Option<i32>,
}

impl CqlDateTime {
    /// Create a datetime with day precision
    pub fn from_date(date: &CqlDate) -> Self {
        Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: None,
            minute: None,
            second: None,
            millisecond: None,
            offset_minutes: None,
        }
    }

    /// Create a datetime with millisecond precision
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        year: i32,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        millisecond: u16,
        offset_minutes: Option<i32>,
    ) -> Self {
        Self {
            year,
            month: Some(month),
            day: Some(day),
            hour: Some(hour),
            minute: Some(minute),
            second: Some(second),
            millisecond: Some(millisecond),
            offset_minutes,
        }
    }

    /// Build from a chrono datetime, keeping its offset
    pub fn from_chrono<Tz: TimeZone>(value: &chrono::DateTime<Tz>) -> Self {
        let fixed = value.fixed_offset();
        Self::new(
            fixed.year(),
            fixed.month() as u8,
            fixed.day() as u8,
            fixed.hour() as u8,
            fixed.minute() as u8,
            fixed.second() as u8,
            (fixed.nanosecond() / 1_000_000).min(999) as u16,
            Some(fixed.offset().local_minus_utc() / 60),
        )
    }

    /// Get the precision of this datetime
    pub fn precision(&self) -> DateTimePrecision {
        if self.month.is_none() {
            DateTimePrecision::Year
        } else if self.day.is_none() {
            DateTimePrecision::Month
        } else if self.hour.is_none() {
            DateTimePrecision::Day
        } else if self.minute.is_none() {
            DateTimePrecision::Hour
        } else if self.second.is_none() {
            DateTimePrecision::Minute
        } else if self.millisecond.is_none() {
            DateTimePrecision::Second
        } else {
            DateTimePrecision::Millisecond
        }
    }

    /// The date portion
    pub fn date(&self) -> CqlDate {
        CqlDate {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }

    /// Convert to a chrono datetime when precise to at least the day.
    /// Missing time components are filled with zero, a missing offset with UTC.
    pub fn to_chrono(&self) -> Option<chrono::DateTime<FixedOffset>> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month? as u32, self.day? as u32)?;
        let time = date.and_hms_milli_opt(
            self.hour.unwrap_or(0) as u32,
            self.minute.unwrap_or(0) as u32,
            self.second.unwrap_or(0) as u32,
            self.millisecond.unwrap_or(0) as u32,
        )?;
        let offset = FixedOffset::east_opt(self.offset_minutes.unwrap_or(0) * 60)?;
        offset.from_local_datetime(&time).single()
    }

    /// Normalize to UTC, keeping the original precision
    pub fn to_utc(&self) -> Self {
        if self.hour.is_none() || self.offset_minutes.is_none_or(|o| o == 0) {
            return self.clone();
        }
        let Some(value) = self.to_chrono() else {
            return self.clone();
        };
        let utc: NaiveDateTime = value.naive_utc();
        Self {
            year: utc.year(),
            month: Some(utc.month() as u8),
            day: Some(utc.day() as u8),
            hour: Some(utc.hour() as u8),
            minute: self.minute.map(|_| utc.minute() as u8),
            second: self.second,
            millisecond: self.millisecond,
            offset_minutes: Some(0),
        }
    }

    /// Parse from ISO 8601 / FHIR dateTime text
    ///
    /// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, and `YYYY-MM-DDThh:mm[:ss[.fff]]`
    /// followed by `Z` or `(+|-)hh:mm`. A leading `@` is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix('@').unwrap_or(s);
        let (date_part, time_part) = match s.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (s, None),
        };

        let date = CqlDate::parse(date_part)?;
        let mut result = Self::from_date(&date);

        let Some(time_part) = time_part else {
            return Some(result);
        };
        if time_part.is_empty() {
            return Some(result);
        }
        result.day?;

        let (clock, offset) = split_offset(time_part)?;
        result.offset_minutes = offset;

        let mut pieces = clock.split(':');
        let hour: u8 = pieces.next()?.parse().ok()?;
        if hour > 23 {
            return None;
        }
        result.hour = Some(hour);

        if let Some(minute) = pieces.next() {
            let minute: u8 = minute.parse().ok()?;
            if minute > 59 {
                return None;
            }
            result.minute = Some(minute);
        }

        if let Some(seconds) = pieces.next() {
            let (sec, frac) = match seconds.split_once('.') {
                Some((s, f)) => (s, Some(f)),
                None => (seconds, None),
            };
            let sec: u8 = sec.parse().ok()?;
            if sec > 59 {
                return None;
            }
            result.second = Some(sec);
            if let Some(frac) = frac {
                let digits: String = frac.chars().take(3).collect();
                let padded = format!("{:0<3}", digits);
                result.millisecond = Some(padded.parse().ok()?);
            }
        }

        if pieces.next().is_some() {
            return None;
        }

        Some(result)
    }
}

/// Split `hh:mm:ss.fffZ` / `hh:mm+02:00` into clock text and offset minutes
fn split_offset(time: &str) -> Option<(&str, Option<i32>)> {
    if let Some(clock) = time.strip_suffix('Z') {
        return Some((clock, Some(0)));
    }
    if let Some(idx) = time.rfind(['+', '-']) {
        let (clock, offset) = time.split_at(idx);
        let sign = if offset.starts_with('-') { -1 } else { 1 };
        let (h, m) = offset[1..].split_once(':')?;
        let hours: i32 = h.parse().ok()?;
        let minutes: i32 = m.parse().ok()?;
        return Some((clock, Some(sign * (hours * 60 + minutes))));
    }
    Some((time, None))
}

impl fmt::Display for CqlDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date())?;
        let Some(hour) = self.hour else {
            return Ok(());
        };
        write!(f, "T{:02}", hour)?;
        if let Some(minute) = self.minute {
            write!(f, ":{:02}", minute)?;
            if let Some(second) = self.second {
                write!(f, ":{:02}", second)?;
                if let Some(ms) = self.millisecond {
                    write!(f, ".{:03}", ms)?;
                }
            }
        }
        match self.offset_minutes {
            Some(0) => write!(f, "Z"),
            Some(offset) => {
                let sign = if offset < 0 { '-' } else { '+' };
                let abs = offset.abs();
                write!(f, "{}{:02}:{:02}", sign, abs / 60, abs % 60)
            }
            None => Ok(()),
        }
    }
}

impl PartialOrd for CqlDateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let (a, b) = if self.offset_minutes != other.offset_minutes {
            (self.to_utc(), other.to_utc())
        } else {
            (self.clone(), other.clone())
        };

        let left = [
            Some(a.year as i64),
            a.month.map(i64::from),
            a.day.map(i64::from),
            a.hour.map(i64::from),
            a.minute.map(i64::from),
            a.second.map(i64::from),
            a.millisecond.map(i64::from),
        ];
        let right = [
            Some(b.year as i64),
            b.month.map(i64::from),
            b.day.map(i64::from),
            b.hour.map(i64::from),
            b.minute.map(i64::from),
            b.second.map(i64::from),
            b.millisecond.map(i64::from),
        ];

        for (l, r) in left.iter().zip(right.iter()) {
            match (l, r) {
                (Some(l), Some(r)) => match l.cmp(r) {
                    Ordering::Equal => continue,
                    ord => return Some(ord),
                },
                (None, None) => return Some(Ordering::Equal),
                // Differing precision with equal prefix: uncertain
                _ => return None,
            }
        }
        Some(Ordering::Equal)
    }
}

// ============================================================================
// Clinical Types
// ============================================================================

/// CQL Quantity with value and UCUM unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CqlQuantity {
    /// Numeric value
    pub value: Decimal,
    /// UCUM unit string (e.g., "mg", "kg", "a")
    pub unit: Option<String>,
}

impl CqlQuantity {
    /// Create a new quantity
    pub fn new(value: Decimal, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: Some(unit.into()),
        }
    }

    /// Create a unitless quantity
    pub fn unitless(value: Decimal) -> Self {
        Self { value, unit: None }
    }

    /// Unit with "1" treated as no unit
    pub fn normalized_unit(&self) -> Option<&str> {
        match self.unit.as_deref() {
            None | Some("1") | Some("") => None,
            Some(unit) => Some(unit),
        }
    }
}

impl PartialEq for CqlQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.normalized_unit() == other.normalized_unit()
    }
}

impl Eq for CqlQuantity {}

impl PartialOrd for CqlQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.normalized_unit() == other.normalized_unit() {
            self.value.partial_cmp(&other.value)
        } else {
            None
        }
    }
}

impl fmt::Display for CqlQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if let Some(unit) = &self.unit {
            write!(f, " '{}'", unit)?;
        }
        Ok(())
    }
}

/// CQL Code - a code from a code system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlCode {
    /// Code value
    pub code: String,
    /// Code system URI
    pub system: String,
    /// Code system version (optional)
    pub version: Option<String>,
    /// Display string (optional)
    pub display: Option<String>,
}

impl CqlCode {
    /// Create a new code
    pub fn new(
        code: impl Into<String>,
        system: impl Into<String>,
        version: Option<impl Into<String>>,
        display: Option<impl Into<String>>,
    ) -> Self {
        Self {
            code: code.into(),
            system: system.into(),
            version: version.map(Into::into),
            display: display.map(Into::into),
        }
    }

    /// Shorthand for a code without version or display
    pub fn simple(code: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            system: system.into(),
            version: None,
            display: None,
        }
    }

    /// Check if this code is equivalent to another
    /// (same code and system, version and display ignored)
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.code == other.code && self.system == other.system
    }
}

impl fmt::Display for CqlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code '{}' from \"{}\"", self.code, self.system)?;
        if let Some(display) = &self.display {
            write!(f, " display '{}'", display)?;
        }
        Ok(())
    }
}

/// CQL Concept - a collection of equivalent codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CqlConcept {
    /// Codes in this concept
    pub codes: SmallVec<[CqlCode; 2]>,
    /// Display string (optional)
    pub display: Option<String>,
}

impl CqlConcept {
    /// Create a new concept
    pub fn new(codes: impl IntoIterator<Item = CqlCode>, display: Option<impl Into<String>>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
            display: display.map(Into::into),
        }
    }

    /// Create a concept from a single code
    pub fn from_code(code: CqlCode) -> Self {
        let display = code.display.clone();
        Self {
            codes: smallvec::smallvec![code],
            display,
        }
    }

    /// Check if this concept contains an equivalent code
    pub fn contains_equivalent(&self, code: &CqlCode) -> bool {
        self.codes.iter().any(|c| c.is_equivalent(code))
    }
}

impl fmt::Display for CqlConcept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Concept {{")?;
        for (i, code) in self.codes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", code)?;
        }
        write!(f, "}}")?;
        if let Some(display) = &self.display {
            write!(f, " display '{}'", display)?;
        }
        Ok(())
    }
}

// ============================================================================
// Collection Types
// ============================================================================

/// CQL List - ordered collection of values
#[derive(Debug, Clone, Default)]
pub struct CqlList {
    /// List elements
    pub elements: Vec<CqlValue>,
}

impl CqlList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a list from elements
    pub fn from_elements(elements: Vec<CqlValue>) -> Self {
        Self { elements }
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Get the number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Get the first element
    pub fn first(&self) -> Option<&CqlValue> {
        self.elements.first()
    }

    /// Get the last element
    pub fn last(&self) -> Option<&CqlValue> {
        self.elements.last()
    }

    /// Iterate over elements
    pub fn iter(&self) -> impl Iterator<Item = &CqlValue> {
        self.elements.iter()
    }
}

impl PartialEq for CqlList {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl Eq for CqlList {}

impl fmt::Display for CqlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, elem) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", elem)?;
        }
        write!(f, "}}")
    }
}

/// CQL Interval - range between two points
///
/// A `None` bound is unbounded; a bound holding `CqlValue::Null` is unknown
/// and treated as unbounded by [`CqlInterval::low`] / [`CqlInterval::high`].
#[derive(Debug, Clone)]
pub struct CqlInterval {
    /// Low bound (None for unbounded)
    pub low: Option<Box<CqlValue>>,
    /// Whether low is closed (inclusive)
    pub low_closed: bool,
    /// High bound (None for unbounded)
    pub high: Option<Box<CqlValue>>,
    /// Whether high is closed (inclusive)
    pub high_closed: bool,
}

impl CqlInterval {
    /// Create a new interval
    pub fn new(low: Option<CqlValue>, low_closed: bool, high: Option<CqlValue>, high_closed: bool) -> Self {
        Self {
            low: low.map(Box::new),
            low_closed,
            high: high.map(Box::new),
            high_closed,
        }
    }

    /// Create a closed interval [low, high]
    pub fn closed(low: CqlValue, high: CqlValue) -> Self {
        Self::new(Some(low), true, Some(high), true)
    }

    /// Get the low bound (None if unbounded or null)
    pub fn low(&self) -> Option<&CqlValue> {
        match self.low.as_deref() {
            Some(CqlValue::Null) => None,
            other => other,
        }
    }

    /// Get the high bound (None if unbounded or null)
    pub fn high(&self) -> Option<&CqlValue> {
        match self.high.as_deref() {
            Some(CqlValue::Null) => None,
            other => other,
        }
    }
}

impl PartialEq for CqlInterval {
    fn eq(&self, other: &Self) -> bool {
        self.low == other.low
            && self.low_closed == other.low_closed
            && self.high == other.high
            && self.high_closed == other.high_closed
    }
}

impl Eq for CqlInterval {}

impl fmt::Display for CqlInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.low_closed { "[" } else { "(" })?;
        match &self.low {
            Some(l) => write!(f, "{}", l)?,
            None => write!(f, "null")?,
        }
        write!(f, ", ")?;
        match &self.high {
            Some(h) => write!(f, "{}", h)?,
            None => write!(f, "null")?,
        }
        write!(f, "{}", if self.high_closed { "]" } else { ")" })
    }
}

/// CQL Tuple - record with named elements
#[derive(Debug, Clone, Default)]
pub struct CqlTuple {
    /// Named elements (insertion order preserved)
    pub elements: IndexMap<String, CqlValue>,
}

impl CqlTuple {
    /// Create a new empty tuple
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tuple from an iterator of (name, value) pairs
    pub fn from_elements(elements: impl IntoIterator<Item = (impl Into<String>, CqlValue)>) -> Self {
        Self {
            elements: elements.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Get an element by name
    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.elements.get(name)
    }

    /// Set an element
    pub fn set(&mut self, name: impl Into<String>, value: CqlValue) {
        self.elements.insert(name.into(), value);
    }

    /// Get the number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the tuple is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate over elements
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CqlValue)> {
        self.elements.iter()
    }
}

impl PartialEq for CqlTuple {
    fn eq(&self, other: &Self) -> bool {
        if self.elements.len() != other.elements.len() {
            return false;
        }
        self.elements
            .iter()
            .all(|(k, v)| other.elements.get(k).is_some_and(|ov| v == ov))
    }
}

impl Eq for CqlTuple {}

impl fmt::Display for CqlTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple {{")?;
        for (i, (name, value)) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

// ============================================================================
// FHIR Resources
// ============================================================================

/// A FHIR resource as seen by the engine
///
/// `fields` holds the typed view used for property navigation; `source` is the
/// document the resource was read from and is what gets written back out.
#[derive(Debug, Clone)]
pub struct FhirResource {
    pub resource_type: String,
    pub id: Option<String>,
    pub fields: CqlTuple,
    pub source: Arc<serde_json::Value>,
}

impl FhirResource {
    /// `Type/id` reference for this resource, when it has an id
    pub fn reference(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("{}/{}", self.resource_type, id))
    }

    /// Get a typed field
    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        if name == "id" && !self.fields.elements.contains_key("id") {
            return None;
        }
        self.fields.get(name)
    }
}

impl PartialEq for FhirResource {
    fn eq(&self, other: &Self) -> bool {
        if self.resource_type != other.resource_type {
            return false;
        }
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => Arc::ptr_eq(&self.source, &other.source) || self.source == other.source,
        }
    }
}

impl Eq for FhirResource {}

impl fmt::Display for FhirResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.resource_type, id),
            None => write!(f, "{}", self.resource_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cql_date_precision() {
        assert_eq!(CqlDate::new(2024, 1, 15).precision(), DateTimePrecision::Day);
        assert_eq!(CqlDate::year_month(2024, 1).precision(), DateTimePrecision::Month);
        assert_eq!(CqlDate::year_only(2024).precision(), DateTimePrecision::Year);
    }

    #[test]
    fn test_cql_date_parse_rejects_invalid_days() {
        assert_eq!(CqlDate::parse("2024-02-29"), Some(CqlDate::new(2024, 2, 29)));
        assert_eq!(CqlDate::parse("2023-02-29"), None);
        assert_eq!(CqlDate::parse("2023-13"), None);
        assert_eq!(CqlDate::parse("@2023-07"), Some(CqlDate::year_month(2023, 7)));
    }

    #[test]
    fn test_cql_date_display() {
        assert_eq!(CqlDate::new(2024, 1, 15).to_string(), "2024-01-15");
        assert_eq!(CqlDate::year_month(2024, 1).to_string(), "2024-01");
        assert_eq!(CqlDate::year_only(2024).to_string(), "2024");
    }

    #[test]
    fn test_partial_date_comparison_is_uncertain() {
        let full = CqlDate::new(2024, 3, 1);
        let partial = CqlDate::year_month(2024, 3);
        assert_eq!(full.partial_cmp(&partial), None);
        assert_eq!(
            CqlDate::year_month(2024, 2).partial_cmp(&full),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_datetime_parse_and_display() {
        let dt = CqlDateTime::parse("2024-01-15T10:30:00.5+02:00").unwrap();
        assert_eq!(dt.hour, Some(10));
        assert_eq!(dt.millisecond, Some(500));
        assert_eq!(dt.offset_minutes, Some(120));
        assert_eq!(dt.to_string(), "2024-01-15T10:30:00.500+02:00");

        let utc = CqlDateTime::parse("2024-01-15T08:30:00Z").unwrap();
        assert_eq!(utc.to_string(), "2024-01-15T08:30:00Z");

        let date_only = CqlDateTime::parse("2024-01-15").unwrap();
        assert_eq!(date_only.precision(), DateTimePrecision::Day);
    }

    #[test]
    fn test_datetime_comparison_normalizes_offsets() {
        let a = CqlDateTime::parse("2024-01-15T10:30:00+02:00").unwrap();
        let b = CqlDateTime::parse("2024-01-15T08:30:00Z").unwrap();
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Equal));

        let later = CqlDateTime::parse("2024-01-15T09:00:00Z").unwrap();
        assert_eq!(a.partial_cmp(&later), Some(Ordering::Less));
    }

    #[test]
    fn test_cql_quantity() {
        let q1 = CqlQuantity::new(Decimal::new(100, 0), "mg");
        assert_eq!(q1.to_string(), "100 'mg'");

        let q2 = CqlQuantity::unitless(Decimal::new(42, 0));
        assert_eq!(q2, CqlQuantity::new(Decimal::new(42, 0), "1"));
    }

    #[test]
    fn test_cql_interval_display() {
        let interval = CqlInterval::closed(CqlValue::integer(1), CqlValue::integer(10));
        assert_eq!(interval.to_string(), "[1, 10]");
    }

    #[test]
    fn test_into_elements() {
        assert!(CqlValue::Null.into_elements().is_empty());
        assert_eq!(CqlValue::integer(3).into_elements(), vec![CqlValue::integer(3)]);
        let list = CqlValue::list([CqlValue::integer(1), CqlValue::integer(2)]);
        assert_eq!(list.into_elements().len(), 2);
    }

    #[test]
    fn test_resource_equality_by_identity() {
        let source = Arc::new(serde_json::json!({"resourceType": "Patient", "id": "p1"}));
        let a = FhirResource {
            resource_type: "Patient".into(),
            id: Some("p1".into()),
            fields: CqlTuple::new(),
            source: source.clone(),
        };
        let mut b = a.clone();
        b.fields.set("gender", CqlValue::string("female"));
        assert_eq!(a, b);
        assert_eq!(a.reference().as_deref(), Some("Patient/p1"));
    }
}
