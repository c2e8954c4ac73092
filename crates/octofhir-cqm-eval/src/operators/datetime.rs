//! DateTime Operators
//!
//! Implements: Date and DateTime constructors, DateFrom, DurationBetween,
//! DifferenceBetween, SameOrBefore, SameOrAfter, plus the calendar
//! arithmetic used by Add and Subtract.
//!
//! Comparisons at a precision finer than either operand carries are
//! uncertain and evaluate to null.

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use chrono::{Datelike, Duration, NaiveDate};
use octofhir_cqm_elm::{
    DateExpression, DateTimeExpression, DateTimePrecision as Precision, DifferenceBetweenExpression,
    DurationBetweenExpression, Expression, SameOrAfterExpression, SameOrBeforeExpression, UnaryExpression,
};
use octofhir_cqm_types::{CqlDate, CqlDateTime, CqlValue, days_in_month};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;

/// Position of a precision in the year..millisecond component array
fn component_index(precision: Precision) -> usize {
    match precision {
        Precision::Year => 0,
        Precision::Month => 1,
        Precision::Week | Precision::Day => 2,
        Precision::Hour => 3,
        Precision::Minute => 4,
        Precision::Second => 5,
        Precision::Millisecond => 6,
    }
}

/// Length in milliseconds of the fixed-length units
fn fixed_millis(precision: Precision) -> Option<i64> {
    match precision {
        Precision::Year | Precision::Month => None,
        Precision::Week => Some(7 * 86_400_000),
        Precision::Day => Some(86_400_000),
        Precision::Hour => Some(3_600_000),
        Precision::Minute => Some(60_000),
        Precision::Second => Some(1_000),
        Precision::Millisecond => Some(1),
    }
}

const PRECISIONS: [Precision; 7] = [
    Precision::Year,
    Precision::Month,
    Precision::Day,
    Precision::Hour,
    Precision::Minute,
    Precision::Second,
    Precision::Millisecond,
];

/// Calendar unit named by a quantity unit (UCUM code or CQL keyword)
pub fn calendar_unit(unit: &str) -> Option<Precision> {
    Some(match unit {
        "a" | "year" | "years" => Precision::Year,
        "mo" | "month" | "months" => Precision::Month,
        "wk" | "week" | "weeks" => Precision::Week,
        "d" | "day" | "days" => Precision::Day,
        "h" | "hour" | "hours" => Precision::Hour,
        "min" | "minute" | "minutes" => Precision::Minute,
        "s" | "second" | "seconds" => Precision::Second,
        "ms" | "millisecond" | "milliseconds" => Precision::Millisecond,
        _ => return None,
    })
}

impl CqlEngine {
    /// Evaluate Date constructor
    ///
    /// Creates a Date from year, optional month, optional day components.
    pub fn eval_date(&self, expr: &DateExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let Some(year) = self.eval_component(Some(&expr.year), ctx)? else {
            return Ok(CqlValue::Null);
        };
        let month = self.eval_component(expr.month.as_deref(), ctx)?;
        let day = self.eval_component(expr.day.as_deref(), ctx)?;

        let date = CqlDate {
            year,
            month: narrow(month, "month")?,
            day: narrow(day, "day")?,
        };
        validate_date(&date)?;
        Ok(CqlValue::Date(date))
    }

    /// Evaluate DateTime constructor
    ///
    /// The timezone offset is given in (possibly fractional) hours and defaults
    /// to the offset of the evaluation clock.
    pub fn eval_datetime(&self, expr: &DateTimeExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let Some(year) = self.eval_component(Some(&expr.year), ctx)? else {
            return Ok(CqlValue::Null);
        };
        let month = self.eval_component(expr.month.as_deref(), ctx)?;
        let day = self.eval_component(expr.day.as_deref(), ctx)?;
        let hour = self.eval_component(expr.hour.as_deref(), ctx)?;
        let minute = self.eval_component(expr.minute.as_deref(), ctx)?;
        let second = self.eval_component(expr.second.as_deref(), ctx)?;
        let millisecond = self.eval_component(expr.millisecond.as_deref(), ctx)?;

        let offset_minutes = match &expr.timezone_offset {
            Some(offset) => match self.evaluate(offset, ctx)?.as_decimal() {
                Some(hours) => (hours * Decimal::from(60)).round().to_i32(),
                None => ctx.now().offset_minutes,
            },
            None => ctx.now().offset_minutes,
        };

        let datetime = CqlDateTime {
            year,
            month: narrow(month, "month")?,
            day: narrow(day, "day")?,
            hour: narrow(hour, "hour")?,
            minute: narrow(minute, "minute")?,
            second: narrow(second, "second")?,
            millisecond: millisecond
                .map(|ms| u16::try_from(ms).map_err(|_| out_of_range("millisecond", ms)))
                .transpose()?,
            offset_minutes,
        };
        validate_date(&datetime.date())?;
        for (value, max, name) in [
            (datetime.hour, 23, "hour"),
            (datetime.minute, 59, "minute"),
            (datetime.second, 59, "second"),
        ] {
            if value.is_some_and(|v| v > max) {
                return Err(out_of_range(name, i32::from(value.unwrap_or_default())));
            }
        }
        if datetime.millisecond.is_some_and(|ms| ms > 999) {
            return Err(out_of_range("millisecond", i32::from(datetime.millisecond.unwrap_or_default())));
        }
        Ok(CqlValue::DateTime(datetime))
    }

    fn eval_component(&self, expr: Option<&Expression>, ctx: &mut EvaluationContext) -> EvalResult<Option<i32>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.evaluate(expr, ctx)? {
            CqlValue::Null => Ok(None),
            CqlValue::Integer(i) => Ok(Some(i)),
            other => Err(EvalError::type_mismatch("Integer", other.type_name())),
        }
    }

    /// Evaluate DateFrom: the date part of a DateTime
    pub fn eval_date_from(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => Ok(CqlValue::Null),
            CqlValue::DateTime(dt) => Ok(CqlValue::Date(dt.date())),
            CqlValue::Date(d) => Ok(CqlValue::Date(d)),
            other => Err(EvalError::type_mismatch("DateTime", other.type_name())),
        }
    }

    /// Evaluate DurationBetween: whole periods elapsed between two values
    pub fn eval_duration_between(
        &self,
        expr: &DurationBetweenExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let Some((start, end)) = self.eval_temporal_pair(&expr.operand, "DurationBetween", ctx)? else {
            return Ok(CqlValue::Null);
        };
        integer_or_null(whole_periods(&start, &end, expr.precision), "DurationBetween")
    }

    /// Evaluate DifferenceBetween: boundaries crossed between two values
    pub fn eval_difference_between(
        &self,
        expr: &DifferenceBetweenExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let Some((start, end)) = self.eval_temporal_pair(&expr.operand, "DifferenceBetween", ctx)? else {
            return Ok(CqlValue::Null);
        };
        integer_or_null(boundaries_crossed(&start, &end, expr.precision), "DifferenceBetween")
    }

    /// Evaluate SameOrBefore, optionally at a precision
    pub fn eval_same_or_before(&self, expr: &SameOrBeforeExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let Some((left, right)) = self.eval_temporal_pair(&expr.operand, "SameOrBefore", ctx)? else {
            return Ok(CqlValue::Null);
        };
        Ok(compare_at_precision(&left, &right, expr.precision)
            .map_or(CqlValue::Null, |ord| CqlValue::Boolean(ord != Ordering::Greater)))
    }

    /// Evaluate SameOrAfter, optionally at a precision
    pub fn eval_same_or_after(&self, expr: &SameOrAfterExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let Some((left, right)) = self.eval_temporal_pair(&expr.operand, "SameOrAfter", ctx)? else {
            return Ok(CqlValue::Null);
        };
        Ok(compare_at_precision(&left, &right, expr.precision)
            .map_or(CqlValue::Null, |ord| CqlValue::Boolean(ord != Ordering::Less)))
    }

    /// Evaluate two temporal operands, promoting Dates to DateTimes.
    /// `None` when either side is null.
    fn eval_temporal_pair(
        &self,
        operands: &[Expression],
        operator: &str,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Option<(CqlDateTime, CqlDateTime)>> {
        let [left, right] = operands else {
            return Err(EvalError::internal(format!("{} must have exactly 2 operands", operator)));
        };
        let left = self.evaluate(left, ctx)?;
        let right = self.evaluate(right, ctx)?;
        match (temporal_operand(&left, operator)?, temporal_operand(&right, operator)?) {
            (Some(l), Some(r)) => Ok(Some((l, r))),
            _ => Ok(None),
        }
    }
}

fn narrow(value: Option<i32>, name: &str) -> EvalResult<Option<u8>> {
    value
        .map(|v| u8::try_from(v).map_err(|_| out_of_range(name, v)))
        .transpose()
}

fn out_of_range(name: &str, value: i32) -> EvalError {
    EvalError::invalid_operand("DateTime", format!("{} out of range: {}", name, value))
}

fn validate_date(date: &CqlDate) -> EvalResult<()> {
    if !(1..=9999).contains(&date.year) {
        return Err(out_of_range("year", date.year));
    }
    if let Some(month) = date.month {
        if !(1..=12).contains(&month) {
            return Err(out_of_range("month", i32::from(month)));
        }
        if let Some(day) = date.day {
            if day == 0 || day > days_in_month(date.year, month) {
                return Err(out_of_range("day", i32::from(day)));
            }
        }
    } else if date.day.is_some() {
        return Err(EvalError::invalid_operand("Date", "day given without month"));
    }
    Ok(())
}

pub(crate) fn integer_or_null(value: Option<i64>, operator: &str) -> EvalResult<CqlValue> {
    match value {
        Some(v) => i32::try_from(v)
            .map(CqlValue::Integer)
            .map_err(|_| EvalError::overflow(operator)),
        None => Ok(CqlValue::Null),
    }
}

/// Date or DateTime as a DateTime; null stays `None`
pub(crate) fn temporal_operand(value: &CqlValue, operator: &str) -> EvalResult<Option<CqlDateTime>> {
    match value {
        CqlValue::Null => Ok(None),
        CqlValue::Date(d) => Ok(Some(CqlDateTime::from_date(d))),
        CqlValue::DateTime(dt) => Ok(Some(dt.clone())),
        other => Err(EvalError::invalid_operand(
            operator,
            format!("expected Date or DateTime, found {}", other.type_name()),
        )),
    }
}

fn components(dt: &CqlDateTime) -> [Option<i64>; 7] {
    [
        Some(i64::from(dt.year)),
        dt.month.map(i64::from),
        dt.day.map(i64::from),
        dt.hour.map(i64::from),
        dt.minute.map(i64::from),
        dt.second.map(i64::from),
        dt.millisecond.map(i64::from),
    ]
}

/// Bring two values to a common offset before component-wise comparison
fn aligned(a: &CqlDateTime, b: &CqlDateTime) -> (CqlDateTime, CqlDateTime) {
    if a.offset_minutes != b.offset_minutes {
        (a.to_utc(), b.to_utc())
    } else {
        (a.clone(), b.clone())
    }
}

/// Drop every component finer than `precision`
fn truncate(dt: &CqlDateTime, precision: Precision) -> CqlDateTime {
    let keep = component_index(precision);
    CqlDateTime {
        year: dt.year,
        month: dt.month.filter(|_| keep >= 1),
        day: dt.day.filter(|_| keep >= 2),
        hour: dt.hour.filter(|_| keep >= 3),
        minute: dt.minute.filter(|_| keep >= 4),
        second: dt.second.filter(|_| keep >= 5),
        millisecond: dt.millisecond.filter(|_| keep >= 6),
        offset_minutes: dt.offset_minutes,
    }
}

/// Compare component-wise down to `precision` (all components when `None`).
/// A component missing on one side before any difference is uncertain.
pub fn compare_at_precision(a: &CqlDateTime, b: &CqlDateTime, precision: Option<Precision>) -> Option<Ordering> {
    let (a, b) = aligned(a, b);
    let limit = precision.map_or(6, component_index);
    let (ca, cb) = (components(&a), components(&b));
    for i in 0..=limit {
        match (ca[i], cb[i]) {
            (Some(x), Some(y)) if x != y => return Some(x.cmp(&y)),
            (Some(_), Some(_)) => {}
            (None, None) => return Some(Ordering::Equal),
            _ => return None,
        }
    }
    Some(Ordering::Equal)
}

fn has_components(a: &[Option<i64>; 7], b: &[Option<i64>; 7], through: usize) -> bool {
    a[..=through].iter().chain(&b[..=through]).all(Option::is_some)
}

/// Whole calendar periods from `start` to `end` (negative when `end` is earlier).
/// `None` when either value is less precise than the unit.
pub fn whole_periods(start: &CqlDateTime, end: &CqlDateTime, unit: Precision) -> Option<i64> {
    let (a, b) = aligned(start, end);
    let (ca, cb) = (components(&a), components(&b));
    let idx = component_index(unit);
    if !has_components(&ca, &cb, idx) {
        return None;
    }

    match unit {
        Precision::Year | Precision::Month => {
            let mut diff = cb[0]? - ca[0]?;
            if unit == Precision::Month {
                diff = diff * 12 + (cb[1]? - ca[1]?);
            }
            // Remaining components decide whether the last period completed
            let rest = ca[idx + 1..]
                .iter()
                .zip(&cb[idx + 1..])
                .map_while(|(x, y)| Some(x.as_ref()?.cmp(y.as_ref()?)))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            if diff > 0 && rest == Ordering::Greater {
                diff -= 1;
            } else if diff < 0 && rest == Ordering::Less {
                diff += 1;
            }
            Some(diff)
        }
        _ => {
            let elapsed = b.to_chrono()? - a.to_chrono()?;
            Some(elapsed.num_milliseconds() / fixed_millis(unit)?)
        }
    }
}

/// Number of `unit` boundaries crossed from `start` to `end`
pub fn boundaries_crossed(start: &CqlDateTime, end: &CqlDateTime, unit: Precision) -> Option<i64> {
    let (a, b) = aligned(start, end);
    let idx = component_index(unit);
    if !has_components(&components(&a), &components(&b), idx) {
        return None;
    }
    let (a, b) = (truncate(&a, unit), truncate(&b, unit));
    match unit {
        Precision::Year => Some(i64::from(b.year) - i64::from(a.year)),
        Precision::Month => {
            Some((i64::from(b.year) - i64::from(a.year)) * 12 + i64::from(b.month?) - i64::from(a.month?))
        }
        Precision::Week => {
            // Weeks start on Sunday
            let start = a.to_chrono()?.date_naive();
            let end = b.to_chrono()?.date_naive();
            let week_start = |d: NaiveDate| d - Duration::days(i64::from(d.weekday().num_days_from_sunday()));
            Some((week_start(end) - week_start(start)).num_days() / 7)
        }
        _ => {
            let elapsed = b.to_chrono()? - a.to_chrono()?;
            Some(elapsed.num_milliseconds() / fixed_millis(unit)?)
        }
    }
}

/// Move a Date or DateTime by `amount` calendar units.
///
/// Years and months clamp the day to the end of the target month. Units
/// finer than the value's precision are converted to that precision and
/// truncated; fixed-length units have no effect on values without a day.
pub(crate) fn shift_temporal(value: &CqlValue, amount: i64, unit: Precision) -> EvalResult<CqlValue> {
    match value {
        CqlValue::Date(date) => {
            let shifted = shift_datetime(&CqlDateTime::from_date(date), amount, unit)?;
            Ok(CqlValue::Date(shifted.date()))
        }
        CqlValue::DateTime(dt) => Ok(CqlValue::DateTime(shift_datetime(dt, amount, unit)?)),
        other => Err(EvalError::type_mismatch("Date or DateTime", other.type_name())),
    }
}

fn shift_datetime(dt: &CqlDateTime, amount: i64, unit: Precision) -> EvalResult<CqlDateTime> {
    let overflow = || EvalError::overflow("date arithmetic");
    let mut result = dt.clone();

    match unit {
        Precision::Year | Precision::Month => {
            let months = if unit == Precision::Year {
                amount.checked_mul(12).ok_or_else(overflow)?
            } else {
                amount
            };
            match dt.month {
                None => {
                    let year = i64::from(dt.year) + months / 12;
                    result.year = i32::try_from(year).map_err(|_| overflow())?;
                }
                Some(month) => {
                    let total = i64::from(dt.year) * 12 + i64::from(month) - 1 + months;
                    result.year = i32::try_from(total.div_euclid(12)).map_err(|_| overflow())?;
                    let new_month = (total.rem_euclid(12) + 1) as u8;
                    result.month = Some(new_month);
                    result.day = dt.day.map(|d| d.min(days_in_month(result.year, new_month)));
                }
            }
        }
        _ => {
            let Some(unit_ms) = fixed_millis(unit) else {
                return Ok(result);
            };
            let precision = dt_precision(dt);
            let Some(precision_ms) = fixed_millis(precision) else {
                return Ok(result);
            };
            let steps = amount.checked_mul(unit_ms).ok_or_else(overflow)? / precision_ms;
            let millis = steps.checked_mul(precision_ms).ok_or_else(overflow)?;
            let instant = dt.to_chrono().ok_or_else(overflow)?;
            let moved = instant
                .checked_add_signed(Duration::milliseconds(millis))
                .ok_or_else(overflow)?;
            let mut rebuilt = truncate(&CqlDateTime::from_chrono(&moved), precision);
            rebuilt.offset_minutes = dt.offset_minutes;
            result = rebuilt;
        }
    }

    if !(1..=9999).contains(&result.year) {
        return Err(overflow());
    }
    Ok(result)
}

fn dt_precision(dt: &CqlDateTime) -> Precision {
    let present = components(dt).iter().take_while(|c| c.is_some()).count();
    PRECISIONS[present.saturating_sub(1)]
}
