//! Interval Operators
//!
//! Implements: Interval, Start, End, Contains, In, Includes, IncludedIn,
//! Before, After, Overlaps
//!
//! A point operand behaves as the closed unit interval `[p, p]`. A null
//! closed boundary is unbounded; a null open boundary is unknown.
//! Contains, In and Includes also accept lists.

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::{cql_compare, cql_equal};
use octofhir_cqm_elm::{BinaryExpression, IntervalExpression, UnaryExpression};
use octofhir_cqm_types::{CqlInterval, CqlList, CqlValue};
use std::cmp::Ordering;

/// Boundaries of an interval, or of a point seen as a unit interval
#[derive(Debug, Clone, Copy)]
struct Bounds<'a> {
    low: Option<&'a CqlValue>,
    low_closed: bool,
    high: Option<&'a CqlValue>,
    high_closed: bool,
}

impl<'a> Bounds<'a> {
    fn of(value: &'a CqlValue) -> Self {
        match value {
            CqlValue::Interval(interval) => Self {
                low: interval.low(),
                low_closed: interval.low_closed,
                high: interval.high(),
                high_closed: interval.high_closed,
            },
            point => Self {
                low: Some(point),
                low_closed: true,
                high: Some(point),
                high_closed: true,
            },
        }
    }
}

/// Three-valued conjunction
fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Whether `lower` is at or before `upper`; at equality, `allow_equal` decides
fn at_or_before(lower: &CqlValue, upper: &CqlValue, allow_equal: bool) -> EvalResult<Option<bool>> {
    Ok(cql_compare(lower, upper)?.map(|ord| match ord {
        Ordering::Less => true,
        Ordering::Equal => allow_equal,
        Ordering::Greater => false,
    }))
}

/// Whether interval `a` ends before interval `b` starts
fn ends_before(a: Bounds<'_>, b: Bounds<'_>) -> EvalResult<Option<bool>> {
    match (a.high, b.low) {
        (Some(high), Some(low)) => {
            // Touching boundaries only separate when one of them is open
            Ok(cql_compare(high, low)?.map(|ord| match ord {
                Ordering::Less => true,
                Ordering::Equal => !(a.high_closed && b.low_closed),
                Ordering::Greater => false,
            }))
        }
        (None, _) if a.high_closed => Ok(Some(false)),
        (_, None) if b.low_closed => Ok(Some(false)),
        _ => Ok(None),
    }
}

/// Whether interval `outer` includes interval `inner`
fn includes_bounds(outer: Bounds<'_>, inner: Bounds<'_>) -> EvalResult<Option<bool>> {
    let low = match (outer.low, inner.low) {
        (None, _) if outer.low_closed => Some(true),
        (None, _) => None,
        (Some(_), None) if inner.low_closed => Some(false),
        (Some(_), None) => None,
        (Some(o), Some(i)) => at_or_before(o, i, outer.low_closed || !inner.low_closed)?,
    };
    let high = match (outer.high, inner.high) {
        (None, _) if outer.high_closed => Some(true),
        (None, _) => None,
        (Some(_), None) if inner.high_closed => Some(false),
        (Some(_), None) => None,
        (Some(o), Some(i)) => at_or_before(i, o, outer.high_closed || !inner.high_closed)?,
    };
    Ok(and3(low, high))
}

/// Whether `point` lies within `interval`; null when uncertain
pub fn interval_contains(interval: &CqlInterval, point: &CqlValue) -> EvalResult<Option<bool>> {
    if point.is_null() {
        return Ok(None);
    }
    includes_bounds(Bounds::of(&CqlValue::Interval(interval.clone())), Bounds::of(point))
}

/// Whether two values overlap, each being a point or an interval
pub fn overlaps(a: &CqlValue, b: &CqlValue) -> EvalResult<Option<bool>> {
    let (a, b) = (Bounds::of(a), Bounds::of(b));
    let before = ends_before(a, b)?;
    let after = ends_before(b, a)?;
    Ok(match (before, after) {
        (Some(true), _) | (_, Some(true)) => Some(false),
        (Some(false), Some(false)) => Some(true),
        _ => None,
    })
}

fn list_contains(list: &CqlList, item: &CqlValue) -> EvalResult<Option<bool>> {
    if item.is_null() {
        return Ok(Some(list.iter().any(CqlValue::is_null)));
    }
    let mut uncertain = false;
    for element in list.iter() {
        match cql_equal(element, item)? {
            Some(true) => return Ok(Some(true)),
            Some(false) => {}
            None => uncertain |= !element.is_null(),
        }
    }
    Ok(if uncertain { None } else { Some(false) })
}

fn optional_boolean(value: Option<bool>) -> CqlValue {
    value.map_or(CqlValue::Null, CqlValue::Boolean)
}

impl CqlEngine {
    /// Evaluate Interval constructor; boundaries are closed unless stated
    pub fn eval_interval(&self, expr: &IntervalExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let low = match &expr.low {
            Some(low) => Some(self.evaluate(low, ctx)?).filter(|v| !v.is_null()),
            None => None,
        };
        let high = match &expr.high {
            Some(high) => Some(self.evaluate(high, ctx)?).filter(|v| !v.is_null()),
            None => None,
        };
        if let (Some(l), Some(h)) = (&low, &high) {
            if cql_compare(l, h)? == Some(Ordering::Greater) {
                return Err(EvalError::invalid_operand("Interval", format!("low {} is after high {}", l, h)));
            }
        }
        Ok(CqlValue::Interval(CqlInterval::new(
            low,
            expr.low_closed.unwrap_or(true),
            high,
            expr.high_closed.unwrap_or(true),
        )))
    }

    /// Evaluate Start: the first point of the interval
    pub fn eval_start(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => Ok(CqlValue::Null),
            CqlValue::Interval(interval) => Ok(match (interval.low(), interval.low_closed) {
                (Some(CqlValue::Integer(i)), false) => i.checked_add(1).map_or(CqlValue::Null, CqlValue::Integer),
                (Some(low), _) => low.clone(),
                (None, _) => CqlValue::Null,
            }),
            other => Err(EvalError::type_mismatch("Interval", other.type_name())),
        }
    }

    /// Evaluate End: the last point of the interval
    pub fn eval_end(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => Ok(CqlValue::Null),
            CqlValue::Interval(interval) => Ok(match (interval.high(), interval.high_closed) {
                (Some(CqlValue::Integer(i)), false) => i.checked_sub(1).map_or(CqlValue::Null, CqlValue::Integer),
                (Some(high), _) => high.clone(),
                (None, _) => CqlValue::Null,
            }),
            other => Err(EvalError::type_mismatch("Interval", other.type_name())),
        }
    }

    /// Evaluate Contains(container, item)
    pub fn eval_contains(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (container, item) = self.eval_binary_operands(expr, ctx)?;
        contains(&container, &item, "Contains")
    }

    /// Evaluate In(item, container)
    pub fn eval_in(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (item, container) = self.eval_binary_operands(expr, ctx)?;
        contains(&container, &item, "In")
    }

    /// Evaluate Includes(a, b)
    pub fn eval_includes(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (a, b) = self.eval_binary_operands(expr, ctx)?;
        includes(&a, &b, "Includes")
    }

    /// Evaluate IncludedIn(a, b), the converse of Includes
    pub fn eval_included_in(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (a, b) = self.eval_binary_operands(expr, ctx)?;
        includes(&b, &a, "IncludedIn")
    }

    /// Evaluate Before: `a` ends before `b` starts
    pub fn eval_before(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (a, b) = self.eval_binary_operands(expr, ctx)?;
        if a.is_null() || b.is_null() {
            return Ok(CqlValue::Null);
        }
        Ok(optional_boolean(ends_before(Bounds::of(&a), Bounds::of(&b))?))
    }

    /// Evaluate After: `a` starts after `b` ends
    pub fn eval_after(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (a, b) = self.eval_binary_operands(expr, ctx)?;
        if a.is_null() || b.is_null() {
            return Ok(CqlValue::Null);
        }
        Ok(optional_boolean(ends_before(Bounds::of(&b), Bounds::of(&a))?))
    }

    /// Evaluate Overlaps
    pub fn eval_overlaps(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (a, b) = self.eval_binary_operands(expr, ctx)?;
        if a.is_null() || b.is_null() {
            return Ok(CqlValue::Null);
        }
        Ok(optional_boolean(overlaps(&a, &b)?))
    }
}

fn contains(container: &CqlValue, item: &CqlValue, operator: &str) -> EvalResult<CqlValue> {
    match container {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::List(list) => Ok(optional_boolean(list_contains(list, item)?)),
        CqlValue::Interval(interval) => {
            if item.is_null() {
                return Ok(CqlValue::Null);
            }
            Ok(optional_boolean(includes_bounds(
                Bounds::of(&CqlValue::Interval(interval.clone())),
                Bounds::of(item),
            )?))
        }
        other => Err(EvalError::invalid_operand(
            operator,
            format!("expected List or Interval, found {}", other.type_name()),
        )),
    }
}

fn includes(outer: &CqlValue, inner: &CqlValue, operator: &str) -> EvalResult<CqlValue> {
    match (outer, inner) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
        (CqlValue::List(outer), CqlValue::List(inner)) => {
            let mut result = Some(true);
            for element in inner.iter() {
                result = and3(result, list_contains(outer, element)?);
            }
            Ok(optional_boolean(result))
        }
        (CqlValue::List(list), point) => Ok(optional_boolean(list_contains(list, point)?)),
        (CqlValue::Interval(_), _) => Ok(optional_boolean(includes_bounds(Bounds::of(outer), Bounds::of(inner))?)),
        (other, _) => Err(EvalError::invalid_operand(
            operator,
            format!("expected List or Interval, found {}", other.type_name()),
        )),
    }
}
