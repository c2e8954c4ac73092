//! Arithmetic Operators
//!
//! Implements: Add, Subtract, Multiply, Divide, Negate
//!
//! Integer arithmetic is checked and overflows are errors; division by zero
//! is null. Adding a calendar quantity to a Date or DateTime moves it by that
//! many calendar units.

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::datetime::{calendar_unit, shift_temporal};
use octofhir_cqm_elm::{BinaryExpression, UnaryExpression};
use octofhir_cqm_types::{CqlQuantity, CqlValue};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

impl CqlEngine {
    // =========================================================================
    // Binary Arithmetic
    // =========================================================================

    /// Evaluate Add (+) operator
    pub fn eval_add(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;

        // Null propagation
        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }

        match (&left, &right) {
            (CqlValue::Integer(a), CqlValue::Integer(b)) => a
                .checked_add(*b)
                .map(CqlValue::Integer)
                .ok_or_else(|| EvalError::overflow("Add")),
            (CqlValue::Integer(_) | CqlValue::Decimal(_), CqlValue::Integer(_) | CqlValue::Decimal(_)) => {
                decimal_op(&left, &right, Decimal::checked_add, "Add")
            }
            (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
                let unit = same_unit(a, b, "Add")?;
                quantity(a.value.checked_add(b.value), unit, "Add")
            }
            (CqlValue::Date(_) | CqlValue::DateTime(_), CqlValue::Quantity(q)) => shift_by(&left, q, false),
            (CqlValue::String(a), CqlValue::String(b)) => Ok(CqlValue::String(format!("{}{}", a, b))),
            _ => Err(mismatch("Add", &left, &right)),
        }
    }

    /// Evaluate Subtract (-) operator
    pub fn eval_subtract(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;

        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }

        match (&left, &right) {
            (CqlValue::Integer(a), CqlValue::Integer(b)) => a
                .checked_sub(*b)
                .map(CqlValue::Integer)
                .ok_or_else(|| EvalError::overflow("Subtract")),
            (CqlValue::Integer(_) | CqlValue::Decimal(_), CqlValue::Integer(_) | CqlValue::Decimal(_)) => {
                decimal_op(&left, &right, Decimal::checked_sub, "Subtract")
            }
            (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
                let unit = same_unit(a, b, "Subtract")?;
                quantity(a.value.checked_sub(b.value), unit, "Subtract")
            }
            (CqlValue::Date(_) | CqlValue::DateTime(_), CqlValue::Quantity(q)) => shift_by(&left, q, true),
            _ => Err(mismatch("Subtract", &left, &right)),
        }
    }

    /// Evaluate Multiply (*) operator
    pub fn eval_multiply(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;

        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }

        match (&left, &right) {
            (CqlValue::Integer(a), CqlValue::Integer(b)) => a
                .checked_mul(*b)
                .map(CqlValue::Integer)
                .ok_or_else(|| EvalError::overflow("Multiply")),
            (CqlValue::Integer(_) | CqlValue::Decimal(_), CqlValue::Integer(_) | CqlValue::Decimal(_)) => {
                decimal_op(&left, &right, Decimal::checked_mul, "Multiply")
            }
            (CqlValue::Quantity(q), n @ (CqlValue::Integer(_) | CqlValue::Decimal(_)))
            | (n @ (CqlValue::Integer(_) | CqlValue::Decimal(_)), CqlValue::Quantity(q)) => {
                let factor = n.as_decimal().unwrap_or(Decimal::ONE);
                quantity(q.value.checked_mul(factor), q.unit.clone(), "Multiply")
            }
            _ => Err(mismatch("Multiply", &left, &right)),
        }
    }

    /// Evaluate Divide (/) operator
    ///
    /// Always produces a Decimal (or Quantity); dividing by zero yields null.
    pub fn eval_divide(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;

        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }

        match (&left, &right) {
            (CqlValue::Integer(_) | CqlValue::Decimal(_), CqlValue::Integer(_) | CqlValue::Decimal(_)) => {
                let divisor = right.as_decimal().unwrap_or(Decimal::ZERO);
                if divisor.is_zero() {
                    return Ok(CqlValue::Null);
                }
                decimal_op(&left, &right, Decimal::checked_div, "Divide")
            }
            (CqlValue::Quantity(q), n @ (CqlValue::Integer(_) | CqlValue::Decimal(_))) => {
                let divisor = n.as_decimal().unwrap_or(Decimal::ZERO);
                if divisor.is_zero() {
                    return Ok(CqlValue::Null);
                }
                quantity(q.value.checked_div(divisor), q.unit.clone(), "Divide")
            }
            (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
                if b.value.is_zero() {
                    return Ok(CqlValue::Null);
                }
                same_unit(a, b, "Divide")?;
                quantity(a.value.checked_div(b.value), None, "Divide")
            }
            _ => Err(mismatch("Divide", &left, &right)),
        }
    }

    // =========================================================================
    // Unary Arithmetic
    // =========================================================================

    /// Evaluate Negate (-x) operator
    pub fn eval_negate(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => Ok(CqlValue::Null),
            CqlValue::Integer(i) => i
                .checked_neg()
                .map(CqlValue::Integer)
                .ok_or_else(|| EvalError::overflow("Negate")),
            CqlValue::Decimal(d) => Ok(CqlValue::Decimal(-d)),
            CqlValue::Quantity(q) => Ok(CqlValue::Quantity(CqlQuantity {
                value: -q.value,
                unit: q.unit,
            })),
            other => Err(EvalError::type_mismatch("numeric", other.type_name())),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Evaluate binary expression operands
    pub(crate) fn eval_binary_operands(
        &self,
        expr: &BinaryExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<(CqlValue, CqlValue)> {
        if expr.operand.len() != 2 {
            return Err(EvalError::internal("Binary expression must have exactly 2 operands"));
        }
        let left = self.evaluate(&expr.operand[0], ctx)?;
        let right = self.evaluate(&expr.operand[1], ctx)?;
        Ok((left, right))
    }
}

fn decimal_op(
    left: &CqlValue,
    right: &CqlValue,
    op: fn(Decimal, Decimal) -> Option<Decimal>,
    operator: &str,
) -> EvalResult<CqlValue> {
    let (a, b) = (
        left.as_decimal().unwrap_or(Decimal::ZERO),
        right.as_decimal().unwrap_or(Decimal::ZERO),
    );
    op(a, b)
        .map(CqlValue::Decimal)
        .ok_or_else(|| EvalError::overflow(operator))
}

/// Unit shared by two quantities; differing units need conversion, which is not supported
fn same_unit(a: &CqlQuantity, b: &CqlQuantity, operator: &str) -> EvalResult<Option<String>> {
    if a.normalized_unit() != b.normalized_unit() {
        return Err(EvalError::invalid_operand(
            operator,
            format!(
                "incompatible units '{}' and '{}'",
                a.unit.as_deref().unwrap_or("1"),
                b.unit.as_deref().unwrap_or("1")
            ),
        ));
    }
    Ok(a.normalized_unit().map(str::to_string))
}

fn quantity(value: Option<Decimal>, unit: Option<String>, operator: &str) -> EvalResult<CqlValue> {
    value
        .map(|value| CqlValue::Quantity(CqlQuantity { value, unit }))
        .ok_or_else(|| EvalError::overflow(operator))
}

fn shift_by(value: &CqlValue, q: &CqlQuantity, subtract: bool) -> EvalResult<CqlValue> {
    let operator = if subtract { "Subtract" } else { "Add" };
    let unit = q
        .unit
        .as_deref()
        .and_then(calendar_unit)
        .ok_or_else(|| EvalError::invalid_operand(operator, format!("'{}' is not a calendar unit", q)))?;
    let amount = q.value.trunc().to_i64().ok_or_else(|| EvalError::overflow(operator))?;
    shift_temporal(value, if subtract { -amount } else { amount }, unit)
}

fn mismatch(operator: &str, left: &CqlValue, right: &CqlValue) -> EvalError {
    EvalError::invalid_operand(
        operator,
        format!("cannot apply to {} and {}", left.type_name(), right.type_name()),
    )
}
