//! List Operators
//!
//! Implements: List, Exists, First, Last, Flatten, Distinct, SingletonFrom,
//! ToList, Count, AllTrue, AnyTrue, Union, Intersect, Except

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::cql_equal;
use octofhir_cqm_elm::{AggregateExpression, BinaryExpression, FirstLastExpression, ListExpression, UnaryExpression};
use octofhir_cqm_types::{CqlList, CqlValue};

impl CqlEngine {
    pub fn eval_list(&self, expr: &ListExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let elements = expr
            .elements
            .iter()
            .map(|e| self.evaluate(e, ctx))
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(CqlValue::List(CqlList::from_elements(elements)))
    }

    /// Evaluate Exists: true when the list has a non-null element
    pub fn eval_exists(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.operand, ctx)?;
        let elements = list_operand(&source, "Exists")?;
        Ok(CqlValue::Boolean(elements.iter().any(|v| !v.is_null())))
    }

    pub fn eval_first(&self, expr: &FirstLastExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        Ok(list_operand(&source, "First")?.first().cloned().unwrap_or(CqlValue::Null))
    }

    pub fn eval_last(&self, expr: &FirstLastExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        Ok(list_operand(&source, "Last")?.last().cloned().unwrap_or(CqlValue::Null))
    }

    /// Evaluate Flatten: one level of nesting removed
    pub fn eval_flatten(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.operand, ctx)?;
        if source.is_null() {
            return Ok(CqlValue::Null);
        }
        let mut flattened = Vec::new();
        for element in list_operand(&source, "Flatten")? {
            match element {
                CqlValue::List(inner) => flattened.extend(inner.elements.iter().cloned()),
                other => flattened.push(other.clone()),
            }
        }
        Ok(CqlValue::List(CqlList::from_elements(flattened)))
    }

    pub fn eval_distinct(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => Ok(CqlValue::Null),
            CqlValue::List(list) => Ok(CqlValue::List(CqlList::from_elements(distinct(list.elements)?))),
            other => Err(EvalError::type_mismatch("List", other.type_name())),
        }
    }

    /// Evaluate SingletonFrom: more than one element is an error
    pub fn eval_singleton_from(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.operand, ctx)?;
        match list_operand(&source, "SingletonFrom")? {
            [] => Ok(CqlValue::Null),
            [only] => Ok(only.clone()),
            many => Err(EvalError::invalid_operand(
                "SingletonFrom",
                format!("list has {} elements", many.len()),
            )),
        }
    }

    pub fn eval_to_list(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        Ok(match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => CqlValue::List(CqlList::new()),
            value => CqlValue::list([value]),
        })
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Evaluate Count: the number of non-null elements
    pub fn eval_count(&self, expr: &AggregateExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let count = list_operand(&source, "Count")?.iter().filter(|v| !v.is_null()).count();
        i32::try_from(count)
            .map(CqlValue::Integer)
            .map_err(|_| EvalError::overflow("Count"))
    }

    /// Evaluate AllTrue: nulls are ignored, an empty list is true
    pub fn eval_all_true(&self, expr: &AggregateExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let elements = list_operand(&source, "AllTrue")?;
        Ok(CqlValue::Boolean(elements.iter().all(|v| v.is_null() || v.is_true())))
    }

    /// Evaluate AnyTrue: an empty list is false
    pub fn eval_any_true(&self, expr: &AggregateExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let elements = list_operand(&source, "AnyTrue")?;
        Ok(CqlValue::Boolean(elements.iter().any(CqlValue::is_true)))
    }

    // =========================================================================
    // Set operations
    // =========================================================================

    /// Evaluate Union: distinct elements of both lists; a null side counts as empty
    pub fn eval_union(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        if left.is_null() && right.is_null() {
            return Ok(CqlValue::Null);
        }
        let mut combined = list_operand(&left, "Union")?.to_vec();
        combined.extend_from_slice(list_operand(&right, "Union")?);
        Ok(CqlValue::List(CqlList::from_elements(distinct(combined)?)))
    }

    /// Evaluate Intersect: distinct elements present in both lists
    pub fn eval_intersect(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }
        let other = list_operand(&right, "Intersect")?;
        let mut kept = Vec::new();
        for element in list_operand(&left, "Intersect")? {
            if position_of(other, element)?.is_some() {
                kept.push(element.clone());
            }
        }
        Ok(CqlValue::List(CqlList::from_elements(distinct(kept)?)))
    }

    /// Evaluate Except: distinct elements of the left list absent from the right
    pub fn eval_except(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        if left.is_null() {
            return Ok(CqlValue::Null);
        }
        let other = list_operand(&right, "Except")?;
        let mut kept = Vec::new();
        for element in list_operand(&left, "Except")? {
            if position_of(other, element)?.is_none() {
                kept.push(element.clone());
            }
        }
        Ok(CqlValue::List(CqlList::from_elements(distinct(kept)?)))
    }
}

/// Elements of a list operand; null is the empty list
fn list_operand<'a>(value: &'a CqlValue, operator: &str) -> EvalResult<&'a [CqlValue]> {
    match value {
        CqlValue::Null => Ok(&[]),
        CqlValue::List(list) => Ok(&list.elements),
        other => Err(EvalError::invalid_operand(
            operator,
            format!("expected List, found {}", other.type_name()),
        )),
    }
}

/// Index of the first element equal to `item`, nulls matching nulls
fn position_of(values: &[CqlValue], item: &CqlValue) -> EvalResult<Option<usize>> {
    for (i, value) in values.iter().enumerate() {
        let same = if value.is_null() || item.is_null() {
            value.is_null() && item.is_null()
        } else {
            cql_equal(value, item)? == Some(true)
        };
        if same {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Remove duplicates, keeping first occurrences in order
pub fn distinct(values: Vec<CqlValue>) -> EvalResult<Vec<CqlValue>> {
    let mut unique: Vec<CqlValue> = Vec::with_capacity(values.len());
    for value in values {
        if position_of(&unique, &value)?.is_none() {
            unique.push(value);
        }
    }
    Ok(unique)
}
