//! Comparison Operators
//!
//! Implements: Equal, NotEqual, Equivalent, Less, Greater, LessOrEqual, GreaterOrEqual
//! All comparison operators implement three-valued logic (true/false/null)

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use octofhir_cqm_elm::BinaryExpression;
use octofhir_cqm_types::{CqlDateTime, CqlInterval, CqlValue};
use rust_decimal::Decimal;
use std::cmp::Ordering;

impl CqlEngine {
    /// Evaluate Equal (=) operator with three-valued logic
    ///
    /// Returns null if either operand is null.
    /// For structured types, compares all elements
    pub fn eval_equal(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        Ok(optional_boolean(cql_equal(&left, &right)?))
    }

    /// Evaluate NotEqual (!=) operator
    ///
    /// Equivalent to Not(Equal(left, right))
    pub fn eval_not_equal(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        Ok(optional_boolean(cql_equal(&left, &right)?.map(|eq| !eq)))
    }

    /// Evaluate Equivalent (~) operator
    ///
    /// Unlike Equal, Equivalent never returns null:
    /// - null ~ null -> true
    /// - null ~ non-null -> false
    ///
    /// Codes compare by code and system only; strings ignore case.
    pub fn eval_equivalent(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        Ok(CqlValue::Boolean(cql_equivalent(&left, &right)?))
    }

    /// Evaluate Less (<) operator
    pub fn eval_less(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_ordering(expr, ctx, |ord| ord == Ordering::Less)
    }

    /// Evaluate Greater (>) operator
    pub fn eval_greater(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_ordering(expr, ctx, |ord| ord == Ordering::Greater)
    }

    /// Evaluate LessOrEqual (<=) operator
    pub fn eval_less_or_equal(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_ordering(expr, ctx, |ord| ord != Ordering::Greater)
    }

    /// Evaluate GreaterOrEqual (>=) operator
    pub fn eval_greater_or_equal(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_ordering(expr, ctx, |ord| ord != Ordering::Less)
    }

    fn eval_ordering(
        &self,
        expr: &BinaryExpression,
        ctx: &mut EvaluationContext,
        accept: impl Fn(Ordering) -> bool,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }
        // Uncertain comparisons (mixed temporal precision) are null
        Ok(optional_boolean(cql_compare(&left, &right)?.map(accept)))
    }
}

fn optional_boolean(value: Option<bool>) -> CqlValue {
    value.map_or(CqlValue::Null, CqlValue::Boolean)
}

/// CQL equality comparison
///
/// Returns Some(true) if values are equal, Some(false) if different, None if uncertain (null).
pub fn cql_equal(left: &CqlValue, right: &CqlValue) -> EvalResult<Option<bool>> {
    match (left, right) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(None),

        (CqlValue::Boolean(a), CqlValue::Boolean(b)) => Ok(Some(a == b)),
        (CqlValue::String(a), CqlValue::String(b)) => Ok(Some(a == b)),
        (CqlValue::Integer(_) | CqlValue::Decimal(_), CqlValue::Integer(_) | CqlValue::Decimal(_)) => {
            Ok(Some(left.as_decimal() == right.as_decimal()))
        }

        (CqlValue::Date(_) | CqlValue::DateTime(_), CqlValue::Date(_) | CqlValue::DateTime(_)) => {
            Ok(compare_temporal_values(left, right).map(|ord| ord == Ordering::Equal))
        }

        // Without unit conversion, differing units are uncertain
        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
            if a.normalized_unit() == b.normalized_unit() {
                Ok(Some(a.value == b.value))
            } else {
                Ok(None)
            }
        }

        (CqlValue::Code(a), CqlValue::Code(b)) => {
            Ok(Some(a.code == b.code && a.system == b.system && a.version == b.version))
        }
        (CqlValue::Concept(a), CqlValue::Concept(b)) => {
            if a.codes.len() != b.codes.len() {
                return Ok(Some(false));
            }
            let codes_equal = a.codes.iter().zip(&b.codes).all(|(x, y)| {
                x.code == y.code && x.system == y.system && x.version == y.version
            });
            Ok(Some(codes_equal && a.display == b.display))
        }

        (CqlValue::List(a), CqlValue::List(b)) => {
            if a.len() != b.len() {
                return Ok(Some(false));
            }
            elements_equal(a.iter().zip(b.iter()))
        }
        (CqlValue::Tuple(a), CqlValue::Tuple(b)) => {
            if a.len() != b.len() {
                return Ok(Some(false));
            }
            let mut pairs = Vec::with_capacity(a.len());
            for (name, value) in a.iter() {
                match b.get(name) {
                    Some(other) => pairs.push((value, other)),
                    None => return Ok(Some(false)),
                }
            }
            elements_equal(pairs.into_iter())
        }
        (CqlValue::Interval(a), CqlValue::Interval(b)) => interval_equal(a, b),

        (CqlValue::Resource(a), CqlValue::Resource(b)) => Ok(Some(a == b)),

        // Different types are never equal
        _ => Ok(Some(false)),
    }
}

/// Element-wise equality where nulls at the same position count as equal
fn elements_equal<'a>(pairs: impl Iterator<Item = (&'a CqlValue, &'a CqlValue)>) -> EvalResult<Option<bool>> {
    let mut uncertain = false;
    for (a, b) in pairs {
        if a.is_null() && b.is_null() {
            continue;
        }
        match cql_equal(a, b)? {
            Some(false) => return Ok(Some(false)),
            Some(true) => {}
            None => uncertain = true,
        }
    }
    Ok(if uncertain { None } else { Some(true) })
}

fn interval_equal(a: &CqlInterval, b: &CqlInterval) -> EvalResult<Option<bool>> {
    if a.low_closed != b.low_closed || a.high_closed != b.high_closed {
        return Ok(Some(false));
    }
    let bound = |x: Option<&CqlValue>, y: Option<&CqlValue>| -> EvalResult<Option<bool>> {
        match (x, y) {
            (None, None) => Ok(Some(true)),
            (Some(x), Some(y)) => cql_equal(x, y),
            _ => Ok(None),
        }
    };
    let low = bound(a.low(), b.low())?;
    let high = bound(a.high(), b.high())?;
    Ok(match (low, high) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    })
}

/// CQL equivalence comparison
///
/// Never uncertain: nulls are equivalent to each other only, strings compare
/// case-insensitively, codes by code and system, and a code is equivalent to
/// a concept containing an equivalent code.
pub fn cql_equivalent(left: &CqlValue, right: &CqlValue) -> EvalResult<bool> {
    match (left, right) {
        (CqlValue::Null, CqlValue::Null) => Ok(true),
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(false),

        (CqlValue::String(a), CqlValue::String(b)) => Ok(a.to_lowercase() == b.to_lowercase()),

        (CqlValue::Code(a), CqlValue::Code(b)) => Ok(a.is_equivalent(b)),
        (CqlValue::Code(code), CqlValue::Concept(concept)) | (CqlValue::Concept(concept), CqlValue::Code(code)) => {
            Ok(concept.contains_equivalent(code))
        }
        (CqlValue::Concept(a), CqlValue::Concept(b)) => {
            Ok(a.codes.iter().any(|code| b.contains_equivalent(code)))
        }

        (CqlValue::List(a), CqlValue::List(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (x, y) in a.iter().zip(b.iter()) {
                if !cql_equivalent(x, y)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (CqlValue::Tuple(a), CqlValue::Tuple(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (name, value) in a.iter() {
                match b.get(name) {
                    Some(other) if cql_equivalent(value, other)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (CqlValue::Interval(a), CqlValue::Interval(b)) => {
            let bound = |x: Option<&CqlValue>, y: Option<&CqlValue>| match (x, y) {
                (None, None) => Ok(true),
                (Some(x), Some(y)) => cql_equivalent(x, y),
                _ => Ok(false),
            };
            Ok(a.low_closed == b.low_closed
                && a.high_closed == b.high_closed
                && bound(a.low(), b.low())?
                && bound(a.high(), b.high())?)
        }

        _ => Ok(cql_equal(left, right)? == Some(true)),
    }
}

/// CQL ordering comparison
///
/// Returns None when either side is null or the comparison is uncertain
/// (temporal values of differing precision sharing a prefix, quantities in
/// different units). Unorderable types are an error.
pub fn cql_compare(left: &CqlValue, right: &CqlValue) -> EvalResult<Option<Ordering>> {
    match (left, right) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(None),
        (CqlValue::Integer(a), CqlValue::Integer(b)) => Ok(Some(a.cmp(b))),
        (CqlValue::Integer(_) | CqlValue::Decimal(_), CqlValue::Integer(_) | CqlValue::Decimal(_)) => {
            let a = left.as_decimal().unwrap_or(Decimal::ZERO);
            let b = right.as_decimal().unwrap_or(Decimal::ZERO);
            Ok(Some(a.cmp(&b)))
        }
        (CqlValue::String(a), CqlValue::String(b)) => Ok(Some(a.cmp(b))),
        (CqlValue::Boolean(a), CqlValue::Boolean(b)) => Ok(Some(a.cmp(b))),
        (CqlValue::Date(_) | CqlValue::DateTime(_), CqlValue::Date(_) | CqlValue::DateTime(_)) => {
            Ok(compare_temporal_values(left, right))
        }
        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => Ok(a.partial_cmp(b)),
        _ => Err(EvalError::invalid_operand(
            "comparison",
            format!("cannot order {} and {}", left.type_name(), right.type_name()),
        )),
    }
}

/// Compare two Date/DateTime values, promoting a Date when the kinds differ
pub(crate) fn compare_temporal_values(left: &CqlValue, right: &CqlValue) -> Option<Ordering> {
    match (left, right) {
        (CqlValue::Date(a), CqlValue::Date(b)) => a.partial_cmp(b),
        (CqlValue::DateTime(a), CqlValue::DateTime(b)) => a.partial_cmp(b),
        (CqlValue::Date(a), CqlValue::DateTime(b)) => CqlDateTime::from_date(a).partial_cmp(b),
        (CqlValue::DateTime(a), CqlValue::Date(b)) => a.partial_cmp(&CqlDateTime::from_date(b)),
        _ => None,
    }
}

/// Total order used for sorting: nulls first, uncertain or unorderable pairs equal
pub fn sort_compare(left: &CqlValue, right: &CqlValue) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => cql_compare(left, right).ok().flatten().unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_types::{CqlCode, CqlConcept, CqlDate, CqlQuantity, CqlTuple};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_integer_equality() {
        assert_eq!(cql_equal(&CqlValue::Integer(5), &CqlValue::Integer(5)).unwrap(), Some(true));
        assert_eq!(cql_equal(&CqlValue::Integer(5), &CqlValue::Integer(6)).unwrap(), Some(false));
        assert_eq!(
            cql_equal(&CqlValue::Integer(5), &CqlValue::Decimal(Decimal::from(5))).unwrap(),
            Some(true)
        );
        assert_eq!(cql_equal(&CqlValue::Integer(5), &CqlValue::Null).unwrap(), None);
    }

    #[test]
    fn test_string_equivalence() {
        assert_eq!(cql_equal(&CqlValue::string("hello"), &CqlValue::string("Hello")).unwrap(), Some(false));
        assert!(cql_equivalent(&CqlValue::string("hello"), &CqlValue::string("HELLO")).unwrap());
        assert!(cql_equivalent(&CqlValue::Null, &CqlValue::Null).unwrap());
        assert!(!cql_equivalent(&CqlValue::Null, &CqlValue::string("x")).unwrap());
    }

    #[test]
    fn test_code_and_concept_equivalence() {
        let code1 = CqlValue::Code(CqlCode::new("123", "http://snomed.info/sct", Some("1.0"), Some("Test")));
        let code2 = CqlValue::Code(CqlCode::new("123", "http://snomed.info/sct", Some("2.0"), Some("Other")));

        // Equal fails because version differs
        assert_eq!(cql_equal(&code1, &code2).unwrap(), Some(false));
        assert!(cql_equivalent(&code1, &code2).unwrap());

        let concept = CqlValue::Concept(CqlConcept::new(
            [
                CqlCode::simple("999", "http://loinc.org"),
                CqlCode::simple("123", "http://snomed.info/sct"),
            ],
            None::<String>,
        ));
        assert!(cql_equivalent(&code1, &concept).unwrap());
        assert!(cql_equivalent(&concept, &code2).unwrap());
    }

    #[rstest]
    #[case(CqlValue::Date(CqlDate::new(2024, 1, 2)), CqlValue::Date(CqlDate::new(2024, 1, 3)), Some(Ordering::Less))]
    #[case(CqlValue::Date(CqlDate::year_month(2024, 1)), CqlValue::Date(CqlDate::new(2024, 1, 3)), None)]
    #[case(CqlValue::Date(CqlDate::year_month(2023, 12)), CqlValue::Date(CqlDate::new(2024, 1, 3)), Some(Ordering::Less))]
    #[case(
        CqlValue::Date(CqlDate::new(2024, 1, 2)),
        CqlValue::DateTime(CqlDateTime::new(2024, 1, 3, 10, 0, 0, 0, Some(0))),
        Some(Ordering::Less)
    )]
    #[case(
        CqlValue::Date(CqlDate::new(2024, 1, 3)),
        CqlValue::DateTime(CqlDateTime::new(2024, 1, 3, 10, 0, 0, 0, Some(0))),
        None
    )]
    #[case(
        CqlValue::Quantity(CqlQuantity::new(Decimal::from(5), "mg")),
        CqlValue::Quantity(CqlQuantity::new(Decimal::from(6), "mg")),
        Some(Ordering::Less)
    )]
    #[case(
        CqlValue::Quantity(CqlQuantity::new(Decimal::from(5), "mg")),
        CqlValue::Quantity(CqlQuantity::new(Decimal::from(6), "g")),
        None
    )]
    fn test_compare(#[case] left: CqlValue, #[case] right: CqlValue, #[case] expected: Option<Ordering>) {
        assert_eq!(cql_compare(&left, &right).unwrap(), expected);
    }

    #[test]
    fn test_unorderable_types() {
        let err = cql_compare(&CqlValue::Integer(1), &CqlValue::string("a")).unwrap_err();
        assert!(matches!(err, EvalError::InvalidOperand { .. }));
    }

    #[test]
    fn test_tuple_equality_with_nulls() {
        let t1 = CqlTuple::from_elements([("Id", CqlValue::Integer(1)), ("Name", CqlValue::Null)]);
        let t2 = t1.clone();
        let t3 = CqlTuple::from_elements([("Id", CqlValue::Integer(1)), ("Name", CqlValue::string("John"))]);

        assert_eq!(cql_equal(&CqlValue::Tuple(t1.clone()), &CqlValue::Tuple(t2)).unwrap(), Some(true));
        // One null, one value - uncertain
        assert_eq!(cql_equal(&CqlValue::Tuple(t1), &CqlValue::Tuple(t3)).unwrap(), None);
    }

    #[test]
    fn test_sort_compare_nulls_first() {
        let mut values = vec![CqlValue::Integer(3), CqlValue::Null, CqlValue::Integer(1)];
        values.sort_by(sort_compare);
        assert_eq!(values, vec![CqlValue::Null, CqlValue::Integer(1), CqlValue::Integer(3)]);
    }
}
