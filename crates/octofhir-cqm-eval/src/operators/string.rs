//! String Operators
//!
//! Implements: Concatenate, Upper, Lower, StartsWith, EndsWith, Matches

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use octofhir_cqm_elm::{BinaryExpression, NaryExpression, UnaryExpression};
use octofhir_cqm_types::CqlValue;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;

/// Compiled patterns, keyed by the source pattern
static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

impl CqlEngine {
    /// Evaluate Concatenate: null if any operand is null
    pub fn eval_concatenate(&self, expr: &NaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let mut result = String::new();
        for operand in &expr.operand {
            match self.evaluate(operand, ctx)? {
                CqlValue::Null => return Ok(CqlValue::Null),
                CqlValue::String(s) => result.push_str(&s),
                other => return Err(EvalError::type_mismatch("String", other.type_name())),
            }
        }
        Ok(CqlValue::String(result))
    }

    pub fn eval_upper(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.map_string(expr, ctx, str::to_uppercase)
    }

    pub fn eval_lower(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.map_string(expr, ctx, str::to_lowercase)
    }

    pub fn eval_starts_with(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.test_strings(expr, ctx, |s, prefix| Ok(s.starts_with(prefix)))
    }

    pub fn eval_ends_with(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.test_strings(expr, ctx, |s, suffix| Ok(s.ends_with(suffix)))
    }

    /// Evaluate Matches: true when the whole string matches the pattern
    pub fn eval_matches(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.test_strings(expr, ctx, |s, pattern| Ok(compiled(pattern)?.is_match(s)))
    }

    fn map_string(
        &self,
        expr: &UnaryExpression,
        ctx: &mut EvaluationContext,
        f: impl Fn(&str) -> String,
    ) -> EvalResult<CqlValue> {
        match self.evaluate(&expr.operand, ctx)? {
            CqlValue::Null => Ok(CqlValue::Null),
            CqlValue::String(s) => Ok(CqlValue::String(f(&s))),
            other => Err(EvalError::type_mismatch("String", other.type_name())),
        }
    }

    fn test_strings(
        &self,
        expr: &BinaryExpression,
        ctx: &mut EvaluationContext,
        f: impl Fn(&str, &str) -> EvalResult<bool>,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        match (&left, &right) {
            (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
            (CqlValue::String(a), CqlValue::String(b)) => Ok(CqlValue::Boolean(f(a, b)?)),
            (CqlValue::String(_), other) | (other, _) => {
                Err(EvalError::type_mismatch("String", other.type_name()))
            }
        }
    }
}

/// Anchored regex for `pattern`, compiled once per process
fn compiled(pattern: &str) -> EvalResult<Regex> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|_| EvalError::InvalidRegex {
        pattern: pattern.to_string(),
    })?;
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_elm::{Element, Expression, Literal, NullLiteral};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn string(value: &str) -> Expression {
        Expression::Literal(Literal {
            element: Element::default(),
            value_type: "{urn:hl7-org:elm-types:r1}String".to_string(),
            value: Some(value.to_string()),
        })
    }

    fn binary(left: Expression, right: Expression) -> BinaryExpression {
        BinaryExpression {
            element: Element::default(),
            operand: vec![left, right],
        }
    }

    #[rstest]
    #[case("M123", "M\\d+", true)]
    #[case("xM123", "M\\d+", false)]
    #[case("abc", "b", false)]
    fn test_matches_whole_string(#[case] input: &str, #[case] pattern: &str, #[case] expected: bool) {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        assert_eq!(
            engine.eval_matches(&binary(string(input), string(pattern)), &mut ctx).unwrap(),
            CqlValue::Boolean(expected)
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        assert_eq!(
            engine.eval_matches(&binary(string("a"), string("(")), &mut ctx).unwrap_err(),
            EvalError::InvalidRegex { pattern: "(".to_string() }
        );
    }

    #[test]
    fn test_concatenate_null() {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        let expr = NaryExpression {
            element: Element::default(),
            operand: vec![string("a"), string("b")],
        };
        assert_eq!(engine.eval_concatenate(&expr, &mut ctx).unwrap(), CqlValue::string("ab"));

        let expr = NaryExpression {
            element: Element::default(),
            operand: vec![string("a"), Expression::Null(NullLiteral { element: Element::default() })],
        };
        assert_eq!(engine.eval_concatenate(&expr, &mut ctx).unwrap(), CqlValue::Null);
    }

    #[test]
    fn test_prefix_suffix_case() {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        assert_eq!(
            engine.eval_starts_with(&binary(string("Hypertension"), string("Hyper")), &mut ctx).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            engine.eval_ends_with(&binary(string("Hypertension"), string("sion ")), &mut ctx).unwrap(),
            CqlValue::Boolean(false)
        );
        let upper = UnaryExpression {
            element: Element::default(),
            operand: Box::new(string("abc")),
        };
        assert_eq!(engine.eval_upper(&upper, &mut ctx).unwrap(), CqlValue::string("ABC"));
    }
}
