//! Logical Operators
//!
//! Implements: And, Or, Xor, Implies, Not, IsNull, IsTrue, IsFalse, Coalesce, If, Case
//! All logical operators implement three-valued logic

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::cql_equal;
use octofhir_cqm_elm::{BinaryExpression, CaseExpression, IfExpression, NaryExpression, UnaryExpression};
use octofhir_cqm_types::CqlValue;

impl CqlEngine {
    /// Evaluate And operator with three-valued logic
    ///
    /// Truth table:
    /// | A     | B     | A and B |
    /// |-------|-------|---------|
    /// | true  | true  | true    |
    /// | true  | false | false   |
    /// | true  | null  | null    |
    /// | false | true  | false   |
    /// | false | false | false   |
    /// | false | null  | false   |
    /// | null  | true  | null    |
    /// | null  | false | false   |
    /// | null  | null  | null    |
    pub fn eval_and(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        let (a, b) = (truth(&left)?, truth(&right)?);

        Ok(match (a, b) {
            (Some(false), _) | (_, Some(false)) => CqlValue::Boolean(false),
            (Some(true), Some(true)) => CqlValue::Boolean(true),
            _ => CqlValue::Null,
        })
    }

    /// Evaluate Or operator with three-valued logic
    ///
    /// Truth table:
    /// | A     | B     | A or B  |
    /// |-------|-------|---------|
    /// | true  | true  | true    |
    /// | true  | false | true    |
    /// | true  | null  | true    |
    /// | false | true  | true    |
    /// | false | false | false   |
    /// | false | null  | null    |
    /// | null  | true  | true    |
    /// | null  | false | null    |
    /// | null  | null  | null    |
    pub fn eval_or(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        let (a, b) = (truth(&left)?, truth(&right)?);

        Ok(match (a, b) {
            (Some(true), _) | (_, Some(true)) => CqlValue::Boolean(true),
            (Some(false), Some(false)) => CqlValue::Boolean(false),
            _ => CqlValue::Null,
        })
    }

    /// Evaluate Xor operator: null if either side is null
    pub fn eval_xor(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        Ok(match (truth(&left)?, truth(&right)?) {
            (Some(a), Some(b)) => CqlValue::Boolean(a != b),
            _ => CqlValue::Null,
        })
    }

    /// Evaluate Implies operator
    ///
    /// Truth table:
    /// | A     | B     | A implies B |
    /// |-------|-------|-------------|
    /// | true  | true  | true        |
    /// | true  | false | false       |
    /// | true  | null  | null        |
    /// | false | any   | true        |
    /// | null  | true  | true        |
    /// | null  | false | null        |
    /// | null  | null  | null        |
    pub fn eval_implies(&self, expr: &BinaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_binary_operands(expr, ctx)?;
        Ok(match (truth(&left)?, truth(&right)?) {
            (Some(false), _) | (_, Some(true)) => CqlValue::Boolean(true),
            (Some(true), Some(false)) => CqlValue::Boolean(false),
            _ => CqlValue::Null,
        })
    }

    /// Evaluate Not operator; not null is null
    pub fn eval_not(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        Ok(truth(&operand)?.map_or(CqlValue::Null, |b| CqlValue::Boolean(!b)))
    }

    pub fn eval_is_null(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        Ok(CqlValue::Boolean(operand.is_null()))
    }

    pub fn eval_is_true(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        Ok(CqlValue::Boolean(operand.is_true()))
    }

    pub fn eval_is_false(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        Ok(CqlValue::Boolean(operand.is_false()))
    }

    /// Evaluate Coalesce: the first non-null operand.
    ///
    /// A single list operand yields its first non-null element.
    pub fn eval_coalesce(&self, expr: &NaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        if let [only] = expr.operand.as_slice() {
            return Ok(match self.evaluate(only, ctx)? {
                CqlValue::List(list) => list.iter().find(|v| !v.is_null()).cloned().unwrap_or(CqlValue::Null),
                other => other,
            });
        }

        for operand in &expr.operand {
            let value = self.evaluate(operand, ctx)?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        Ok(CqlValue::Null)
    }

    /// Evaluate If: a null condition selects the else branch
    pub fn eval_if(&self, expr: &IfExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let condition = self.evaluate(&expr.condition, ctx)?;
        if truth(&condition)? == Some(true) {
            self.evaluate(&expr.then, ctx)
        } else {
            self.evaluate(&expr.else_clause, ctx)
        }
    }

    /// Evaluate Case
    ///
    /// With a comparand, the first item whose `when` equals the comparand is
    /// selected; otherwise the first item whose `when` is true.
    pub fn eval_case(&self, expr: &CaseExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let comparand = match &expr.comparand {
            Some(comparand) => Some(self.evaluate(comparand, ctx)?),
            None => None,
        };

        for item in &expr.case_item {
            let when = self.evaluate(&item.when, ctx)?;
            let selected = match &comparand {
                Some(comparand) => cql_equal(comparand, &when)? == Some(true),
                None => truth(&when)? == Some(true),
            };
            if selected {
                return self.evaluate(&item.then, ctx);
            }
        }
        self.evaluate(&expr.else_clause, ctx)
    }
}

/// Boolean view of a logical operand; non-boolean values are a type error
fn truth(value: &CqlValue) -> EvalResult<Option<bool>> {
    match value {
        CqlValue::Null => Ok(None),
        CqlValue::Boolean(b) => Ok(Some(*b)),
        other => Err(EvalError::type_mismatch("Boolean", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_elm::{CaseItem, Element, Expression, Literal, NullLiteral};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn boolean(value: Option<bool>) -> Expression {
        match value {
            Some(b) => Expression::Literal(Literal {
                element: Element::default(),
                value_type: "{urn:hl7-org:elm-types:r1}Boolean".to_string(),
                value: Some(b.to_string()),
            }),
            None => Expression::Null(NullLiteral { element: Element::default() }),
        }
    }

    fn string(value: &str) -> Expression {
        Expression::Literal(Literal {
            element: Element::default(),
            value_type: "{urn:hl7-org:elm-types:r1}String".to_string(),
            value: Some(value.to_string()),
        })
    }

    fn binary(a: Option<bool>, b: Option<bool>) -> BinaryExpression {
        BinaryExpression {
            element: Element::default(),
            operand: vec![boolean(a), boolean(b)],
        }
    }

    fn expected(value: Option<bool>) -> CqlValue {
        value.map_or(CqlValue::Null, CqlValue::Boolean)
    }

    #[rstest]
    #[case(Some(true), Some(true), Some(true), Some(true))]
    #[case(Some(true), Some(false), Some(false), Some(true))]
    #[case(Some(true), None, None, Some(true))]
    #[case(Some(false), Some(false), Some(false), Some(false))]
    #[case(Some(false), None, Some(false), None)]
    #[case(None, Some(true), None, Some(true))]
    #[case(None, None, None, None)]
    fn test_and_or(
        #[case] a: Option<bool>,
        #[case] b: Option<bool>,
        #[case] and: Option<bool>,
        #[case] or: Option<bool>,
    ) {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        assert_eq!(engine.eval_and(&binary(a, b), &mut ctx).unwrap(), expected(and));
        assert_eq!(engine.eval_or(&binary(a, b), &mut ctx).unwrap(), expected(or));
    }

    #[rstest]
    #[case(Some(true), Some(false), Some(false))]
    #[case(Some(false), None, Some(true))]
    #[case(None, Some(true), Some(true))]
    #[case(None, Some(false), None)]
    fn test_implies(#[case] a: Option<bool>, #[case] b: Option<bool>, #[case] result: Option<bool>) {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        assert_eq!(engine.eval_implies(&binary(a, b), &mut ctx).unwrap(), expected(result));
    }

    #[test]
    fn test_non_boolean_operand() {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        let expr = BinaryExpression {
            element: Element::default(),
            operand: vec![boolean(Some(true)), string("yes")],
        };
        assert_eq!(
            engine.eval_and(&expr, &mut ctx).unwrap_err(),
            EvalError::type_mismatch("Boolean", "String")
        );
    }

    #[test]
    fn test_coalesce_and_case() {
        let engine = CqlEngine::new();
        let mut ctx = EvaluationContext::new();
        let coalesce = NaryExpression {
            element: Element::default(),
            operand: vec![boolean(None), string("a"), string("b")],
        };
        assert_eq!(engine.eval_coalesce(&coalesce, &mut ctx).unwrap(), CqlValue::string("a"));

        let case = CaseExpression {
            element: Element::default(),
            comparand: Some(Box::new(string("b"))),
            case_item: vec![
                CaseItem { when: Box::new(string("a")), then: Box::new(string("first")) },
                CaseItem { when: Box::new(string("b")), then: Box::new(string("second")) },
            ],
            else_clause: Box::new(string("other")),
        };
        assert_eq!(engine.eval_case(&case, &mut ctx).unwrap(), CqlValue::string("second"));

        let if_null = IfExpression {
            element: Element::default(),
            condition: Box::new(boolean(None)),
            then: Box::new(string("then")),
            else_clause: Box::new(string("else")),
        };
        assert_eq!(engine.eval_if(&if_null, &mut ctx).unwrap(), CqlValue::string("else"));
    }
}
