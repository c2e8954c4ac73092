//! Clinical Operators
//!
//! Implements: Code, Concept and Quantity literals, InValueSet,
//! AnyInValueSet, InCodeSystem, CalculateAge, CalculateAgeAt
//!
//! Membership tests go through the context's terminology provider; a value
//! set the provider does not know is a hard failure, never "not a member".

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::datetime::{integer_or_null, temporal_operand, whole_periods};
use crate::terminology::TerminologyProvider;
use octofhir_cqm_elm::{
    AnyInValueSetExpression, CalculateAgeAtExpression, CalculateAgeExpression, CodeLiteralExpression,
    ConceptLiteralExpression, InCodeSystemExpression, InValueSetExpression, QuantityExpression,
};
use octofhir_cqm_types::{CqlCode, CqlConcept, CqlDateTime, CqlQuantity, CqlValue};
use std::sync::Arc;

impl CqlEngine {
    pub fn eval_code_literal(&self, expr: &CodeLiteralExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        Ok(CqlValue::Code(self.code_literal(expr, ctx)?))
    }

    pub fn eval_concept_literal(
        &self,
        expr: &ConceptLiteralExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let codes = expr
            .code
            .iter()
            .map(|code| self.code_literal(code, ctx))
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(CqlValue::Concept(CqlConcept::new(codes, expr.display.clone())))
    }

    /// A quantity literal without a value is null
    pub fn eval_quantity(&self, expr: &QuantityExpression) -> EvalResult<CqlValue> {
        Ok(match (expr.value, expr.unit.as_deref()) {
            (None, _) => CqlValue::Null,
            (Some(value), Some(unit)) => CqlValue::Quantity(CqlQuantity::new(value, unit)),
            (Some(value), None) => CqlValue::Quantity(CqlQuantity::unitless(value)),
        })
    }

    /// Evaluate InValueSet: a Code, Concept, String or list of codes against
    /// a value set; null is not a member
    pub fn eval_in_value_set(&self, expr: &InValueSetExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let value = self.evaluate(&expr.code, ctx)?;
        let id = self.value_set_id(&expr.valueset, ctx)?;
        let terminology = terminology_for(ctx, &id)?;
        Ok(CqlValue::Boolean(any_member(terminology.as_ref(), &codes_in(&value)?, &id)?))
    }

    /// Evaluate AnyInValueSet: true when any code of the list is a member
    pub fn eval_any_in_value_set(
        &self,
        expr: &AnyInValueSetExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let value = self.evaluate(&expr.codes, ctx)?;
        let id = self.value_set_id(&expr.valueset, ctx)?;
        let terminology = terminology_for(ctx, &id)?;
        let mut codes = Vec::new();
        match &value {
            CqlValue::List(list) => {
                for item in list.iter() {
                    codes.extend(codes_in(item)?);
                }
            }
            other => codes.extend(codes_in(other)?),
        }
        Ok(CqlValue::Boolean(any_member(terminology.as_ref(), &codes, &id)?))
    }

    pub fn eval_in_code_system(
        &self,
        expr: &InCodeSystemExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let value = self.evaluate(&expr.code, ctx)?;
        let current = ctx.current_library()?;
        let (system, _) = self.code_system_id(&current, &expr.codesystem, ctx)?;
        let codes = codes_in(&value)?;
        let member = match ctx.terminology() {
            Some(terminology) => codes.iter().any(|code| terminology.in_code_system(code, &system)),
            None => codes.iter().any(|code| code.system == system),
        };
        Ok(CqlValue::Boolean(member))
    }

    /// Evaluate CalculateAge: age of a birth date at the evaluation
    /// timestamp, in whole `precision` units
    pub fn eval_calculate_age(
        &self,
        expr: &CalculateAgeExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let birth = self.evaluate(&expr.operand, ctx)?;
        let as_of = match &birth {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::Date(_) => CqlDateTime::from_date(&ctx.today()),
            _ => ctx.now(),
        };
        let Some(birth) = temporal_operand(&birth, "CalculateAge")? else {
            return Ok(CqlValue::Null);
        };
        integer_or_null(whole_periods(&birth, &as_of, expr.precision), "CalculateAge")
    }

    pub fn eval_calculate_age_at(
        &self,
        expr: &CalculateAgeAtExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let [birth, as_of] = expr.operand.as_slice() else {
            return Err(EvalError::invalid_operand("CalculateAgeAt", "expected two operands"));
        };
        let birth = self.evaluate(birth, ctx)?;
        let as_of = self.evaluate(as_of, ctx)?;
        let (Some(birth), Some(as_of)) = (
            temporal_operand(&birth, "CalculateAgeAt")?,
            temporal_operand(&as_of, "CalculateAgeAt")?,
        ) else {
            return Ok(CqlValue::Null);
        };
        integer_or_null(whole_periods(&birth, &as_of, expr.precision), "CalculateAgeAt")
    }

    fn code_literal(&self, expr: &CodeLiteralExpression, ctx: &EvaluationContext) -> EvalResult<CqlCode> {
        let current = ctx.current_library()?;
        let (system, version) = self.code_system_id(&current, &expr.system, ctx)?;
        Ok(CqlCode::new(expr.code.clone(), system, version, expr.display.clone()))
    }
}

fn terminology_for(ctx: &EvaluationContext, id: &str) -> EvalResult<Arc<dyn TerminologyProvider>> {
    ctx.terminology()
        .cloned()
        .ok_or_else(|| EvalError::terminology_not_found(id))
}

/// Codes carried by a coded value; a bare string is a code without a system
fn codes_in(value: &CqlValue) -> EvalResult<Vec<CqlCode>> {
    Ok(match value {
        CqlValue::Null => Vec::new(),
        CqlValue::Code(code) => vec![code.clone()],
        CqlValue::Concept(concept) => concept.codes.iter().cloned().collect(),
        CqlValue::String(code) => vec![CqlCode::simple(code.clone(), "")],
        CqlValue::List(list) => {
            let mut codes = Vec::new();
            for item in list.iter() {
                codes.extend(codes_in(item)?);
            }
            codes
        }
        other => return Err(EvalError::type_mismatch("Code or Concept", other.type_name())),
    })
}

fn any_member(terminology: &dyn TerminologyProvider, codes: &[CqlCode], id: &str) -> EvalResult<bool> {
    for code in codes {
        let member = if code.system.is_empty() {
            terminology.expand(id)?.iter().any(|c| c.code == code.code)
        } else {
            terminology.in_value_set(code, id)?
        };
        if member {
            return Ok(true);
        }
    }
    // An empty code list still has to name a known value set
    if codes.is_empty() {
        terminology.expand(id)?;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibrarySet;
    use crate::terminology::BundleTerminologyProvider;
    use octofhir_cqm_elm::{
        CodeSystemRef, DateTimePrecision, Element, Expression, Literal, NullLiteral, ValueSetRef, parse_library,
    };
    use octofhir_cqm_types::CqlDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use serde_json::json;

    const LIBRARY: &str = r#"{"library": {
        "identifier": {"id": "Clinical", "version": "1.0.0"},
        "codeSystems": {"def": [{"name": "SNOMED", "id": "http://snomed.info/sct"}]},
        "valueSets": {"def": [
            {"name": "Diabetes", "id": "http://example.org/fhir/ValueSet/diabetes"},
            {"name": "Missing", "id": "http://example.org/fhir/ValueSet/missing"}
        ]}
    }}"#;

    fn context() -> EvaluationContext {
        let mut terminology = BundleTerminologyProvider::default();
        terminology
            .add_value_set(&json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/fhir/ValueSet/diabetes",
                "compose": {"include": [{"system": "http://snomed.info/sct", "concept": [
                    {"code": "44054006", "display": "Type 2 diabetes mellitus"}
                ]}]}
            }))
            .unwrap();
        let mut ctx = EvaluationContext::builder()
            .libraries(Arc::new(LibrarySet::single(parse_library(LIBRARY).unwrap())))
            .terminology(Arc::new(terminology))
            .now(CqlDateTime::new(2024, 6, 15, 12, 0, 0, 0, Some(0)))
            .build();
        ctx.push_library("Clinical");
        ctx
    }

    fn code(code: &str) -> Expression {
        Expression::Code(CodeLiteralExpression {
            element: Element::default(),
            system: CodeSystemRef {
                element: Element::default(),
                library_name: None,
                name: "SNOMED".to_string(),
            },
            code: code.to_string(),
            display: None,
        })
    }

    fn in_value_set(code: Expression, name: &str) -> InValueSetExpression {
        InValueSetExpression {
            element: Element::default(),
            code: Box::new(code),
            valueset: ValueSetRef {
                element: Element::default(),
                library_name: None,
                name: name.to_string(),
                preserve: None,
            },
        }
    }

    fn date(value: &str) -> Expression {
        Expression::Literal(Literal {
            element: Element::default(),
            value_type: "{urn:hl7-org:elm-types:r1}Date".to_string(),
            value: Some(value.to_string()),
        })
    }

    #[test]
    fn test_value_set_membership() {
        let engine = CqlEngine::new();
        let mut ctx = context();
        assert_eq!(
            engine.eval_in_value_set(&in_value_set(code("44054006"), "Diabetes"), &mut ctx).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            engine.eval_in_value_set(&in_value_set(code("38341003"), "Diabetes"), &mut ctx).unwrap(),
            CqlValue::Boolean(false)
        );
        let null = Expression::Null(NullLiteral { element: Element::default() });
        assert_eq!(
            engine.eval_in_value_set(&in_value_set(null, "Diabetes"), &mut ctx).unwrap(),
            CqlValue::Boolean(false)
        );
    }

    #[test]
    fn test_unknown_value_set_is_an_error() {
        let engine = CqlEngine::new();
        let mut ctx = context();
        let err = engine
            .eval_in_value_set(&in_value_set(code("44054006"), "Missing"), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TerminologyNotFound);
    }

    #[test]
    fn test_concept_and_code_system() {
        let engine = CqlEngine::new();
        let mut ctx = context();
        let concept = ConceptLiteralExpression {
            element: Element::default(),
            code: vec![],
            display: Some("Nothing".to_string()),
        };
        assert_eq!(
            engine.eval_concept_literal(&concept, &mut ctx).unwrap(),
            CqlValue::Concept(CqlConcept::new(Vec::new(), Some("Nothing")))
        );

        let in_system = InCodeSystemExpression {
            element: Element::default(),
            code: Box::new(code("44054006")),
            codesystem: CodeSystemRef {
                element: Element::default(),
                library_name: None,
                name: "SNOMED".to_string(),
            },
        };
        assert_eq!(engine.eval_in_code_system(&in_system, &mut ctx).unwrap(), CqlValue::Boolean(true));
    }

    #[test]
    fn test_calculate_age() {
        let engine = CqlEngine::new();
        let mut ctx = context();
        let age = |birth: &str| CalculateAgeExpression {
            element: Element::default(),
            operand: Box::new(date(birth)),
            precision: DateTimePrecision::Year,
        };
        assert_eq!(engine.eval_calculate_age(&age("2000-06-15"), &mut ctx).unwrap(), CqlValue::Integer(24));
        assert_eq!(engine.eval_calculate_age(&age("2000-06-16"), &mut ctx).unwrap(), CqlValue::Integer(23));
        // A year-only birth date counts by year number alone
        assert_eq!(engine.eval_calculate_age(&age("2000"), &mut ctx).unwrap(), CqlValue::Integer(24));

        let at = CalculateAgeAtExpression {
            element: Element::default(),
            operand: vec![date("2000-01-31"), date("2000-03-30")],
            precision: DateTimePrecision::Month,
        };
        assert_eq!(engine.eval_calculate_age_at(&at, &mut ctx).unwrap(), CqlValue::Integer(1));
        assert_eq!(ctx.today(), CqlDate::new(2024, 6, 15));
    }

    #[test]
    fn test_quantity_literal() {
        let engine = CqlEngine::new();
        let quantity = QuantityExpression {
            element: Element::default(),
            value: Some(Decimal::new(5, 0)),
            unit: Some("mg".to_string()),
        };
        assert_eq!(
            engine.eval_quantity(&quantity).unwrap(),
            CqlValue::Quantity(CqlQuantity::new(Decimal::new(5, 0), "mg"))
        );
        let empty = QuantityExpression {
            element: Element::default(),
            value: None,
            unit: None,
        };
        assert_eq!(engine.eval_quantity(&empty).unwrap(), CqlValue::Null);
    }
}
