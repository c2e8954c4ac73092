//! Type Operators
//!
//! Implements: As, Is, ToBoolean, ToConcept, ToDate, ToDateTime, ToDecimal,
//! ToInteger, ToString
//!
//! Model type names are resolved through the context's type resolver so that
//! resources match their base types. FHIR primitive and common complex types
//! map onto the runtime values the converter produces for them.

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use octofhir_cqm_elm::{AsExpression, IsExpression, TypeSpecifier, UnaryExpression};
use octofhir_cqm_model::{TypeKind, TypeResolver};
use octofhir_cqm_types::{CqlCode, CqlConcept, CqlDate, CqlDateTime, CqlQuantity, CqlValue};
use rust_decimal::Decimal;
use std::str::FromStr;

const SYSTEM_NAMESPACE: &str = "{urn:hl7-org:elm-types:r1}";

impl CqlEngine {
    /// Evaluate As: the operand when it is of the type, otherwise null
    /// (or a conversion error when strict)
    pub fn eval_as(&self, expr: &AsExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let value = self.evaluate(&expr.operand, ctx)?;
        if value.is_null() {
            return Ok(CqlValue::Null);
        }
        let target = type_target(expr.as_type.as_deref(), expr.as_type_specifier.as_ref())?;
        let resolver = ctx.type_resolver().map(|r| &**r);
        if value_is(&value, &target, resolver)? {
            return Ok(value);
        }
        if expr.strict == Some(true) {
            return Err(EvalError::conversion_error(value.type_name(), target.display()));
        }
        Ok(CqlValue::Null)
    }

    /// Evaluate Is; null is of no type
    pub fn eval_is(&self, expr: &IsExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let value = self.evaluate(&expr.operand, ctx)?;
        let target = type_target(expr.is_type.as_deref(), expr.is_type_specifier.as_ref())?;
        if value.is_null() {
            return Ok(CqlValue::Boolean(false));
        }
        let resolver = ctx.type_resolver().map(|r| &**r);
        Ok(CqlValue::Boolean(value_is(&value, &target, resolver)?))
    }

    pub fn eval_to_boolean(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_boolean)
    }

    pub fn eval_to_concept(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_concept)
    }

    pub fn eval_to_date(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_date)
    }

    pub fn eval_to_datetime(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_datetime)
    }

    pub fn eval_to_decimal(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_decimal)
    }

    pub fn eval_to_integer(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_integer)
    }

    pub fn eval_to_string(&self, expr: &UnaryExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        self.eval_conversion(expr, ctx, to_string)
    }

    fn eval_conversion(
        &self,
        expr: &UnaryExpression,
        ctx: &mut EvaluationContext,
        convert: fn(&CqlValue) -> EvalResult<CqlValue>,
    ) -> EvalResult<CqlValue> {
        let value = self.evaluate(&expr.operand, ctx)?;
        convert(&value)
    }
}

// ============================================================================
// Type tests
// ============================================================================

/// The type an As or Is expression tests against
#[derive(Debug, Clone)]
pub enum TypeTarget {
    Named(String),
    List(Box<TypeTarget>),
    Interval(Box<TypeTarget>),
    Tuple,
    Choice(Vec<TypeTarget>),
}

impl TypeTarget {
    fn from_specifier(spec: &TypeSpecifier) -> Self {
        match spec {
            TypeSpecifier::Named(named) => Self::Named(match &named.namespace {
                Some(namespace) if !named.name.starts_with('{') => format!("{{{}}}{}", namespace, named.name),
                _ => named.name.clone(),
            }),
            TypeSpecifier::List(list) => Self::List(Box::new(Self::from_specifier(&list.element_type))),
            TypeSpecifier::Interval(interval) => Self::Interval(Box::new(Self::from_specifier(&interval.point_type))),
            TypeSpecifier::Tuple(_) => Self::Tuple,
            TypeSpecifier::Choice(choice) => Self::Choice(choice.choice.iter().map(Self::from_specifier).collect()),
        }
    }

    fn display(&self) -> String {
        match self {
            Self::Named(name) => simple_name(name).to_string(),
            Self::List(element) => format!("List<{}>", element.display()),
            Self::Interval(point) => format!("Interval<{}>", point.display()),
            Self::Tuple => "Tuple".to_string(),
            Self::Choice(choices) => {
                let names: Vec<String> = choices.iter().map(Self::display).collect();
                format!("Choice<{}>", names.join(", "))
            }
        }
    }
}

fn type_target(name: Option<&str>, spec: Option<&TypeSpecifier>) -> EvalResult<TypeTarget> {
    match (spec, name) {
        (Some(spec), _) => Ok(TypeTarget::from_specifier(spec)),
        (None, Some(name)) => Ok(TypeTarget::Named(name.to_string())),
        (None, None) => Err(EvalError::internal("type operator without a target type")),
    }
}

/// Name without its `{uri}` or model qualifier
fn simple_name(name: &str) -> &str {
    let name = name.rsplit('}').next().unwrap_or(name);
    name.strip_prefix("FHIR.")
        .or_else(|| name.strip_prefix("System."))
        .unwrap_or(name)
}

fn is_system_name(name: &str) -> bool {
    name.starts_with(SYSTEM_NAMESPACE) || name.starts_with("System.")
}

/// Runtime type a FHIR primitive or complex type converts to
fn fhir_runtime_type(name: &str) -> Option<&'static str> {
    Some(match name {
        "boolean" => "Boolean",
        "integer" | "positiveInt" | "unsignedInt" => "Integer",
        "decimal" => "Decimal",
        "string" | "code" | "id" | "uri" | "url" | "canonical" | "markdown" | "oid" | "uuid" | "base64Binary"
        | "time" | "xhtml" => "String",
        "date" => "Date",
        "dateTime" | "instant" => "DateTime",
        "Coding" => "Code",
        "CodeableConcept" => "Concept",
        "Quantity" | "SimpleQuantity" | "Age" | "Duration" | "Distance" | "Count" => "Quantity",
        "Period" | "Range" => "Interval",
        _ => return None,
    })
}

/// Whether a non-null value is of the target type
pub fn value_is(value: &CqlValue, target: &TypeTarget, resolver: Option<&dyn TypeResolver>) -> EvalResult<bool> {
    match target {
        TypeTarget::Named(name) => is_named(value, name, resolver),
        TypeTarget::List(element) => match value {
            CqlValue::List(list) => {
                for item in list.iter().filter(|v| !v.is_null()) {
                    if !value_is(item, element, resolver)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        },
        TypeTarget::Interval(point) => match value {
            CqlValue::Interval(interval) => {
                for bound in [interval.low(), interval.high()].into_iter().flatten() {
                    if !value_is(bound, point, resolver)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        },
        TypeTarget::Tuple => Ok(matches!(value, CqlValue::Tuple(_))),
        TypeTarget::Choice(choices) => {
            for choice in choices {
                if value_is(value, choice, resolver)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn is_named(value: &CqlValue, name: &str, resolver: Option<&dyn TypeResolver>) -> EvalResult<bool> {
    let simple = simple_name(name);
    if is_system_name(name) {
        return Ok(simple == "Any" || value.type_name() == simple);
    }
    if let Some(runtime) = fhir_runtime_type(simple) {
        return Ok(value.type_name() == runtime);
    }

    let Some(resolver) = resolver else {
        return Ok(matches!(value, CqlValue::Resource(r) if r.resource_type == simple));
    };
    let target = resolver.resolve_type(name)?;

    match value {
        CqlValue::Resource(resource) => {
            let mut current = resource.resource_type.clone();
            loop {
                if current == target.name {
                    return Ok(true);
                }
                match resolver.resolve_type(&current).ok().and_then(|d| d.base_type.clone()) {
                    Some(base) => current = simple_name(&base).to_string(),
                    None => return Ok(false),
                }
            }
        }
        // Structural values carry no type name of their own
        CqlValue::Tuple(_) => Ok(matches!(target.kind, TypeKind::Complex | TypeKind::Backbone)),
        _ => Ok(false),
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Convert to Boolean; unrecognized strings are null
pub fn to_boolean(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Boolean(b) => CqlValue::Boolean(*b),
        CqlValue::String(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => CqlValue::Boolean(true),
            "false" | "f" | "no" | "n" | "0" => CqlValue::Boolean(false),
            _ => CqlValue::Null,
        },
        CqlValue::Integer(1) => CqlValue::Boolean(true),
        CqlValue::Integer(0) => CqlValue::Boolean(false),
        CqlValue::Decimal(d) if *d == Decimal::ONE => CqlValue::Boolean(true),
        CqlValue::Decimal(d) if d.is_zero() => CqlValue::Boolean(false),
        CqlValue::Integer(_) | CqlValue::Decimal(_) => CqlValue::Null,
        other => return Err(EvalError::conversion_error(other.type_name(), "Boolean")),
    })
}

/// Convert to Integer; unparsable strings are null
pub fn to_integer(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Integer(i) => CqlValue::Integer(*i),
        CqlValue::Boolean(b) => CqlValue::Integer(i32::from(*b)),
        CqlValue::String(s) => s.trim().parse::<i32>().map_or(CqlValue::Null, CqlValue::Integer),
        other => return Err(EvalError::conversion_error(other.type_name(), "Integer")),
    })
}

/// Convert to Decimal; unparsable strings are null
pub fn to_decimal(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Integer(_) | CqlValue::Decimal(_) => value.as_decimal().map_or(CqlValue::Null, CqlValue::Decimal),
        CqlValue::Boolean(b) => CqlValue::Decimal(if *b { Decimal::ONE } else { Decimal::ZERO }),
        CqlValue::String(s) => Decimal::from_str(s.trim()).map_or(CqlValue::Null, CqlValue::Decimal),
        other => return Err(EvalError::conversion_error(other.type_name(), "Decimal")),
    })
}

/// Convert to String
pub fn to_string(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::String(s) => CqlValue::String(s.clone()),
        CqlValue::Code(code) => CqlValue::String(code.code.clone()),
        CqlValue::Boolean(_)
        | CqlValue::Integer(_)
        | CqlValue::Decimal(_)
        | CqlValue::Date(_)
        | CqlValue::DateTime(_)
        | CqlValue::Quantity(_) => CqlValue::String(value.to_string()),
        other => return Err(EvalError::conversion_error(other.type_name(), "String")),
    })
}

/// Convert to Date; a DateTime keeps its date part
pub fn to_date(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Date(d) => CqlValue::Date(d.clone()),
        CqlValue::DateTime(dt) => CqlValue::Date(dt.date()),
        CqlValue::String(s) => CqlDate::parse(s)
            .or_else(|| CqlDateTime::parse(s).map(|dt| dt.date()))
            .map_or(CqlValue::Null, CqlValue::Date),
        other => return Err(EvalError::conversion_error(other.type_name(), "Date")),
    })
}

/// Convert to DateTime; a Date keeps its precision
pub fn to_datetime(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::DateTime(dt) => CqlValue::DateTime(dt.clone()),
        CqlValue::Date(d) => CqlValue::DateTime(CqlDateTime::from_date(d)),
        CqlValue::String(s) => CqlDateTime::parse(s).map_or(CqlValue::Null, CqlValue::DateTime),
        other => return Err(EvalError::conversion_error(other.type_name(), "DateTime")),
    })
}

/// Convert to Concept; a list of codes becomes one concept
pub fn to_concept(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Concept(c) => CqlValue::Concept(c.clone()),
        CqlValue::Code(code) => CqlValue::Concept(CqlConcept::from_code(code.clone())),
        CqlValue::List(list) => {
            let mut codes = Vec::with_capacity(list.len());
            for item in list.iter() {
                match item {
                    CqlValue::Code(code) => codes.push(code.clone()),
                    CqlValue::Null => {}
                    other => return Err(EvalError::conversion_error(other.type_name(), "Concept")),
                }
            }
            CqlValue::Concept(CqlConcept::new(codes, None::<String>))
        }
        other => return Err(EvalError::conversion_error(other.type_name(), "Concept")),
    })
}

/// Convert to Quantity; plain numbers become unitless quantities
pub fn to_quantity(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Quantity(q) => CqlValue::Quantity(q.clone()),
        CqlValue::Integer(_) | CqlValue::Decimal(_) => value
            .as_decimal()
            .map_or(CqlValue::Null, |d| CqlValue::Quantity(CqlQuantity::unitless(d))),
        other => return Err(EvalError::conversion_error(other.type_name(), "Quantity")),
    })
}

/// Convert to Code
pub fn to_code(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Code(code) => CqlValue::Code(code.clone()),
        CqlValue::Tuple(tuple) => match (tuple.get("code"), tuple.get("system")) {
            (Some(CqlValue::String(code)), system) => CqlValue::Code(CqlCode::new(
                code.clone(),
                system.and_then(CqlValue::as_string).unwrap_or_default(),
                tuple.get("version").and_then(CqlValue::as_string),
                tuple.get("display").and_then(CqlValue::as_string),
            )),
            _ => CqlValue::Null,
        },
        other => return Err(EvalError::conversion_error(other.type_name(), "Code")),
    })
}

/// Convert to Interval; Period and Range values already are intervals
pub fn to_interval(value: &CqlValue) -> EvalResult<CqlValue> {
    Ok(match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Interval(i) => CqlValue::Interval(i.clone()),
        other => return Err(EvalError::conversion_error(other.type_name(), "Interval")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_model::{ResourceBundle, fhir_r4_resolver};
    use octofhir_cqm_types::{CqlTuple, FhirResource};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;

    fn patient() -> CqlValue {
        CqlValue::Resource(Arc::new(FhirResource {
            resource_type: "Patient".to_string(),
            id: Some("p1".to_string()),
            fields: CqlTuple::new(),
            source: Arc::new(json!({"resourceType": "Patient", "id": "p1"})),
        }))
    }

    #[test]
    fn test_resource_matches_base_types() {
        let resolver = fhir_r4_resolver().unwrap();
        let target = |name: &str| TypeTarget::Named(name.to_string());
        assert!(value_is(&patient(), &target("{http://hl7.org/fhir}Patient"), Some(&resolver)).unwrap());
        assert!(value_is(&patient(), &target("FHIR.DomainResource"), Some(&resolver)).unwrap());
        assert!(!value_is(&patient(), &target("{http://hl7.org/fhir}Observation"), Some(&resolver)).unwrap());

        let err = value_is(&patient(), &target("{http://hl7.org/fhir}Spaceship"), Some(&resolver)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TypeResolution);
    }

    #[test]
    fn test_primitive_and_system_types() {
        let resolver = fhir_r4_resolver().unwrap();
        let code = TypeTarget::Named("{http://hl7.org/fhir}code".to_string());
        assert!(value_is(&CqlValue::string("final"), &code, Some(&resolver)).unwrap());
        let integer = TypeTarget::Named("{urn:hl7-org:elm-types:r1}Integer".to_string());
        assert!(value_is(&CqlValue::Integer(1), &integer, None).unwrap());
        assert!(!value_is(&CqlValue::string("1"), &integer, None).unwrap());
        let list = TypeTarget::List(Box::new(integer));
        assert!(value_is(&CqlValue::list([CqlValue::Integer(1), CqlValue::Null]), &list, None).unwrap());
    }

    #[test]
    fn test_converted_bundle_values() {
        let resolver = fhir_r4_resolver().unwrap();
        let bundle = ResourceBundle::from_value(
            &json!({"resourceType": "Bundle", "entry": [{"resource": {
                "resourceType": "Observation", "id": "o1", "status": "final",
                "valueQuantity": {"value": 7.2, "unit": "%"}
            }}]}),
            &resolver,
        )
        .unwrap();
        let observation = CqlValue::Resource(bundle.resources()[0].clone());
        let value = crate::engine::property_path(&observation, "value");
        let quantity = TypeTarget::Named("{http://hl7.org/fhir}Quantity".to_string());
        assert!(value_is(&value, &quantity, Some(&resolver)).unwrap());
    }

    #[rstest]
    #[case(CqlValue::string("yes"), CqlValue::Boolean(true))]
    #[case(CqlValue::string("maybe"), CqlValue::Null)]
    #[case(CqlValue::Integer(0), CqlValue::Boolean(false))]
    fn test_to_boolean(#[case] input: CqlValue, #[case] expected: CqlValue) {
        assert_eq!(to_boolean(&input).unwrap(), expected);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(to_integer(&CqlValue::string(" 42 ")).unwrap(), CqlValue::Integer(42));
        assert_eq!(to_integer(&CqlValue::string("4.2")).unwrap(), CqlValue::Null);
        assert_eq!(to_decimal(&CqlValue::Integer(3)).unwrap(), CqlValue::Decimal(Decimal::from(3)));
        assert_eq!(
            to_date(&CqlValue::string("2024-02-03T10:00:00Z")).unwrap(),
            CqlValue::Date(CqlDate::new(2024, 2, 3))
        );
        assert_eq!(to_string(&CqlValue::Integer(7)).unwrap(), CqlValue::string("7"));
        assert!(to_integer(&CqlValue::Date(CqlDate::new(2024, 1, 1))).is_err());
    }
}
