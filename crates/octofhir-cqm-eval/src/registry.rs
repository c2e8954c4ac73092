//! Built-in function registry
//!
//! Maps function names to native implementations that `FunctionRef`
//! expressions fall back to when no library defines the function. The
//! default registry carries the FHIRHelpers conversions, so libraries that
//! include `FHIRHelpers` evaluate without the helper library in the pool.

use crate::error::{EvalError, EvalResult};
use crate::operators::{
    to_boolean, to_code, to_concept, to_date, to_datetime, to_decimal, to_integer, to_interval, to_quantity,
    to_string,
};
use octofhir_cqm_types::CqlValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Native function implementation
pub type BuiltinFn = Arc<dyn Fn(&[CqlValue]) -> EvalResult<CqlValue> + Send + Sync>;

/// A registered function overload
#[derive(Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub arity: usize,
    pub implementation: BuiltinFn,
}

impl std::fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Registry of built-in functions, keyed by name then arity
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Vec<FunctionDefinition>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the FHIRHelpers conversion functions
    pub fn with_fhir_helpers() -> Self {
        let mut registry = Self::new();
        registry.register_fhir_helpers();
        registry
    }

    pub fn register_fhir_helpers(&mut self) {
        let conversions: [(&str, fn(&CqlValue) -> EvalResult<CqlValue>); 10] = [
            ("ToString", to_string),
            ("ToBoolean", to_boolean),
            ("ToInteger", to_integer),
            ("ToDecimal", to_decimal),
            ("ToDate", to_date),
            ("ToDateTime", to_datetime),
            ("ToQuantity", to_quantity),
            ("ToCode", to_code),
            ("ToConcept", to_concept),
            ("ToInterval", to_interval),
        ];
        for (name, convert) in conversions {
            self.register_unary(name, convert);
        }
    }

    /// Register a one-argument function
    pub fn register_unary(&mut self, name: impl Into<String>, f: fn(&CqlValue) -> EvalResult<CqlValue>) {
        let name = name.into();
        let label = name.clone();
        self.register(
            name,
            1,
            Arc::new(move |args: &[CqlValue]| match args {
                [value] => f(value),
                _ => Err(EvalError::invalid_operand(label.as_str(), "expected one argument")),
            }),
        );
    }

    /// Register an overload; a later registration with the same arity wins
    pub fn register(&mut self, name: impl Into<String>, arity: usize, implementation: BuiltinFn) {
        let name = name.into();
        let overloads = self.functions.entry(name.clone()).or_default();
        overloads.retain(|def| def.arity != arity);
        overloads.push(FunctionDefinition {
            name,
            arity,
            implementation,
        });
    }

    pub fn get(&self, name: &str, arity: usize) -> Option<&FunctionDefinition> {
        self.functions.get(name)?.iter().find(|def| def.arity == arity)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Call a function by name; `None` when no overload takes this many arguments
    pub fn call(&self, name: &str, args: &[CqlValue]) -> Option<EvalResult<CqlValue>> {
        let def = self.get(name, args.len())?;
        log::trace!("calling built-in {}/{}", name, def.arity);
        Some((def.implementation)(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_types::{CqlCode, CqlConcept, CqlQuantity};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn test_fhir_helpers() {
        let registry = FunctionRegistry::with_fhir_helpers();
        assert_eq!(
            registry.call("ToInteger", &[CqlValue::string("12")]).unwrap().unwrap(),
            CqlValue::Integer(12)
        );
        assert_eq!(
            registry.call("ToQuantity", &[CqlValue::Integer(3)]).unwrap().unwrap(),
            CqlValue::Quantity(CqlQuantity::unitless(Decimal::from(3)))
        );
        let code = CqlCode::simple("8480-6", "http://loinc.org");
        assert_eq!(
            registry.call("ToConcept", &[CqlValue::Code(code.clone())]).unwrap().unwrap(),
            CqlValue::Concept(CqlConcept::from_code(code))
        );
        assert!(registry.call("ToInteger", &[]).is_none());
        assert!(registry.call("Nope", &[CqlValue::Null]).is_none());
    }

    #[test]
    fn test_register_replaces_same_arity() {
        let mut registry = FunctionRegistry::new();
        registry.register("Answer", 0, Arc::new(|_: &[CqlValue]| Ok(CqlValue::Integer(1))));
        registry.register("Answer", 0, Arc::new(|_: &[CqlValue]| Ok(CqlValue::Integer(42))));
        registry.register("Answer", 1, Arc::new(|args: &[CqlValue]| Ok(args[0].clone())));
        assert_eq!(registry.call("Answer", &[]).unwrap().unwrap(), CqlValue::Integer(42));
        assert_eq!(
            registry.call("Answer", &[CqlValue::boolean(true)]).unwrap().unwrap(),
            CqlValue::Boolean(true)
        );
    }
}
