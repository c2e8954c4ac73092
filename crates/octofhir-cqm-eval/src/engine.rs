//! Evaluation engine
//!
//! [`CqlEngine`] walks ELM expression trees against an [`EvaluationContext`].
//! The engine itself is stateless; operator implementations live in
//! `operators/*` and `query.rs` as further `impl CqlEngine` blocks.

use crate::context::EvaluationContext;
use crate::error::{EvalError, EvalResult};
use crate::library::{FHIR_HELPERS, LibraryRef};
use crate::registry::FunctionRegistry;
use indexmap::IndexMap;
use octofhir_cqm_elm::{
    AliasRef, CodeRef, CodeSystemRef, ConceptRef, Expression, ExpressionDef, ExpressionRef, FunctionRef,
    IdentifierRef, Library, Literal, OperandRef, ParameterRef, Property, QueryLetRef, TupleExpression,
    ValueSetRef,
};
use octofhir_cqm_types::{CqlCode, CqlConcept, CqlDate, CqlDateTime, CqlList, CqlTuple, CqlValue};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Contexts whose definitions see every record regardless of the subject
const UNFILTERED_CONTEXTS: [&str; 2] = ["Unfiltered", "Population"];

/// The expression evaluation engine
pub struct CqlEngine {
    functions: FunctionRegistry,
}

impl Default for CqlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CqlEngine {
    /// Create an engine with the built-in helper functions
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::with_fhir_helpers(),
        }
    }

    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Evaluate every public expression definition of the primary library
    /// that belongs to the context's type
    pub fn evaluate_library(&self, ctx: &mut EvaluationContext) -> EvalResult<IndexMap<String, CqlValue>> {
        let library = ctx
            .libraries()
            .map(|set| Arc::clone(set.main()))
            .ok_or_else(|| EvalError::internal("no library loaded in context"))?;
        let names = public_definitions(&library, &ctx.binding().context_type);
        let mut results = IndexMap::new();
        for name in names {
            let value = self.evaluate_definition(library.name(), &name, ctx)?;
            results.insert(name, value);
        }
        Ok(results)
    }

    /// Evaluate a named expression definition, caching the result per context
    pub fn evaluate_definition(
        &self,
        library_name: &str,
        name: &str,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let cache_key = format!("{}:{}", library_name, name);
        if let Some(cached) = ctx.get_cached(&cache_key) {
            return Ok(cached);
        }

        let library = ctx
            .libraries()
            .and_then(|set| set.get(library_name))
            .ok_or_else(|| EvalError::library_not_found(library_name, None))?;
        let def = library
            .expression(name)
            .ok_or_else(|| EvalError::expression_not_found(library_name, name))?;
        let expr = def
            .expression
            .as_deref()
            .ok_or_else(|| EvalError::expression_not_found(library_name, name))?;

        let switch = def
            .context
            .as_deref()
            .is_some_and(|c| UNFILTERED_CONTEXTS.contains(&c))
            && !ctx.binding().is_unfiltered();
        let saved = switch.then(|| ctx.replace_binding(crate::context::ContextBinding::unfiltered()));

        ctx.push_library(library_name);
        let result = ctx.with_isolated_scopes(|ctx| self.evaluate(expr, ctx));
        ctx.pop_library();
        if let Some(saved) = saved {
            ctx.replace_binding(saved);
        }

        let value = result?;
        ctx.cache_result(cache_key, value.clone());
        Ok(value)
    }

    /// Main expression evaluation dispatcher
    pub fn evaluate(&self, expr: &Expression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        if !ctx.enter_recursion() {
            return Err(EvalError::RecursionLimit);
        }

        let result = match expr {
            // === Literals ===
            Expression::Null(_) => Ok(CqlValue::Null),
            Expression::Literal(lit) => self.eval_literal(lit),

            // === References ===
            Expression::ExpressionRef(r) => self.eval_expression_ref(r, ctx),
            Expression::FunctionRef(r) => self.eval_function_ref(r, ctx),
            Expression::ParameterRef(r) => self.eval_parameter_ref(r, ctx),
            Expression::ValueSetRef(r) => self.eval_valueset_ref(r, ctx),
            Expression::CodeSystemRef(r) => self.eval_codesystem_ref(r, ctx),
            Expression::CodeRef(r) => self.eval_code_ref(r, ctx),
            Expression::ConceptRef(r) => self.eval_concept_ref(r, ctx),
            Expression::OperandRef(r) => self.eval_operand_ref(r, ctx),
            Expression::AliasRef(r) => self.eval_alias_ref(r, ctx),
            Expression::QueryLetRef(r) => self.eval_query_let_ref(r, ctx),
            Expression::IdentifierRef(r) => self.eval_identifier_ref(r, ctx),
            Expression::Property(p) => self.eval_property(p, ctx),

            // === Arithmetic ===
            Expression::Add(e) => self.eval_add(e, ctx),
            Expression::Subtract(e) => self.eval_subtract(e, ctx),
            Expression::Multiply(e) => self.eval_multiply(e, ctx),
            Expression::Divide(e) => self.eval_divide(e, ctx),
            Expression::Negate(e) => self.eval_negate(e, ctx),

            // === Comparison ===
            Expression::Equal(e) => self.eval_equal(e, ctx),
            Expression::Equivalent(e) => self.eval_equivalent(e, ctx),
            Expression::NotEqual(e) => self.eval_not_equal(e, ctx),
            Expression::Less(e) => self.eval_less(e, ctx),
            Expression::Greater(e) => self.eval_greater(e, ctx),
            Expression::LessOrEqual(e) => self.eval_less_or_equal(e, ctx),
            Expression::GreaterOrEqual(e) => self.eval_greater_or_equal(e, ctx),

            // === Logical ===
            Expression::And(e) => self.eval_and(e, ctx),
            Expression::Or(e) => self.eval_or(e, ctx),
            Expression::Xor(e) => self.eval_xor(e, ctx),
            Expression::Implies(e) => self.eval_implies(e, ctx),
            Expression::Not(e) => self.eval_not(e, ctx),

            // === Nullological ===
            Expression::IsNull(e) => self.eval_is_null(e, ctx),
            Expression::IsTrue(e) => self.eval_is_true(e, ctx),
            Expression::IsFalse(e) => self.eval_is_false(e, ctx),
            Expression::Coalesce(e) => self.eval_coalesce(e, ctx),
            Expression::If(e) => self.eval_if(e, ctx),
            Expression::Case(e) => self.eval_case(e, ctx),

            // === String ===
            Expression::Concatenate(e) => self.eval_concatenate(e, ctx),
            Expression::Upper(e) => self.eval_upper(e, ctx),
            Expression::Lower(e) => self.eval_lower(e, ctx),
            Expression::StartsWith(e) => self.eval_starts_with(e, ctx),
            Expression::EndsWith(e) => self.eval_ends_with(e, ctx),
            Expression::Matches(e) => self.eval_matches(e, ctx),

            // === DateTime ===
            Expression::Now(_) => Ok(CqlValue::DateTime(ctx.now())),
            Expression::Today(_) => Ok(CqlValue::Date(ctx.today())),
            Expression::Date(e) => self.eval_date(e, ctx),
            Expression::DateTime(e) => self.eval_datetime(e, ctx),
            Expression::DateFrom(e) => self.eval_date_from(e, ctx),
            Expression::DurationBetween(e) => self.eval_duration_between(e, ctx),
            Expression::DifferenceBetween(e) => self.eval_difference_between(e, ctx),
            Expression::SameOrBefore(e) => self.eval_same_or_before(e, ctx),
            Expression::SameOrAfter(e) => self.eval_same_or_after(e, ctx),

            // === Interval ===
            Expression::Interval(e) => self.eval_interval(e, ctx),
            Expression::Start(e) => self.eval_start(e, ctx),
            Expression::End(e) => self.eval_end(e, ctx),
            Expression::Contains(e) => self.eval_contains(e, ctx),
            Expression::In(e) => self.eval_in(e, ctx),
            Expression::Includes(e) => self.eval_includes(e, ctx),
            Expression::IncludedIn(e) => self.eval_included_in(e, ctx),
            Expression::Before(e) => self.eval_before(e, ctx),
            Expression::After(e) => self.eval_after(e, ctx),
            Expression::Overlaps(e) => self.eval_overlaps(e, ctx),
            Expression::Union(e) => self.eval_union(e, ctx),
            Expression::Intersect(e) => self.eval_intersect(e, ctx),
            Expression::Except(e) => self.eval_except(e, ctx),

            // === List ===
            Expression::List(e) => self.eval_list(e, ctx),
            Expression::Exists(e) => self.eval_exists(e, ctx),
            Expression::First(e) => self.eval_first(e, ctx),
            Expression::Last(e) => self.eval_last(e, ctx),
            Expression::Flatten(e) => self.eval_flatten(e, ctx),
            Expression::Distinct(e) => self.eval_distinct(e, ctx),
            Expression::SingletonFrom(e) => self.eval_singleton_from(e, ctx),
            Expression::ToList(e) => self.eval_to_list(e, ctx),

            // === Aggregate ===
            Expression::Count(e) => self.eval_count(e, ctx),
            Expression::AllTrue(e) => self.eval_all_true(e, ctx),
            Expression::AnyTrue(e) => self.eval_any_true(e, ctx),

            // === Type Operations ===
            Expression::As(e) => self.eval_as(e, ctx),
            Expression::Is(e) => self.eval_is(e, ctx),
            Expression::ToBoolean(e) => self.eval_to_boolean(e, ctx),
            Expression::ToConcept(e) => self.eval_to_concept(e, ctx),
            Expression::ToDate(e) => self.eval_to_date(e, ctx),
            Expression::ToDateTime(e) => self.eval_to_datetime(e, ctx),
            Expression::ToDecimal(e) => self.eval_to_decimal(e, ctx),
            Expression::ToInteger(e) => self.eval_to_integer(e, ctx),
            Expression::ToString(e) => self.eval_to_string(e, ctx),

            // === Clinical ===
            Expression::Code(e) => self.eval_code_literal(e, ctx),
            Expression::Concept(e) => self.eval_concept_literal(e, ctx),
            Expression::Quantity(e) => self.eval_quantity(e),
            Expression::InCodeSystem(e) => self.eval_in_code_system(e, ctx),
            Expression::InValueSet(e) => self.eval_in_value_set(e, ctx),
            Expression::AnyInValueSet(e) => self.eval_any_in_value_set(e, ctx),
            Expression::CalculateAge(e) => self.eval_calculate_age(e, ctx),
            Expression::CalculateAgeAt(e) => self.eval_calculate_age_at(e, ctx),

            // === Query ===
            Expression::Query(q) => self.eval_query(q, ctx),
            Expression::Retrieve(r) => self.eval_retrieve(r, ctx),

            // === Tuple ===
            Expression::Tuple(t) => self.eval_tuple(t, ctx),

            Expression::Unsupported => Err(EvalError::unsupported_expression(expr.type_name())),
        };

        ctx.exit_recursion();
        result
    }

    // =========================================================================
    // Literal evaluation
    // =========================================================================

    fn eval_literal(&self, lit: &Literal) -> EvalResult<CqlValue> {
        let Some(value) = lit.value.as_deref() else {
            return Ok(CqlValue::Null);
        };
        let simple_type = lit.value_type.rsplit('}').next().unwrap_or(&lit.value_type);

        match simple_type {
            "Boolean" => value
                .parse::<bool>()
                .map(CqlValue::Boolean)
                .map_err(|_| EvalError::conversion_error(value, "Boolean")),
            "Integer" => value
                .parse::<i32>()
                .map(CqlValue::Integer)
                .map_err(|_| EvalError::conversion_error(value, "Integer")),
            "Decimal" => Decimal::from_str(value)
                .map(CqlValue::Decimal)
                .map_err(|_| EvalError::conversion_error(value, "Decimal")),
            "String" => Ok(CqlValue::String(value.to_string())),
            "Date" => CqlDate::parse(value)
                .map(CqlValue::Date)
                .ok_or_else(|| EvalError::conversion_error(value, "Date")),
            "DateTime" => CqlDateTime::parse(value)
                .map(CqlValue::DateTime)
                .ok_or_else(|| EvalError::conversion_error(value, "DateTime")),
            _ => Err(EvalError::unsupported_expression(format!("Literal of type {}", lit.value_type))),
        }
    }

    fn eval_tuple(&self, expr: &TupleExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let mut tuple = CqlTuple::new();
        for element in &expr.elements {
            let value = self.evaluate(&element.value, ctx)?;
            tuple.set(element.name.clone(), value);
        }
        Ok(CqlValue::Tuple(tuple))
    }

    // =========================================================================
    // Library-relative lookups
    // =========================================================================

    /// Library an include alias refers to, relative to `owner`
    pub(crate) fn library_relative(
        &self,
        owner: &Arc<Library>,
        alias: Option<&str>,
        ctx: &EvaluationContext,
    ) -> EvalResult<LibraryRef> {
        match alias {
            None => Ok(LibraryRef::Loaded(Arc::clone(owner))),
            Some(alias) => ctx
                .libraries()
                .ok_or_else(|| EvalError::internal("no library loaded in context"))?
                .resolve_alias(owner.name(), alias),
        }
    }

    /// Library an include alias refers to, relative to the current library
    pub(crate) fn library_for(&self, alias: Option<&str>, ctx: &EvaluationContext) -> EvalResult<LibraryRef> {
        let current = ctx.current_library()?;
        self.library_relative(&current, alias, ctx)
    }

    fn loaded_library(&self, owner: &Arc<Library>, alias: Option<&str>, ctx: &EvaluationContext) -> EvalResult<Arc<Library>> {
        match self.library_relative(owner, alias, ctx)? {
            LibraryRef::Loaded(library) => Ok(library),
            LibraryRef::BuiltinHelpers => Err(EvalError::library_not_found(FHIR_HELPERS, None)),
        }
    }

    /// Value-set id (canonical URL) behind a value-set reference
    pub(crate) fn value_set_id(&self, r: &ValueSetRef, ctx: &EvaluationContext) -> EvalResult<String> {
        let current = ctx.current_library()?;
        let library = self.loaded_library(&current, r.library_name.as_deref(), ctx)?;
        let def = library.value_set(&r.name).ok_or_else(|| EvalError::UndefinedDefinition {
            kind: "value set",
            name: r.name.clone(),
        })?;
        Ok(match &def.version {
            Some(version) => format!("{}|{}", def.id, version),
            None => def.id.clone(),
        })
    }

    /// Code-system id and version behind a code-system reference in `owner`
    pub(crate) fn code_system_id(
        &self,
        owner: &Arc<Library>,
        r: &CodeSystemRef,
        ctx: &EvaluationContext,
    ) -> EvalResult<(String, Option<String>)> {
        let library = self.loaded_library(owner, r.library_name.as_deref(), ctx)?;
        let def = library.code_system(&r.name).ok_or_else(|| EvalError::UndefinedDefinition {
            kind: "code system",
            name: r.name.clone(),
        })?;
        Ok((def.id.clone(), def.version.clone()))
    }

    fn code_from_def(&self, owner: &Arc<Library>, r: &CodeRef, ctx: &EvaluationContext) -> EvalResult<CqlCode> {
        let library = self.loaded_library(owner, r.library_name.as_deref(), ctx)?;
        let def = library.code(&r.name).ok_or_else(|| EvalError::UndefinedDefinition {
            kind: "code",
            name: r.name.clone(),
        })?;
        let (system, version) = self.code_system_id(&library, &def.code_system, ctx)?;
        Ok(CqlCode::new(def.id.clone(), system, version, def.display.clone()))
    }

    // =========================================================================
    // Reference evaluation
    // =========================================================================

    fn eval_expression_ref(&self, r: &ExpressionRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match self.library_for(r.library_name.as_deref(), ctx)? {
            LibraryRef::Loaded(library) => self.evaluate_definition(library.name(), &r.name, ctx),
            LibraryRef::BuiltinHelpers => Err(EvalError::expression_not_found(FHIR_HELPERS, &r.name)),
        }
    }

    fn eval_function_ref(&self, r: &FunctionRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let args = r
            .operand
            .iter()
            .map(|op| self.evaluate(op, ctx))
            .collect::<EvalResult<Vec<_>>>()?;

        if let LibraryRef::Loaded(library) = self.library_for(r.library_name.as_deref(), ctx)? {
            if let Some(def) = select_overload(&library, &r.name, &args) {
                return self.invoke_function(&library, def, args, ctx);
            }
        }

        self.functions
            .call(&r.name, &args)
            .unwrap_or_else(|| Err(EvalError::undefined_function(&r.name)))
    }

    fn invoke_function(
        &self,
        library: &Arc<Library>,
        def: &ExpressionDef,
        args: Vec<CqlValue>,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let body = def
            .expression
            .as_deref()
            .ok_or_else(|| EvalError::undefined_function(&def.name))?;

        ctx.push_library(library.name());
        let result = ctx.with_isolated_scopes(|ctx| {
            ctx.push_scope();
            for (operand, value) in def.operands().iter().zip(args) {
                ctx.set_operand(operand.name.clone(), value);
            }
            self.evaluate(body, ctx)
        });
        ctx.pop_library();
        result
    }

    fn eval_parameter_ref(&self, r: &ParameterRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let library = match self.library_for(r.library_name.as_deref(), ctx)? {
            LibraryRef::Loaded(library) => library,
            LibraryRef::BuiltinHelpers => return Err(EvalError::undefined_parameter(&r.name)),
        };
        if let Some(value) = ctx.get_parameter(library.name(), &r.name) {
            return Ok(value.clone());
        }

        let def = library
            .parameter(&r.name)
            .ok_or_else(|| EvalError::undefined_parameter(&r.name))?;
        let value = match def.default_expr.as_deref() {
            Some(default) => {
                ctx.push_library(library.name());
                let value = ctx.with_isolated_scopes(|ctx| self.evaluate(default, ctx));
                ctx.pop_library();
                value?
            }
            None => CqlValue::Null,
        };
        ctx.set_parameter(library.name(), &r.name, value.clone());
        Ok(value)
    }

    fn eval_operand_ref(&self, r: &OperandRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        ctx.get_operand(&r.name)
            .cloned()
            .ok_or_else(|| EvalError::undefined_identifier(&r.name))
    }

    fn eval_alias_ref(&self, r: &AliasRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        ctx.get_alias(&r.name)
            .cloned()
            .ok_or_else(|| EvalError::undefined_identifier(&r.name))
    }

    fn eval_query_let_ref(&self, r: &QueryLetRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        ctx.get_let(&r.name)
            .cloned()
            .ok_or_else(|| EvalError::undefined_identifier(&r.name))
    }

    /// Alias, let or operand; inside a sort expression, a property of the sorted element
    fn eval_identifier_ref(&self, r: &IdentifierRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        if let Some(value) = ctx
            .get_alias(&r.name)
            .or_else(|| ctx.get_let(&r.name))
            .or_else(|| ctx.get_operand(&r.name))
        {
            return Ok(value.clone());
        }
        if let Some(element) = ctx.get_alias(crate::query::SORT_ELEMENT_ALIAS) {
            return Ok(property_path(element, &r.name));
        }
        Err(EvalError::undefined_identifier(&r.name))
    }

    fn eval_property(&self, p: &Property, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = if let Some(source) = &p.source {
            self.evaluate(source, ctx)?
        } else if let Some(scope) = &p.scope {
            ctx.get_alias(scope)
                .cloned()
                .ok_or_else(|| EvalError::undefined_identifier(scope))?
        } else {
            return Err(EvalError::invalid_operand("Property", "neither source nor scope given"));
        };
        Ok(property_path(&source, &p.path))
    }

    /// A value-set reference evaluates to its expansion
    fn eval_valueset_ref(&self, r: &ValueSetRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let id = self.value_set_id(r, ctx)?;
        let terminology = ctx
            .terminology()
            .ok_or_else(|| EvalError::terminology_not_found(id.as_str()))?;
        let codes = terminology.expand(&id)?;
        Ok(CqlValue::list(codes.into_iter().map(CqlValue::Code)))
    }

    fn eval_codesystem_ref(&self, r: &CodeSystemRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let current = ctx.current_library()?;
        let (id, version) = self.code_system_id(&current, r, ctx)?;
        Ok(CqlValue::Tuple(CqlTuple::from_elements([
            ("id", CqlValue::String(id)),
            ("version", version.map_or(CqlValue::Null, CqlValue::String)),
        ])))
    }

    fn eval_code_ref(&self, r: &CodeRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let current = ctx.current_library()?;
        Ok(CqlValue::Code(self.code_from_def(&current, r, ctx)?))
    }

    fn eval_concept_ref(&self, r: &ConceptRef, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let current = ctx.current_library()?;
        let library = self.loaded_library(&current, r.library_name.as_deref(), ctx)?;
        let def = library.concept(&r.name).ok_or_else(|| EvalError::UndefinedDefinition {
            kind: "concept",
            name: r.name.clone(),
        })?;
        let codes = def
            .code
            .iter()
            .map(|code| self.code_from_def(&library, code, ctx))
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(CqlValue::Concept(CqlConcept::new(codes, def.display.clone())))
    }
}

/// Names of the public, non-function definitions of a context.
/// Definitions without a context belong to every context.
pub fn public_definitions(library: &Library, context_type: &str) -> Vec<String> {
    library
        .statements()
        .iter()
        .filter(|def| !def.is_function() && def.is_public() && def.expression.is_some())
        .filter(|def| def.context.as_deref().is_none_or(|c| c == context_type))
        .map(|def| def.name.clone())
        .collect()
}

/// Pick the overload whose declared operand types fit the runtime arguments,
/// falling back to the first declared one
fn select_overload<'a>(library: &'a Library, name: &'a str, args: &[CqlValue]) -> Option<&'a ExpressionDef> {
    let mut candidates = library
        .functions(name, args.len())
        .filter(|def| def.external != Some(true));
    let first = candidates.next()?;
    if fits_operands(first, args) {
        return Some(first);
    }
    candidates.find(|def| fits_operands(def, args)).or(Some(first))
}

fn fits_operands(def: &ExpressionDef, args: &[CqlValue]) -> bool {
    def.operands().iter().zip(args).all(|(operand, arg)| {
        let declared = operand
            .operand_type_specifier
            .as_ref()
            .and_then(|spec| spec.named())
            .or(operand.operand_type.as_deref());
        match declared {
            Some(declared) => arg.is_null() || runtime_name_matches(arg, declared),
            None => true,
        }
    })
}

/// Loose runtime check used for overload selection only
fn runtime_name_matches(value: &CqlValue, declared: &str) -> bool {
    let simple = declared.rsplit(['}', '.']).next().unwrap_or(declared);
    match value {
        CqlValue::Resource(resource) => resource.resource_type == simple,
        CqlValue::List(_) | CqlValue::Tuple(_) => true,
        other => other.type_name().eq_ignore_ascii_case(simple) || !simple.starts_with(char::is_uppercase),
    }
}

/// Navigate a dotted property path
pub fn property_path(value: &CqlValue, path: &str) -> CqlValue {
    path.split('.')
        .fold(value.clone(), |current, segment| property_step(&current, segment))
}

/// One property navigation step.
///
/// Lists project the property over their elements (flattening nested lists
/// and dropping nulls); `value` on a primitive is the primitive itself;
/// absent properties are null.
pub fn property_step(value: &CqlValue, name: &str) -> CqlValue {
    match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Resource(resource) => match name {
            "resourceType" => CqlValue::String(resource.resource_type.clone()),
            "id" => resource
                .get("id")
                .cloned()
                .or_else(|| resource.id.clone().map(CqlValue::String))
                .unwrap_or(CqlValue::Null),
            _ => resource.get(name).cloned().unwrap_or(CqlValue::Null),
        },
        CqlValue::Tuple(tuple) => tuple.get(name).cloned().unwrap_or(CqlValue::Null),
        CqlValue::List(list) => {
            let mut projected = Vec::with_capacity(list.len());
            for element in list.iter() {
                match property_step(element, name) {
                    CqlValue::Null => {}
                    CqlValue::List(inner) => projected.extend(inner.elements),
                    other => projected.push(other),
                }
            }
            CqlValue::List(CqlList::from_elements(projected))
        }
        CqlValue::Code(code) => match name {
            "code" => CqlValue::String(code.code.clone()),
            "system" => CqlValue::String(code.system.clone()),
            "version" => code.version.clone().map_or(CqlValue::Null, CqlValue::String),
            "display" => code.display.clone().map_or(CqlValue::Null, CqlValue::String),
            _ => CqlValue::Null,
        },
        CqlValue::Concept(concept) => match name {
            "coding" | "codes" => CqlValue::list(concept.codes.iter().cloned().map(CqlValue::Code)),
            "text" | "display" => concept.display.clone().map_or(CqlValue::Null, CqlValue::String),
            _ => CqlValue::Null,
        },
        CqlValue::Quantity(quantity) => match name {
            "value" => CqlValue::Decimal(quantity.value),
            "unit" | "code" => quantity.unit.clone().map_or(CqlValue::Null, CqlValue::String),
            _ => CqlValue::Null,
        },
        CqlValue::Interval(interval) => match name {
            "start" | "low" => interval.low().cloned().unwrap_or(CqlValue::Null),
            "end" | "high" => interval.high().cloned().unwrap_or(CqlValue::Null),
            "lowClosed" => CqlValue::Boolean(interval.low_closed),
            "highClosed" => CqlValue::Boolean(interval.high_closed),
            _ => CqlValue::Null,
        },
        primitive => {
            if name == "value" {
                primitive.clone()
            } else {
                CqlValue::Null
            }
        }
    }
}
