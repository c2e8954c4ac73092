//! Evaluation context
//!
//! Holds everything one evaluation pass needs: the loaded library set, the
//! execution context binding, providers, resolved parameters, query scopes and
//! the per-context expression cache.

use crate::error::{EvalError, EvalResult};
use crate::library::LibrarySet;
use crate::retrieve::DataProviderRegistry;
use crate::terminology::TerminologyProvider;
use octofhir_cqm_elm::Library;
use octofhir_cqm_model::TypeResolver;
use octofhir_cqm_types::{CqlDate, CqlDateTime, CqlValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Default maximum expression nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Context names that see every record
const UNFILTERED_CONTEXTS: [&str; 2] = ["Unfiltered", "Population"];

/// Execution context: which subject relative retrieves are scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextBinding {
    /// Context type (e.g. `Patient`)
    pub context_type: String,
    /// Context value (e.g. a patient id)
    pub context_value: Option<String>,
    /// Optional label echoed in the output
    pub label: Option<String>,
}

impl ContextBinding {
    pub fn new(context_type: impl Into<String>, context_value: Option<impl Into<String>>) -> Self {
        Self {
            context_type: context_type.into(),
            context_value: context_value.map(Into::into),
            label: None,
        }
    }

    pub fn patient(id: impl Into<String>) -> Self {
        Self::new("Patient", Some(id))
    }

    pub fn unfiltered() -> Self {
        Self::new("Unfiltered", None::<String>)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether relative retrieves see every record
    pub fn is_unfiltered(&self) -> bool {
        self.context_value.is_none() || UNFILTERED_CONTEXTS.contains(&self.context_type.as_str())
    }

    /// Parse `Type=value` (or a bare context type)
    pub fn parse(text: &str) -> Self {
        match text.split_once('=') {
            Some((context_type, value)) => Self::new(context_type.trim(), Some(value.trim())),
            None => Self::new(text.trim(), None::<String>),
        }
    }
}

impl Default for ContextBinding {
    fn default() -> Self {
        Self::unfiltered()
    }
}

/// Query scope holding aliases, let bindings and function operands
#[derive(Debug, Clone, Default)]
pub struct Scope {
    aliases: HashMap<String, CqlValue>,
    lets: HashMap<String, CqlValue>,
    operands: HashMap<String, CqlValue>,
}

/// Evaluation context for expression execution
pub struct EvaluationContext {
    libraries: Option<Arc<LibrarySet>>,
    library_stack: Vec<String>,
    binding: ContextBinding,
    data: Option<Arc<DataProviderRegistry>>,
    terminology: Option<Arc<dyn TerminologyProvider>>,
    resolver: Option<Arc<dyn TypeResolver>>,
    parameters: HashMap<String, CqlValue>,
    scopes: Vec<Scope>,
    cache: HashMap<String, CqlValue>,
    depth: usize,
    max_depth: usize,
    now: CqlDateTime,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationContext {
    /// Create an empty context with the current time as evaluation timestamp
    pub fn new() -> Self {
        Self {
            libraries: None,
            library_stack: Vec::new(),
            binding: ContextBinding::unfiltered(),
            data: None,
            terminology: None,
            resolver: None,
            parameters: HashMap::new(),
            scopes: Vec::new(),
            cache: HashMap::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            now: CqlDateTime::from_chrono(&chrono::Utc::now()),
        }
    }

    pub fn builder() -> EvaluationContextBuilder {
        EvaluationContextBuilder::default()
    }

    // === Libraries ===

    pub fn libraries(&self) -> Option<&Arc<LibrarySet>> {
        self.libraries.as_ref()
    }

    /// Name of the library whose definitions are being evaluated
    pub fn current_library_name(&self) -> Option<&str> {
        self.library_stack
            .last()
            .map(String::as_str)
            .or_else(|| self.libraries.as_ref().map(|set| set.main_name()))
    }

    /// The library whose definitions are being evaluated
    pub fn current_library(&self) -> EvalResult<Arc<Library>> {
        let set = self
            .libraries
            .as_ref()
            .ok_or_else(|| EvalError::internal("no library loaded in context"))?;
        let name = self.current_library_name().unwrap_or_else(|| set.main_name());
        set.get(name)
            .ok_or_else(|| EvalError::library_not_found(name, None))
    }

    pub fn push_library(&mut self, name: impl Into<String>) {
        self.library_stack.push(name.into());
    }

    pub fn pop_library(&mut self) {
        self.library_stack.pop();
    }

    // === Context binding ===

    pub fn binding(&self) -> &ContextBinding {
        &self.binding
    }

    /// Replace the binding, returning the previous one
    pub fn replace_binding(&mut self, binding: ContextBinding) -> ContextBinding {
        std::mem::replace(&mut self.binding, binding)
    }

    // === Providers ===

    pub fn data_providers(&self) -> Option<&Arc<DataProviderRegistry>> {
        self.data.as_ref()
    }

    pub fn terminology(&self) -> Option<&Arc<dyn TerminologyProvider>> {
        self.terminology.as_ref()
    }

    pub fn type_resolver(&self) -> Option<&Arc<dyn TypeResolver>> {
        self.resolver.as_ref()
    }

    // === Parameters ===

    /// Set a parameter value for a library
    pub fn set_parameter(&mut self, library: &str, name: &str, value: CqlValue) {
        self.parameters.insert(parameter_key(library, name), value);
    }

    pub fn get_parameter(&self, library: &str, name: &str) -> Option<&CqlValue> {
        self.parameters.get(&parameter_key(library, name))
    }

    // === Scopes ===

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn top_scope(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub fn set_alias(&mut self, name: impl Into<String>, value: CqlValue) {
        self.top_scope().aliases.insert(name.into(), value);
    }

    pub fn set_let(&mut self, name: impl Into<String>, value: CqlValue) {
        self.top_scope().lets.insert(name.into(), value);
    }

    pub fn set_operand(&mut self, name: impl Into<String>, value: CqlValue) {
        self.top_scope().operands.insert(name.into(), value);
    }

    pub fn get_alias(&self, name: &str) -> Option<&CqlValue> {
        self.scopes.iter().rev().find_map(|s| s.aliases.get(name))
    }

    pub fn get_let(&self, name: &str) -> Option<&CqlValue> {
        self.scopes.iter().rev().find_map(|s| s.lets.get(name))
    }

    /// Operands are only visible in the innermost function frame
    pub fn get_operand(&self, name: &str) -> Option<&CqlValue> {
        self.scopes.iter().rev().find_map(|s| s.operands.get(name))
    }

    /// Run `f` with a fresh scope stack, restoring the caller's afterwards
    pub fn with_isolated_scopes<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::take(&mut self.scopes);
        let result = f(self);
        self.scopes = saved;
        result
    }

    // === Expression cache ===

    pub fn get_cached(&self, key: &str) -> Option<CqlValue> {
        self.cache.get(key).cloned()
    }

    pub fn cache_result(&mut self, key: impl Into<String>, value: CqlValue) {
        self.cache.insert(key.into(), value);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // === Recursion ===

    /// Enter one nesting level; false when the limit is reached
    pub fn enter_recursion(&mut self) -> bool {
        if self.depth >= self.max_depth {
            return false;
        }
        self.depth += 1;
        true
    }

    pub fn exit_recursion(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // === Clock ===

    /// Evaluation timestamp, fixed for the lifetime of the context
    pub fn now(&self) -> CqlDateTime {
        self.now.clone()
    }

    pub fn today(&self) -> CqlDate {
        self.now.date()
    }
}

fn parameter_key(library: &str, name: &str) -> String {
    format!("{}:{}", library, name)
}

/// Builder for [`EvaluationContext`]
#[derive(Default)]
pub struct EvaluationContextBuilder {
    libraries: Option<Arc<LibrarySet>>,
    binding: Option<ContextBinding>,
    data: Option<Arc<DataProviderRegistry>>,
    terminology: Option<Arc<dyn TerminologyProvider>>,
    resolver: Option<Arc<dyn TypeResolver>>,
    parameters: Vec<(String, String, CqlValue)>,
    max_depth: Option<usize>,
    now: Option<CqlDateTime>,
}

impl EvaluationContextBuilder {
    pub fn libraries(mut self, libraries: Arc<LibrarySet>) -> Self {
        self.libraries = Some(libraries);
        self
    }

    pub fn binding(mut self, binding: ContextBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn data_providers(mut self, data: Arc<DataProviderRegistry>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn terminology(mut self, terminology: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(terminology);
        self
    }

    pub fn type_resolver(mut self, resolver: Arc<dyn TypeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn parameter(mut self, library: impl Into<String>, name: impl Into<String>, value: CqlValue) -> Self {
        self.parameters.push((library.into(), name.into(), value));
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn now(mut self, now: CqlDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn build(self) -> EvaluationContext {
        let mut ctx = EvaluationContext::new();
        ctx.libraries = self.libraries;
        if let Some(binding) = self.binding {
            ctx.binding = binding;
        }
        ctx.data = self.data;
        ctx.terminology = self.terminology;
        ctx.resolver = self.resolver;
        for (library, name, value) in self.parameters {
            ctx.set_parameter(&library, &name, value);
        }
        if let Some(max_depth) = self.max_depth {
            ctx.max_depth = max_depth;
        }
        if let Some(now) = self.now {
            ctx.now = now;
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_parse() {
        assert_eq!(ContextBinding::parse("Patient=p1"), ContextBinding::patient("p1"));
        assert!(ContextBinding::parse("Unfiltered").is_unfiltered());
        assert!(!ContextBinding::patient("p1").is_unfiltered());
        assert!(ContextBinding::new("Population", Some("x")).is_unfiltered());
    }

    #[test]
    fn test_scopes_shadow_and_isolate() {
        let mut ctx = EvaluationContext::new();
        ctx.push_scope();
        ctx.set_alias("X", CqlValue::integer(1));
        ctx.push_scope();
        ctx.set_alias("X", CqlValue::integer(2));
        assert_eq!(ctx.get_alias("X"), Some(&CqlValue::integer(2)));

        let inner = ctx.with_isolated_scopes(|ctx| ctx.get_alias("X").cloned());
        assert_eq!(inner, None);

        ctx.pop_scope();
        assert_eq!(ctx.get_alias("X"), Some(&CqlValue::integer(1)));
    }

    #[test]
    fn test_recursion_limit() {
        let mut ctx = EvaluationContext::builder().max_depth(2).build();
        assert!(ctx.enter_recursion());
        assert!(ctx.enter_recursion());
        assert!(!ctx.enter_recursion());
        ctx.exit_recursion();
        assert!(ctx.enter_recursion());
    }

    #[test]
    fn test_fixed_clock() {
        let now = CqlDateTime::new(2024, 6, 1, 12, 0, 0, 0, Some(0));
        let ctx = EvaluationContext::builder().now(now.clone()).build();
        assert_eq!(ctx.now(), now);
        assert_eq!(ctx.today(), CqlDate::new(2024, 6, 1));
    }
}
