//! Expression evaluator
//!
//! [`ExpressionEvaluator`] is the entry point for evaluating named
//! expressions. It owns one session: the library manager and its compiled
//! library cache, the terminology provider built from a value-set bundle, and
//! the data providers bound over a patient data bundle. Every call builds a
//! fresh [`EvaluationContext`], so expression results are cached per context
//! and never leak between subjects.

use crate::context::{ContextBinding, EvaluationContext};
use crate::engine::{CqlEngine, public_definitions};
use crate::error::{EvalError, EvalResult};
use crate::library::{ContentResolver, LibraryManager, LibraryPool, LibrarySet, OptionsPolicy};
use crate::parameters::to_parameters;
use crate::retrieve::{BundleRetrieveProvider, CompositeDataProvider, DataProviderRegistry};
use crate::terminology::{BundleTerminologyProvider, TerminologyProvider};
use indexmap::IndexMap;
use octofhir_cqm_model::{ResourceBundle, TypeResolver, fhir_r4_resolver};
use octofhir_cqm_types::{CqlDateTime, CqlValue};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Session-wide evaluator configuration
#[derive(Debug, Clone)]
pub struct EvaluatorOptions {
    /// Expand every value set when the terminology provider is built
    pub expand_value_sets: bool,
    pub options_policy: OptionsPolicy,
    /// Fixed `Now()` for every evaluation; the wall clock when unset
    pub evaluation_timestamp: Option<CqlDateTime>,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            expand_value_sets: true,
            options_policy: OptionsPolicy::Tolerate,
            evaluation_timestamp: None,
        }
    }
}

impl EvaluatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expand_value_sets(mut self, expand: bool) -> Self {
        self.expand_value_sets = expand;
        self
    }

    pub fn options_policy(mut self, policy: OptionsPolicy) -> Self {
        self.options_policy = policy;
        self
    }

    pub fn evaluation_timestamp(mut self, timestamp: CqlDateTime) -> Self {
        self.evaluation_timestamp = Some(timestamp);
        self
    }
}

/// One expression evaluation call
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub library: String,
    pub min_version: Option<String>,
    /// Expressions to evaluate; empty means every public definition of the context
    pub expressions: Vec<String>,
    pub context: ContextBinding,
    /// Overrides for parameters of the primary library
    pub parameters: IndexMap<String, CqlValue>,
    /// Overrides the session timestamp for this call
    pub evaluation_timestamp: Option<CqlDateTime>,
}

impl EvaluationRequest {
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            min_version: None,
            expressions: Vec::new(),
            context: ContextBinding::unfiltered(),
            parameters: IndexMap::new(),
            evaluation_timestamp: None,
        }
    }

    pub fn min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    pub fn expression(mut self, name: impl Into<String>) -> Self {
        self.expressions.push(name.into());
        self
    }

    pub fn expressions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expressions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn context(mut self, context: ContextBinding) -> Self {
        self.context = context;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: CqlValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn evaluated_at(mut self, timestamp: CqlDateTime) -> Self {
        self.evaluation_timestamp = Some(timestamp);
        self
    }
}

/// Values computed for one request, in request order
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub library: String,
    pub version: Option<String>,
    pub context: ContextBinding,
    pub values: IndexMap<String, CqlValue>,
}

impl EvaluationResult {
    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.values.get(name)
    }

    /// Serialize as a FHIR `Parameters` resource
    pub fn to_parameters(&self) -> JsonValue {
        to_parameters(&self.values, self.context.label.as_deref())
    }
}

/// Evaluates named expressions against one set of libraries, value sets and data
pub struct ExpressionEvaluator {
    libraries: LibraryManager,
    terminology: Arc<dyn TerminologyProvider>,
    data: Arc<DataProviderRegistry>,
    resolver: Arc<dyn TypeResolver>,
    engine: CqlEngine,
    options: EvaluatorOptions,
}

impl ExpressionEvaluator {
    /// Build a session over in-memory bundles with the FHIR R4 model
    pub fn new(
        content: Arc<dyn ContentResolver>,
        value_sets: &ResourceBundle,
        data: Arc<ResourceBundle>,
        options: EvaluatorOptions,
    ) -> EvalResult<Self> {
        let resolver: Arc<dyn TypeResolver> = Arc::new(fhir_r4_resolver()?);
        Self::with_resolver(content, value_sets, data, resolver, options)
    }

    /// Build a session with an explicit type resolver
    pub fn with_resolver(
        content: Arc<dyn ContentResolver>,
        value_sets: &ResourceBundle,
        data: Arc<ResourceBundle>,
        resolver: Arc<dyn TypeResolver>,
        options: EvaluatorOptions,
    ) -> EvalResult<Self> {
        let terminology: Arc<dyn TerminologyProvider> =
            Arc::new(BundleTerminologyProvider::from_bundle(value_sets, options.expand_value_sets)?);
        let retrieve = BundleRetrieveProvider::new(data, Arc::clone(&resolver)).with_terminology(Arc::clone(&terminology));
        let facade = CompositeDataProvider::new(Arc::new(retrieve)).with_terminology(Arc::clone(&terminology));
        Ok(Self::from_parts(
            content,
            terminology,
            DataProviderRegistry::fhir(facade),
            resolver,
            options,
        ))
    }

    /// Assemble a session from already-built providers
    pub fn from_parts(
        content: Arc<dyn ContentResolver>,
        terminology: Arc<dyn TerminologyProvider>,
        data: DataProviderRegistry,
        resolver: Arc<dyn TypeResolver>,
        options: EvaluatorOptions,
    ) -> Self {
        Self {
            libraries: LibraryManager::new(content).with_policy(options.options_policy.clone()),
            terminology,
            data: Arc::new(data),
            resolver,
            engine: CqlEngine::new(),
            options,
        }
    }

    /// Build a session from raw resource texts
    pub fn from_texts<'a>(
        libraries: impl IntoIterator<Item = &'a str>,
        value_sets: &str,
        data: &str,
        options: EvaluatorOptions,
    ) -> EvalResult<Self> {
        let resolver: Arc<dyn TypeResolver> = Arc::new(fhir_r4_resolver()?);
        let pool = LibraryPool::from_texts(libraries)?;
        let value_sets = ResourceBundle::parse(value_sets, resolver.as_ref())?;
        let data = ResourceBundle::parse(data, resolver.as_ref())?;
        Self::with_resolver(Arc::new(pool), &value_sets, Arc::new(data), resolver, options)
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    pub fn engine(&self) -> &CqlEngine {
        &self.engine
    }

    pub fn library_manager(&self) -> &LibraryManager {
        &self.libraries
    }

    /// Resolve a primary library and its includes
    pub fn load(&self, name: &str, min_version: Option<&str>) -> EvalResult<Arc<LibrarySet>> {
        let set = self.libraries.load(name, min_version)?;
        log::debug!(
            "loaded {} version {:?} with {} included libraries",
            set.main_name(),
            set.main().version(),
            set.libraries().count() - 1
        );
        Ok(Arc::new(set))
    }

    /// Evaluate a request, loading its library first
    pub fn evaluate(&self, request: &EvaluationRequest) -> EvalResult<EvaluationResult> {
        let set = self.load(&request.library, request.min_version.as_deref())?;
        self.evaluate_loaded(&set, request)
    }

    /// Evaluate a request against an already loaded library set
    pub fn evaluate_loaded(&self, set: &Arc<LibrarySet>, request: &EvaluationRequest) -> EvalResult<EvaluationResult> {
        let main = Arc::clone(set.main());
        let names = if request.expressions.is_empty() {
            public_definitions(&main, &request.context.context_type)
        } else {
            for name in &request.expressions {
                if main.expression(name).is_none() {
                    return Err(EvalError::expression_not_found(main.name(), name.as_str()));
                }
            }
            request.expressions.clone()
        };

        let timestamp = request
            .evaluation_timestamp
            .clone()
            .or_else(|| self.options.evaluation_timestamp.clone());
        let mut ctx = self.context_for(set, request.context.clone(), &request.parameters, timestamp);

        let mut values = IndexMap::new();
        for name in names {
            let value = self.engine.evaluate_definition(main.name(), &name, &mut ctx)?;
            values.insert(name, value);
        }
        Ok(EvaluationResult {
            library: main.name().to_string(),
            version: main.version().map(String::from),
            context: request.context.clone(),
            values,
        })
    }

    /// Fresh context bound to this session's providers
    pub fn context_for(
        &self,
        set: &Arc<LibrarySet>,
        binding: ContextBinding,
        parameters: &IndexMap<String, CqlValue>,
        timestamp: Option<CqlDateTime>,
    ) -> EvaluationContext {
        let mut builder = EvaluationContext::builder()
            .libraries(Arc::clone(set))
            .binding(binding)
            .data_providers(Arc::clone(&self.data))
            .terminology(Arc::clone(&self.terminology))
            .type_resolver(Arc::clone(&self.resolver));
        for (name, value) in parameters {
            builder = builder.parameter(set.main_name(), name.as_str(), value.clone());
        }
        if let Some(now) = timestamp {
            builder = builder.now(now);
        }
        builder.build()
    }
}

/// Evaluate a request over raw resource texts and return `Parameters` JSON
pub fn evaluate_to_parameters<'a>(
    libraries: impl IntoIterator<Item = &'a str>,
    value_sets: &str,
    data: &str,
    request: &EvaluationRequest,
) -> EvalResult<JsonValue> {
    let evaluator = ExpressionEvaluator::from_texts(libraries, value_sets, data, EvaluatorOptions::default())?;
    Ok(evaluator.evaluate(request)?.to_parameters())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn library() -> String {
        json!({
            "library": {
                "identifier": {"id": "Simple", "version": "1.0.0"},
                "parameters": {"def": [{
                    "name": "Threshold",
                    "accessLevel": "Public",
                    "default": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Integer", "value": "5"}
                }]},
                "statements": {"def": [
                    {"name": "Patient", "context": "Patient", "accessLevel": "Public",
                     "expression": {"type": "SingletonFrom", "operand": {
                        "type": "Retrieve", "dataType": "{http://hl7.org/fhir}Patient"}}},
                    {"name": "Limit", "context": "Patient", "accessLevel": "Public",
                     "expression": {"type": "ParameterRef", "name": "Threshold"}},
                    {"name": "Hidden", "context": "Patient", "accessLevel": "Private",
                     "expression": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Boolean", "value": "true"}}
                ]}
            }
        })
        .to_string()
    }

    fn data() -> String {
        json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "a", "gender": "female"}},
                {"resource": {"resourceType": "Patient", "id": "b", "gender": "male"}}
            ]
        })
        .to_string()
    }

    fn evaluator() -> ExpressionEvaluator {
        let empty = json!({"resourceType": "Bundle"}).to_string();
        let text = library();
        ExpressionEvaluator::from_texts([text.as_str()], &empty, &data(), EvaluatorOptions::default()).unwrap()
    }

    #[test]
    fn test_public_definitions_by_default() {
        let request = EvaluationRequest::new("Simple").context(ContextBinding::patient("b"));
        let result = evaluator().evaluate(&request).unwrap();
        assert_eq!(result.values.keys().collect::<Vec<_>>(), vec!["Patient", "Limit"]);
        assert_eq!(result.get("Limit"), Some(&CqlValue::Integer(5)));
        let patient = result.get("Patient").and_then(CqlValue::as_resource).unwrap();
        assert_eq!(patient.id.as_deref(), Some("b"));
        assert_eq!(result.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_parameter_override() {
        let request = EvaluationRequest::new("Simple")
            .expression("Limit")
            .parameter("Threshold", CqlValue::Integer(9));
        let result = evaluator().evaluate(&request).unwrap();
        assert_eq!(result.get("Limit"), Some(&CqlValue::Integer(9)));
    }

    #[test]
    fn test_missing_expression_fails_fast() {
        let request = EvaluationRequest::new("Simple").expression("Nope");
        let err = evaluator().evaluate(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpressionNotFound);
    }

    #[test]
    fn test_missing_library_fails_fast() {
        let err = evaluator().evaluate(&EvaluationRequest::new("Other")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LibraryNotFound);
    }

    #[test]
    fn test_malformed_data_bundle() {
        let text = library();
        let result = ExpressionEvaluator::from_texts([text.as_str()], "{}", "not json", EvaluatorOptions::default());
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::MalformedInput));
    }

    #[test]
    fn test_private_definition_can_be_requested() {
        let request = EvaluationRequest::new("Simple").expression("Hidden");
        let result = evaluator().evaluate(&request).unwrap();
        assert_eq!(result.get("Hidden"), Some(&CqlValue::Boolean(true)));
    }
}
