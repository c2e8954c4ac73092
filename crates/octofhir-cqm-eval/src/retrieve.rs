//! Data retrieval
//!
//! Answers `Retrieve` expressions against an in-memory [`ResourceBundle`].
//! A bundle may hold one subject's records or many subjects' records
//! combined; the execution context is the discriminator.

use crate::context::ContextBinding;
use crate::error::{EvalError, EvalResult};
use crate::operators::{interval_contains, overlaps};
use crate::terminology::TerminologyProvider;
use indexmap::IndexMap;
use octofhir_cqm_model::{ResourceBundle, TypeDescriptor, TypeResolver};
use octofhir_cqm_types::{CqlCode, CqlInterval, CqlValue, FhirResource};
use std::sync::Arc;

/// Namespace URI the FHIR provider is registered under
pub const FHIR_MODEL_URI: &str = "http://hl7.org/fhir";

/// Terminology filter of a retrieve
#[derive(Debug, Clone, PartialEq)]
pub enum CodeFilter {
    /// Membership in a value set, answered by the terminology provider
    ValueSet(String),
    /// Equivalence with any of these codes
    Codes(Vec<CqlCode>),
}

/// One retrieve: resource type plus optional code and date filters
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveRequest {
    /// Unqualified resource type name
    pub data_type: String,
    pub template_id: Option<String>,
    pub code_property: Option<String>,
    pub codes: Option<CodeFilter>,
    pub date_property: Option<String>,
    pub date_range: Option<CqlInterval>,
}

impl RetrieveRequest {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            template_id: None,
            code_property: None,
            codes: None,
            date_property: None,
            date_range: None,
        }
    }

    pub fn with_codes(mut self, property: Option<String>, codes: CodeFilter) -> Self {
        self.code_property = property;
        self.codes = Some(codes);
        self
    }

    pub fn with_date_range(mut self, property: Option<String>, range: CqlInterval) -> Self {
        self.date_property = property;
        self.date_range = Some(range);
        self
    }
}

/// Source of resources for retrieves
pub trait RetrieveProvider: Send + Sync {
    /// Resources of the requested type visible in `context` that pass the filters
    fn retrieve(&self, request: &RetrieveRequest, context: &ContextBinding) -> EvalResult<Vec<CqlValue>>;
}

/// [`RetrieveProvider`] over a resource bundle
pub struct BundleRetrieveProvider {
    bundle: Arc<ResourceBundle>,
    resolver: Arc<dyn TypeResolver>,
    terminology: Option<Arc<dyn TerminologyProvider>>,
}

impl BundleRetrieveProvider {
    pub fn new(bundle: Arc<ResourceBundle>, resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            bundle,
            resolver,
            terminology: None,
        }
    }

    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(terminology);
        self
    }

    pub fn bundle(&self) -> &Arc<ResourceBundle> {
        &self.bundle
    }

    fn in_context(&self, resource: &FhirResource, descriptor: &TypeDescriptor, context: &ContextBinding) -> bool {
        let Some(subject) = context.context_value.as_deref() else {
            return true;
        };
        if context.is_unfiltered() {
            return true;
        }
        if resource.resource_type == context.context_type {
            return resource.id.as_deref() == Some(subject);
        }
        let Some(path) = descriptor.context_path(&context.context_type) else {
            // Types with no link to the context subject are shared records
            return true;
        };
        let expected = format!("{}/{}", context.context_type, subject);
        references_of(navigate(resource, path))
            .iter()
            .any(|r| r == &expected || r.ends_with(&format!("/{}", expected)))
    }

    fn matches_codes(&self, resource: &FhirResource, property: &str, filter: &CodeFilter) -> EvalResult<bool> {
        let codes = codes_of(&navigate(resource, property));
        match filter {
            CodeFilter::Codes(wanted) => Ok(codes
                .iter()
                .any(|code| wanted.iter().any(|w| w.is_equivalent(code)))),
            CodeFilter::ValueSet(id) => {
                let terminology = self
                    .terminology
                    .as_ref()
                    .ok_or_else(|| EvalError::terminology_not_found(id.as_str()))?;
                for code in &codes {
                    if terminology.in_value_set(code, id)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl RetrieveProvider for BundleRetrieveProvider {
    fn retrieve(&self, request: &RetrieveRequest, context: &ContextBinding) -> EvalResult<Vec<CqlValue>> {
        let descriptor = self.resolver.resolve_type(&request.data_type)?;

        let code_property = request
            .code_property
            .as_deref()
            .or(descriptor.primary_code_path.as_deref());
        let date_property = request
            .date_property
            .as_deref()
            .or(descriptor.primary_date_path.as_deref());

        let mut results = Vec::new();
        for resource in self.bundle.of_type(&descriptor.name) {
            if !self.in_context(resource, &descriptor, context) {
                continue;
            }
            if let Some(filter) = &request.codes {
                let property = code_property.ok_or_else(|| {
                    EvalError::invalid_operand(
                        "Retrieve",
                        format!("{} has no code property to filter on", descriptor.name),
                    )
                })?;
                if !self.matches_codes(resource, property, filter)? {
                    continue;
                }
            }
            if let Some(range) = &request.date_range {
                let property = date_property.ok_or_else(|| {
                    EvalError::invalid_operand(
                        "Retrieve",
                        format!("{} has no date property to filter on", descriptor.name),
                    )
                })?;
                if !date_in_range(&navigate(resource, property), range) {
                    continue;
                }
            }
            results.push(CqlValue::Resource(Arc::clone(resource)));
        }

        log::debug!(
            "retrieve {} in {}={:?}: {} resource(s)",
            descriptor.name,
            context.context_type,
            context.context_value,
            results.len()
        );
        Ok(results)
    }
}

/// Follow a dotted path through typed resource fields
pub fn navigate(resource: &FhirResource, path: &str) -> CqlValue {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return CqlValue::Null;
    };
    let mut current = resource.get(first).cloned().unwrap_or(CqlValue::Null);
    for segment in segments {
        current = match current {
            CqlValue::Tuple(tuple) => tuple.get(segment).cloned().unwrap_or(CqlValue::Null),
            CqlValue::Resource(inner) => inner.get(segment).cloned().unwrap_or(CqlValue::Null),
            CqlValue::List(list) => CqlValue::list(list.elements.into_iter().filter_map(|e| match e {
                CqlValue::Tuple(tuple) => tuple.get(segment).cloned(),
                _ => None,
            })),
            _ => CqlValue::Null,
        };
    }
    current
}

/// Reference strings held by a `Reference` value or a list of them
fn references_of(value: CqlValue) -> Vec<String> {
    match value {
        CqlValue::Tuple(tuple) => tuple
            .get("reference")
            .and_then(CqlValue::as_string)
            .map(|r| vec![r.to_string()])
            .unwrap_or_default(),
        CqlValue::String(reference) => vec![reference],
        CqlValue::List(list) => list.elements.into_iter().flat_map(references_of).collect(),
        _ => Vec::new(),
    }
}

/// Codes carried by a Code, Concept or list of those
pub fn codes_of(value: &CqlValue) -> Vec<CqlCode> {
    match value {
        CqlValue::Code(code) => vec![code.clone()],
        CqlValue::Concept(concept) => concept.codes.to_vec(),
        CqlValue::List(list) => list.elements.iter().flat_map(codes_of).collect(),
        _ => Vec::new(),
    }
}

/// Whether a date point falls in the range or a date interval overlaps it.
/// Missing or uncertain values are excluded.
fn date_in_range(value: &CqlValue, range: &CqlInterval) -> bool {
    let verdict = match value {
        CqlValue::Date(_) | CqlValue::DateTime(_) => interval_contains(range, value),
        CqlValue::Interval(_) => overlaps(value, &CqlValue::Interval(range.clone())),
        CqlValue::List(list) => return list.elements.iter().any(|v| date_in_range(v, range)),
        _ => return false,
    };
    matches!(verdict, Ok(Some(true)))
}

/// Data access facade for one data model
pub struct CompositeDataProvider {
    retrieve: Arc<dyn RetrieveProvider>,
    terminology: Option<Arc<dyn TerminologyProvider>>,
}

impl CompositeDataProvider {
    pub fn new(retrieve: Arc<dyn RetrieveProvider>) -> Self {
        Self {
            retrieve,
            terminology: None,
        }
    }

    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(terminology);
        self
    }

    pub fn retrieve(&self, request: &RetrieveRequest, context: &ContextBinding) -> EvalResult<Vec<CqlValue>> {
        self.retrieve.retrieve(request, context)
    }

    pub fn terminology(&self) -> Option<&Arc<dyn TerminologyProvider>> {
        self.terminology.as_ref()
    }
}

/// Data providers keyed by model namespace URI
#[derive(Default)]
pub struct DataProviderRegistry {
    providers: IndexMap<String, Arc<CompositeDataProvider>>,
}

impl DataProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a single FHIR provider
    pub fn fhir(provider: CompositeDataProvider) -> Self {
        let mut registry = Self::new();
        registry.register(FHIR_MODEL_URI, provider);
        registry
    }

    pub fn register(&mut self, uri: impl Into<String>, provider: CompositeDataProvider) {
        self.providers.insert(uri.into(), Arc::new(provider));
    }

    pub fn get(&self, uri: &str) -> Option<&Arc<CompositeDataProvider>> {
        self.providers.get(uri)
    }

    /// Select the provider for a `{uri}Type` (or unqualified) data type.
    /// Returns the provider and the unqualified type name.
    pub fn for_data_type<'a>(&self, data_type: &'a str) -> EvalResult<(&Arc<CompositeDataProvider>, &'a str)> {
        if let Some((uri, name)) = data_type.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
            let provider = self.providers.get(uri).ok_or_else(|| EvalError::TypeResolution {
                name: data_type.to_string(),
                searched: self.providers.keys().cloned().collect::<Vec<_>>().join(", "),
            })?;
            return Ok((provider, name));
        }
        let name = data_type.rsplit_once('.').map_or(data_type, |(_, name)| name);
        let provider = self
            .providers
            .get(FHIR_MODEL_URI)
            .or_else(|| self.providers.values().next())
            .ok_or_else(|| EvalError::internal("no data provider registered"))?;
        Ok((provider, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminology::BundleTerminologyProvider;
    use octofhir_cqm_model::fhir_r4_resolver;
    use octofhir_cqm_types::{CqlDate, CqlDateTime};
    use serde_json::json;

    fn data() -> (Arc<ResourceBundle>, Arc<dyn TypeResolver>) {
        let resolver: Arc<dyn TypeResolver> = Arc::new(fhir_r4_resolver().unwrap());
        let bundle = ResourceBundle::from_value(
            &json!({"resourceType": "Bundle", "entry": [
                {"resource": {"resourceType": "Patient", "id": "a"}},
                {"resource": {"resourceType": "Patient", "id": "b"}},
                {"resource": {"resourceType": "Condition", "id": "c1",
                    "subject": {"reference": "Patient/a"},
                    "code": {"coding": [{"system": "http://snomed.info/sct", "code": "44054006"}]},
                    "onsetDateTime": "2023-03-01T00:00:00Z"}},
                {"resource": {"resourceType": "Condition", "id": "c2",
                    "subject": {"reference": "http://example.org/fhir/Patient/b"},
                    "code": {"coding": [{"system": "http://snomed.info/sct", "code": "38341003"}]},
                    "onsetDateTime": "2019-01-01T00:00:00Z"}},
                {"resource": {"resourceType": "Condition", "id": "c3",
                    "subject": {"reference": "Patient/a"},
                    "code": {"coding": [{"system": "http://snomed.info/sct", "code": "38341003"}]}}},
                {"resource": {"resourceType": "ValueSet", "id": "diabetes", "url": "http://example.org/vs/diabetes",
                    "expansion": {"contains": [{"system": "http://snomed.info/sct", "code": "44054006"}]}}}
            ]}),
            resolver.as_ref(),
        )
        .unwrap();
        (Arc::new(bundle), resolver)
    }

    fn ids(values: &[CqlValue]) -> Vec<String> {
        values
            .iter()
            .filter_map(|v| v.as_resource().and_then(|r| r.id.clone()))
            .collect()
    }

    #[test]
    fn test_context_filtering() {
        let (bundle, resolver) = data();
        let provider = BundleRetrieveProvider::new(bundle, resolver);
        let request = RetrieveRequest::new("Condition");

        let a = provider.retrieve(&request, &ContextBinding::patient("a")).unwrap();
        assert_eq!(ids(&a), vec!["c1", "c3"]);
        let b = provider.retrieve(&request, &ContextBinding::patient("b")).unwrap();
        assert_eq!(ids(&b), vec!["c2"]);
        let all = provider.retrieve(&request, &ContextBinding::unfiltered()).unwrap();
        assert_eq!(all.len(), 3);

        let patients = provider
            .retrieve(&RetrieveRequest::new("Patient"), &ContextBinding::patient("b"))
            .unwrap();
        assert_eq!(ids(&patients), vec!["b"]);
    }

    #[test]
    fn test_code_filters() {
        let (bundle, resolver) = data();
        let terminology = Arc::new(BundleTerminologyProvider::from_bundle(&bundle, true).unwrap());
        let provider = BundleRetrieveProvider::new(bundle, resolver).with_terminology(terminology);
        let ctx = ContextBinding::unfiltered();

        let by_code = RetrieveRequest::new("Condition").with_codes(
            None,
            CodeFilter::Codes(vec![CqlCode::simple("38341003", "http://snomed.info/sct")]),
        );
        assert_eq!(ids(&provider.retrieve(&by_code, &ctx).unwrap()), vec!["c2", "c3"]);

        let by_value_set = RetrieveRequest::new("Condition")
            .with_codes(None, CodeFilter::ValueSet("http://example.org/vs/diabetes".to_string()));
        assert_eq!(ids(&provider.retrieve(&by_value_set, &ctx).unwrap()), vec!["c1"]);

        let missing = RetrieveRequest::new("Condition")
            .with_codes(None, CodeFilter::ValueSet("http://example.org/vs/missing".to_string()));
        assert!(matches!(
            provider.retrieve(&missing, &ctx),
            Err(EvalError::TerminologyNotFound { .. })
        ));
    }

    #[test]
    fn test_date_filter_excludes_undated() {
        let (bundle, resolver) = data();
        let provider = BundleRetrieveProvider::new(bundle, resolver);
        let range = CqlInterval::closed(
            CqlValue::DateTime(CqlDateTime::new(2023, 1, 1, 0, 0, 0, 0, Some(0))),
            CqlValue::DateTime(CqlDateTime::new(2023, 12, 31, 23, 59, 59, 999, Some(0))),
        );
        let request = RetrieveRequest::new("Condition").with_date_range(None, range);
        let found = provider.retrieve(&request, &ContextBinding::unfiltered()).unwrap();
        assert_eq!(ids(&found), vec!["c1"]);
    }

    #[test]
    fn test_date_range_with_mixed_precision() {
        let range = CqlInterval::closed(
            CqlValue::DateTime(CqlDateTime::new(2024, 1, 1, 0, 0, 0, 0, Some(0))),
            CqlValue::DateTime(CqlDateTime::new(2024, 12, 31, 23, 59, 59, 999, Some(0))),
        );
        assert!(date_in_range(&CqlValue::Date(CqlDate::new(2024, 1, 2)), &range));
        assert!(!date_in_range(&CqlValue::Date(CqlDate::new(2025, 1, 2)), &range));
        assert!(!date_in_range(&CqlValue::Null, &range));
    }

    #[test]
    fn test_registry_selects_by_namespace() {
        let (bundle, resolver) = data();
        let registry = DataProviderRegistry::fhir(CompositeDataProvider::new(Arc::new(
            BundleRetrieveProvider::new(bundle, resolver),
        )));
        let (_, name) = registry.for_data_type("{http://hl7.org/fhir}Condition").unwrap();
        assert_eq!(name, "Condition");
        assert!(matches!(
            registry.for_data_type("{http://example.org/other}Thing"),
            Err(EvalError::TypeResolution { .. })
        ));
    }
}
