//! Resource bundles
//!
//! A [`ResourceBundle`] holds converted resources in document order together
//! with a per-type index. It accepts a FHIR `Bundle` or a single bare resource.

use crate::convert::FhirConverter;
use crate::error::ModelError;
use crate::resolver::TypeResolver;
use indexmap::IndexMap;
use octofhir_cqm_types::FhirResource;
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    resources: Vec<Arc<FhirResource>>,
    by_type: IndexMap<String, Vec<Arc<FhirResource>>>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse bundle JSON text
    pub fn parse(text: &str, resolver: &dyn TypeResolver) -> Result<Self, ModelError> {
        let json: JsonValue = serde_json::from_str(text)?;
        Self::from_value(&json, resolver)
    }

    /// Build from a parsed `Bundle` or bare resource
    pub fn from_value(json: &JsonValue, resolver: &dyn TypeResolver) -> Result<Self, ModelError> {
        let converter = FhirConverter::new(resolver);
        let resource_type = json
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ModelError::malformed("document is not a FHIR resource"))?;

        let mut bundle = Self::new();
        if resource_type != "Bundle" {
            bundle.push(converter.convert_resource(json)?);
            return Ok(bundle);
        }

        let entries = match json.get("entry") {
            None | Some(JsonValue::Null) => return Ok(bundle),
            Some(JsonValue::Array(entries)) => entries,
            Some(_) => return Err(ModelError::malformed("Bundle.entry is not an array")),
        };
        for (index, entry) in entries.iter().enumerate() {
            match entry.get("resource") {
                Some(resource) => bundle.push(converter.convert_resource(resource)?),
                None => log::debug!("skipping bundle entry {} without a resource", index),
            }
        }
        Ok(bundle)
    }

    pub fn from_resources(resources: impl IntoIterator<Item = FhirResource>) -> Self {
        let mut bundle = Self::new();
        for resource in resources {
            bundle.push(resource);
        }
        bundle
    }

    pub fn push(&mut self, resource: impl Into<Arc<FhirResource>>) {
        let resource = resource.into();
        self.by_type
            .entry(resource.resource_type.clone())
            .or_default()
            .push(Arc::clone(&resource));
        self.resources.push(resource);
    }

    /// Append every resource of `other`
    pub fn merge(&mut self, other: &ResourceBundle) {
        for resource in &other.resources {
            self.push(Arc::clone(resource));
        }
    }

    /// All resources in document order
    pub fn resources(&self) -> &[Arc<FhirResource>] {
        &self.resources
    }

    /// Resources of one type in document order
    pub fn of_type(&self, resource_type: &str) -> &[Arc<FhirResource>] {
        self.by_type
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<&Arc<FhirResource>> {
        self.of_type(resource_type)
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
    }

    /// Ids of the `Patient` resources, in document order
    pub fn patient_ids(&self) -> Vec<String> {
        self.of_type("Patient")
            .iter()
            .filter_map(|p| p.id.clone())
            .collect()
    }

    /// Resource types present, in first-seen order
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhir::fhir_r4_resolver;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_bundle_indexing() {
        let resolver = fhir_r4_resolver().unwrap();
        let bundle = ResourceBundle::from_value(
            &json!({
                "resourceType": "Bundle",
                "type": "collection",
                "entry": [
                    {"resource": {"resourceType": "Patient", "id": "a"}},
                    {"resource": {"resourceType": "Observation", "id": "o1", "subject": {"reference": "Patient/a"}}},
                    {"fullUrl": "urn:uuid:empty"},
                    {"resource": {"resourceType": "Patient", "id": "b"}}
                ]
            }),
            &resolver,
        )
        .unwrap();

        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle.patient_ids(), vec!["a", "b"]);
        assert_eq!(bundle.of_type("Observation").len(), 1);
        assert!(bundle.of_type("Condition").is_empty());
        assert!(bundle.get("Patient", "b").is_some());
        assert_eq!(bundle.resource_types().collect::<Vec<_>>(), vec!["Patient", "Observation"]);
    }

    #[test]
    fn test_bare_resource() {
        let resolver = fhir_r4_resolver().unwrap();
        let bundle =
            ResourceBundle::parse(r#"{"resourceType": "Patient", "id": "solo"}"#, &resolver).unwrap();
        assert_eq!(bundle.patient_ids(), vec!["solo"]);
    }

    #[test]
    fn test_not_a_resource() {
        let resolver = fhir_r4_resolver().unwrap();
        assert!(matches!(
            ResourceBundle::parse("[1, 2]", &resolver),
            Err(ModelError::MalformedInput(_))
        ));
        assert!(matches!(
            ResourceBundle::parse("{not json", &resolver),
            Err(ModelError::MalformedInput(_))
        ));
    }
}
