//! Type registry
//!
//! Explicit mapping from `(namespace, name)` to [`TypeDescriptor`], populated
//! once at startup from one or more type tables and read-only afterwards.

use crate::error::ModelError;
use crate::parser::parse_model_info;
use crate::types::{ElementDescriptor, ModelInfo, TypeDescriptor};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    model_name: String,
    model_version: String,
    model_url: String,
    namespaces: IndexMap<String, HashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new(model_name: impl Into<String>, model_url: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_url: model_url.into(),
            ..Self::default()
        }
    }

    /// Build a registry from a parsed type table
    pub fn from_model_info(model_info: ModelInfo) -> Self {
        let mut registry = Self::new(model_info.name, model_info.url);
        registry.model_version = model_info.version;
        for descriptor in model_info.types {
            registry.register(descriptor);
        }
        registry
    }

    /// Load a registry from JSON type-table text
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(Self::from_model_info(parse_model_info(json)?))
    }

    /// Register a descriptor under its namespace, replacing any previous one
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.namespaces
            .entry(descriptor.namespace.clone())
            .or_default()
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    /// Look up a type in one namespace
    pub fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.namespaces.get(namespace)?.get(name).cloned()
    }

    /// Namespaces in registration order
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn model_url(&self) -> &str {
        &self.model_url
    }

    /// Number of registered descriptors across all namespaces
    pub fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find an element on a type, walking base types within the same namespace
    pub fn element<'a>(&'a self, descriptor: &'a TypeDescriptor, name: &str) -> Option<&'a ElementDescriptor> {
        let mut current = descriptor;
        loop {
            if let Some(element) = current.element(name) {
                return Some(element);
            }
            let base = current.base_type.as_deref()?;
            current = self.namespaces.get(&current.namespace)?.get(base)?.as_ref();
        }
    }

    /// Whether `child` is `ancestor` or derives from it
    pub fn is_derived_from(&self, child: &TypeDescriptor, ancestor: &str) -> bool {
        let mut current = child;
        loop {
            if current.name == ancestor {
                return true;
            }
            let Some(base) = current.base_type.as_deref() else {
                return false;
            };
            match self.namespaces.get(&current.namespace).and_then(|ns| ns.get(base)) {
                Some(next) => current = next.as_ref(),
                None => return false,
            }
        }
    }

    /// Retrievable type names in the given namespace, sorted
    pub fn retrievable_types(&self, namespace: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .namespaces
            .get(namespace)
            .map(|types| {
                types
                    .values()
                    .filter(|t| t.retrievable)
                    .map(|t| t.name.as_str())
                    .collect()
            })
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new("Test", "http://test.org");
        let mut quantity = TypeDescriptor::new("Quantity", "Test", TypeKind::Complex);
        quantity.elements.push(ElementDescriptor::new("value", "decimal"));
        let mut age = TypeDescriptor::new("Age", "Test", TypeKind::Complex);
        age.base_type = Some("Quantity".to_string());
        let mut patient = TypeDescriptor::new("Patient", "Test", TypeKind::Resource);
        patient.retrievable = true;
        registry.register(quantity);
        registry.register(age);
        registry.register(patient);
        registry
    }

    #[test]
    fn test_lookup_and_namespaces() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.lookup("Test", "Patient").is_some());
        assert!(registry.lookup("Other", "Patient").is_none());
        assert_eq!(registry.namespaces().collect::<Vec<_>>(), vec!["Test"]);
        assert_eq!(registry.retrievable_types("Test"), vec!["Patient"]);
    }

    #[test]
    fn test_inherited_elements() {
        let registry = registry();
        let age = registry.lookup("Test", "Age").unwrap();
        assert_eq!(
            registry.element(&age, "value").map(|e| e.element_type.as_str()),
            Some("decimal")
        );
        assert!(registry.is_derived_from(&age, "Quantity"));
        assert!(!registry.is_derived_from(&age, "Patient"));
    }
}
