//! Type resolution
//!
//! Logical type names used by compiled libraries (`FHIR.Observation`,
//! `{http://hl7.org/fhir}Observation`, `Dosage.DoseAndRate`) are mapped to
//! concrete [`TypeDescriptor`]s in two steps:
//!
//! 1. Direct lookup of the unqualified name in the default namespace.
//! 2. For dotted names, split into `(outer, inner)` and look up the
//!    synthesized name `OuterInnerComponent` in each namespace of the search
//!    order, first match wins.
//!
//! The search order is fixed when the resolver is built, so a logical name
//! always resolves to the same descriptor.

use crate::error::ModelError;
use crate::registry::TypeRegistry;
use crate::types::{ElementDescriptor, TypeDescriptor};
use std::sync::Arc;

/// Namespace search order used for FHIR nested component types
pub const FHIR_NAMESPACE_SEARCH_ORDER: [&str; 2] = ["FHIR", "FHIR.Backbone"];

/// Maps logical type names to concrete descriptors
pub trait TypeResolver: Send + Sync {
    /// Resolve a logical type name
    fn resolve_type(&self, logical_name: &str) -> Result<Arc<TypeDescriptor>, ModelError>;

    /// Find an element on a type, including inherited elements
    fn element_of(&self, descriptor: &TypeDescriptor, name: &str) -> Option<ElementDescriptor>;

    /// Data-model namespace URI served by this resolver
    fn model_url(&self) -> &str;
}

/// [`TypeResolver`] backed by a [`TypeRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryTypeResolver {
    registry: Arc<TypeRegistry>,
    default_namespace: String,
    search_order: Vec<String>,
}

impl RegistryTypeResolver {
    pub fn new(
        registry: Arc<TypeRegistry>,
        default_namespace: impl Into<String>,
        search_order: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            registry,
            default_namespace: default_namespace.into(),
            search_order: search_order.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolver over a FHIR registry with the standard search order
    pub fn fhir(registry: Arc<TypeRegistry>) -> Self {
        Self::new(registry, "FHIR", FHIR_NAMESPACE_SEARCH_ORDER)
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn search_order(&self) -> &[String] {
        &self.search_order
    }

    /// Strip `{uri}` and `Model.` qualifiers
    fn unqualified<'a>(&self, logical_name: &'a str) -> &'a str {
        if let Some(rest) = logical_name.strip_prefix('{') {
            if let Some((_, name)) = rest.split_once('}') {
                return name;
            }
        }
        let model_prefix = self.registry.model_name();
        if !model_prefix.is_empty() {
            if let Some(name) = logical_name
                .strip_prefix(model_prefix)
                .and_then(|rest| rest.strip_prefix('.'))
            {
                return name;
            }
        }
        logical_name
    }
}

/// `Dosage.DoseAndRate` -> `DosageDoseAndRateComponent`
pub fn synthesized_component_name(logical_name: &str) -> Option<String> {
    let (outer, inner) = logical_name.split_once('.')?;
    if outer.is_empty() || inner.is_empty() {
        return None;
    }
    let inner: String = inner.split('.').collect();
    Some(format!("{}{}Component", outer, inner))
}

impl TypeResolver for RegistryTypeResolver {
    fn resolve_type(&self, logical_name: &str) -> Result<Arc<TypeDescriptor>, ModelError> {
        let name = self.unqualified(logical_name);

        if let Some(descriptor) = self.registry.lookup(&self.default_namespace, name) {
            return Ok(descriptor);
        }

        let not_found = || {
            let mut searched = vec![self.default_namespace.as_str()];
            for namespace in &self.search_order {
                if !searched.contains(&namespace.as_str()) {
                    searched.push(namespace);
                }
            }
            ModelError::TypeResolution {
                name: logical_name.to_string(),
                searched: searched.join(", "),
            }
        };

        let synthesized = synthesized_component_name(name).ok_or_else(not_found)?;
        for namespace in &self.search_order {
            if let Some(descriptor) = self.registry.lookup(namespace, &synthesized) {
                log::debug!(
                    "resolved '{}' to {}.{} via namespace fallback",
                    logical_name,
                    namespace,
                    synthesized
                );
                return Ok(descriptor);
            }
        }

        Err(not_found())
    }

    fn element_of(&self, descriptor: &TypeDescriptor, name: &str) -> Option<ElementDescriptor> {
        self.registry.element(descriptor, name).cloned()
    }

    fn model_url(&self) -> &str {
        self.registry.model_url()
    }
}
