//! FHIR R4 type table
//!
//! Embedded FHIR R4 type table for clinical logic evaluation. Nested component
//! types live in the `FHIR.Backbone` namespace under their synthesized names.

use crate::error::ModelError;
use crate::registry::TypeRegistry;
use crate::resolver::RegistryTypeResolver;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// FHIR model namespace URI
pub const FHIR_MODEL_URL: &str = "http://hl7.org/fhir";

/// FHIR R4 type table (embedded at compile time)
pub const FHIR_R4_TYPES_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/resources/fhir-r4-types.json"
));

/// Lazily initialized FHIR R4 type registry
pub static FHIR_R4_REGISTRY: Lazy<Result<Arc<TypeRegistry>, ModelError>> =
    Lazy::new(|| TypeRegistry::from_json(FHIR_R4_TYPES_JSON).map(Arc::new));

/// Get the FHIR R4 type registry
pub fn fhir_r4_registry() -> Result<Arc<TypeRegistry>, ModelError> {
    FHIR_R4_REGISTRY.clone()
}

/// Type resolver over the FHIR R4 registry with the standard namespace order
pub fn fhir_r4_resolver() -> Result<RegistryTypeResolver, ModelError> {
    Ok(RegistryTypeResolver::fhir(fhir_r4_registry()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TypeResolver;
    use crate::types::TypeKind;

    #[test]
    fn test_embedded_table_loads() {
        let registry = fhir_r4_registry().unwrap();
        assert_eq!(registry.model_name(), "FHIR");
        assert_eq!(registry.model_version(), "4.0.1");
        assert_eq!(registry.model_url(), FHIR_MODEL_URL);
        assert!(registry.retrievable_types("FHIR").contains(&"Observation"));
    }

    #[test]
    fn test_dose_and_rate_resolves_through_backbone_namespace() {
        let resolver = fhir_r4_resolver().unwrap();
        let descriptor = resolver.resolve_type("Dosage.DoseAndRate").unwrap();
        assert_eq!(descriptor.namespace, "FHIR.Backbone");
        assert_eq!(descriptor.name, "DosageDoseAndRateComponent");
        assert_eq!(descriptor.kind, TypeKind::Backbone);
    }

    #[test]
    fn test_every_element_type_resolves() {
        let resolver = fhir_r4_resolver().unwrap();
        let registry = fhir_r4_registry().unwrap();
        for namespace in registry.namespaces().collect::<Vec<_>>() {
            for name in ["Patient", "Observation", "Dosage", "ObservationComponentComponent"] {
                let Some(descriptor) = registry.lookup(namespace, name) else {
                    continue;
                };
                for element in &descriptor.elements {
                    let types: Vec<&str> = if element.is_choice() {
                        element.choices.iter().map(String::as_str).collect()
                    } else {
                        vec![element.element_type.as_str()]
                    };
                    for ty in types {
                        assert!(
                            resolver.resolve_type(ty).is_ok(),
                            "{}.{} has unresolvable type {}",
                            name,
                            element.name,
                            ty
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_inherited_id_element() {
        let resolver = fhir_r4_resolver().unwrap();
        let patient = resolver.resolve_type("FHIR.Patient").unwrap();
        let id = resolver.element_of(&patient, "id").unwrap();
        assert_eq!(id.element_type, "id");
    }
}
