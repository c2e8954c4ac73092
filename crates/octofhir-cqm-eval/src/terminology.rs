//! Terminology resolution
//!
//! Value-set membership and expansion answered from a preloaded bundle of
//! FHIR `ValueSet` resources. A value set contributes the codes of its
//! `expansion.contains` (nested entries included) and of its
//! `compose.include[].concept`.
//!
//! With eager expansion every value set is indexed into a hash set at
//! construction so membership is a single lookup; otherwise membership scans
//! the code list. Either way the provider is read-only after construction.

use crate::error::{EvalError, EvalResult};
use octofhir_cqm_model::ResourceBundle;
use octofhir_cqm_types::CqlCode;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Answers value-set membership and expansion queries
pub trait TerminologyProvider: Send + Sync {
    /// Whether `code` is a member of the value set.
    /// Unknown value-set ids fail with `TerminologyNotFound`.
    fn in_value_set(&self, code: &CqlCode, value_set_id: &str) -> EvalResult<bool>;

    /// All codes of the value set, in declaration order
    fn expand(&self, value_set_id: &str) -> EvalResult<Vec<CqlCode>>;

    /// Whether `code` belongs to the code system
    fn in_code_system(&self, code: &CqlCode, code_system_id: &str) -> bool {
        code.system == code_system_id
    }
}

#[derive(Debug, Default)]
struct ValueSetCodes {
    codes: Vec<CqlCode>,
    index: Option<HashSet<(String, String)>>,
}

impl ValueSetCodes {
    fn contains(&self, code: &CqlCode) -> bool {
        match &self.index {
            Some(index) => index.contains(&(code.system.clone(), code.code.clone())),
            None => self.codes.iter().any(|c| c.is_equivalent(code)),
        }
    }
}

/// [`TerminologyProvider`] over an in-memory value-set bundle
#[derive(Debug, Default)]
pub struct BundleTerminologyProvider {
    value_sets: HashMap<String, Arc<ValueSetCodes>>,
    eager: bool,
}

impl BundleTerminologyProvider {
    /// Build from the `ValueSet` resources of a bundle
    pub fn from_bundle(bundle: &ResourceBundle, expand_value_sets: bool) -> EvalResult<Self> {
        let mut provider = Self {
            value_sets: HashMap::new(),
            eager: expand_value_sets,
        };
        for resource in bundle.of_type("ValueSet") {
            provider.add_value_set(&resource.source)?;
        }
        log::debug!(
            "loaded {} value set keys (eager expansion: {})",
            provider.value_sets.len(),
            expand_value_sets
        );
        Ok(provider)
    }

    /// Whether membership tests use the precomputed index
    pub fn is_eager(&self) -> bool {
        self.eager
    }

    /// Register one `ValueSet` resource document
    pub fn add_value_set(&mut self, json: &JsonValue) -> EvalResult<()> {
        let url = json.get("url").and_then(JsonValue::as_str);
        let id = json.get("id").and_then(JsonValue::as_str);
        if url.is_none() && id.is_none() {
            return Err(EvalError::malformed("ValueSet has neither `url` nor `id`"));
        }

        let mut codes = Vec::new();
        if let Some(contains) = json.pointer("/expansion/contains").and_then(JsonValue::as_array) {
            collect_contains(contains, &mut codes);
        }
        if let Some(includes) = json.pointer("/compose/include").and_then(JsonValue::as_array) {
            for include in includes {
                let system = include.get("system").and_then(JsonValue::as_str).unwrap_or_default();
                let version = include.get("version").and_then(JsonValue::as_str);
                for concept in include
                    .get("concept")
                    .and_then(JsonValue::as_array)
                    .into_iter()
                    .flatten()
                {
                    if let Some(code) = concept.get("code").and_then(JsonValue::as_str) {
                        codes.push(CqlCode::new(
                            code,
                            system,
                            version,
                            concept.get("display").and_then(JsonValue::as_str),
                        ));
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        codes.retain(|c: &CqlCode| seen.insert((c.system.clone(), c.code.clone())));
        let index = self.eager.then_some(seen);

        let entry = Arc::new(ValueSetCodes { codes, index });
        let version = json.get("version").and_then(JsonValue::as_str);
        for key in [url, id].into_iter().flatten() {
            self.value_sets.insert(key.to_string(), Arc::clone(&entry));
            if let Some(version) = version {
                self.value_sets
                    .insert(format!("{}|{}", key, version), Arc::clone(&entry));
            }
        }
        Ok(())
    }

    /// Exact key lookup. A versioned id never falls back to another version.
    fn lookup(&self, value_set_id: &str) -> EvalResult<&ValueSetCodes> {
        self.value_sets
            .get(value_set_id)
            .map(Arc::as_ref)
            .ok_or_else(|| EvalError::terminology_not_found(value_set_id))
    }
}

fn collect_contains(contains: &[JsonValue], codes: &mut Vec<CqlCode>) {
    for entry in contains {
        if let Some(code) = entry.get("code").and_then(JsonValue::as_str) {
            codes.push(CqlCode::new(
                code,
                entry.get("system").and_then(JsonValue::as_str).unwrap_or_default(),
                entry.get("version").and_then(JsonValue::as_str),
                entry.get("display").and_then(JsonValue::as_str),
            ));
        }
        if let Some(nested) = entry.get("contains").and_then(JsonValue::as_array) {
            collect_contains(nested, codes);
        }
    }
}

impl TerminologyProvider for BundleTerminologyProvider {
    fn in_value_set(&self, code: &CqlCode, value_set_id: &str) -> EvalResult<bool> {
        Ok(self.lookup(value_set_id)?.contains(code))
    }

    fn expand(&self, value_set_id: &str) -> EvalResult<Vec<CqlCode>> {
        Ok(self.lookup(value_set_id)?.codes.clone())
    }
}
