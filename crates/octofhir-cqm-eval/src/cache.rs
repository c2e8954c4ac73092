//! Asset cache
//!
//! [`AssetCache`] parses the library pool, value-set bundle and data bundle
//! supplied by a [`ResourceSource`] the first time they are needed and hands
//! out shared references afterwards. The cache is filled at most once and is
//! never invalidated; a fresh cache starts a fresh session.

use crate::error::EvalResult;
use crate::evaluator::{EvaluatorOptions, ExpressionEvaluator};
use crate::library::{ContentResolver, LibraryPool};
use octofhir_cqm_model::{ResourceBundle, TypeResolver};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Supplier of raw resource documents
pub trait ResourceSource: Send + Sync {
    /// Library documents: ELM JSON, FHIR `Library` resources or bundles of them
    fn library_texts(&self) -> EvalResult<Vec<String>>;

    /// The value-set bundle, if any
    fn value_set_text(&self) -> EvalResult<Option<String>>;

    /// The patient data bundle, if any
    fn data_text(&self) -> EvalResult<Option<String>>;
}

/// Parsed assets shared by every evaluation of a session
#[derive(Debug)]
pub struct Assets {
    pub libraries: Arc<LibraryPool>,
    pub value_sets: Arc<ResourceBundle>,
    pub data: Arc<ResourceBundle>,
}

impl Assets {
    /// Build an evaluator over these assets
    pub fn evaluator(&self, resolver: Arc<dyn TypeResolver>, options: EvaluatorOptions) -> EvalResult<ExpressionEvaluator> {
        ExpressionEvaluator::with_resolver(
            Arc::clone(&self.libraries) as Arc<dyn ContentResolver>,
            &self.value_sets,
            Arc::clone(&self.data),
            resolver,
            options,
        )
    }
}

/// Construct-once, read-many cache of parsed assets
pub struct AssetCache {
    source: Arc<dyn ResourceSource>,
    resolver: Arc<dyn TypeResolver>,
    assets: OnceCell<Arc<Assets>>,
}

impl AssetCache {
    pub fn new(source: Arc<dyn ResourceSource>, resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            source,
            resolver,
            assets: OnceCell::new(),
        }
    }

    /// Parsed assets, loading them on first use.
    ///
    /// A failed load leaves the cache empty so the caller sees the error.
    pub fn get(&self) -> EvalResult<Arc<Assets>> {
        self.assets.get_or_try_init(|| self.load().map(Arc::new)).cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.assets.get().is_some()
    }

    pub fn resolver(&self) -> &Arc<dyn TypeResolver> {
        &self.resolver
    }

    fn load(&self) -> EvalResult<Assets> {
        let texts = self.source.library_texts()?;
        let libraries = LibraryPool::from_texts(texts.iter().map(String::as_str))?;
        let value_sets = self.bundle(self.source.value_set_text()?)?;
        let data = self.bundle(self.source.data_text()?)?;
        log::debug!(
            "loaded {} libraries, {} terminology resources and {} data resources",
            libraries.len(),
            value_sets.len(),
            data.len()
        );
        Ok(Assets {
            libraries: Arc::new(libraries),
            value_sets: Arc::new(value_sets),
            data: Arc::new(data),
        })
    }

    fn bundle(&self, text: Option<String>) -> EvalResult<ResourceBundle> {
        match text {
            Some(text) => Ok(ResourceBundle::parse(&text, self.resolver.as_ref())?),
            None => Ok(ResourceBundle::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, EvalError};
    use octofhir_cqm_model::fhir_r4_resolver;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
        data: String,
    }

    impl ResourceSource for CountingSource {
        fn library_texts(&self) -> EvalResult<Vec<String>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![json!({"library": {"identifier": {"id": "Empty", "version": "1"}}}).to_string()])
        }

        fn value_set_text(&self) -> EvalResult<Option<String>> {
            Ok(None)
        }

        fn data_text(&self) -> EvalResult<Option<String>> {
            Ok(Some(self.data.clone()))
        }
    }

    fn cache(data: &str) -> (Arc<CountingSource>, AssetCache) {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            data: data.to_string(),
        });
        let cache = AssetCache::new(Arc::clone(&source) as Arc<dyn ResourceSource>, Arc::new(fhir_r4_resolver().unwrap()));
        (source, cache)
    }

    #[test]
    fn test_loads_once() {
        let bundle = json!({"resourceType": "Bundle", "entry": [
            {"resource": {"resourceType": "Patient", "id": "p1"}}
        ]});
        let (source, cache) = cache(&bundle.to_string());
        assert!(!cache.is_loaded());
        let first = cache.get().unwrap();
        let second = cache.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(first.data.patient_ids(), vec!["p1".to_string()]);
        assert!(first.value_sets.is_empty());
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let (source, cache) = cache("{");
        let err: EvalError = cache.get().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(cache.get().is_err());
        assert!(!cache.is_loaded());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
