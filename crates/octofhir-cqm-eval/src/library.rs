//! Library resolution and loading
//!
//! A [`LibraryPool`] indexes the supplied library resources by
//! `(name, version)`. Resources are raw ELM JSON, FHIR `Library` resources
//! carrying an `application/elm+json` attachment, or `Bundle`s of those.
//!
//! [`LibraryManager`] resolves a primary library and its includes through a
//! [`ContentResolver`], parses each one once, and caches compiled libraries
//! by resolved identity for the lifetime of the manager.

use crate::error::{EvalError, EvalResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use octofhir_cqm_elm::{Library, library_from_value};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Library name served by the engine's built-in helper functions
pub const FHIR_HELPERS: &str = "FHIRHelpers";

const ELM_JSON_CONTENT_TYPE: &str = "application/elm+json";

/// Library content selected by a resolver
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryContent {
    pub name: String,
    pub version: Option<String>,
    /// ELM JSON document
    pub elm: Arc<JsonValue>,
}

/// Resolves library content by name and minimum version
pub trait ContentResolver: Send + Sync {
    /// Highest available version `>= min_version`, or the highest overall
    /// when no constraint is given.
    fn resolve(&self, name: &str, min_version: Option<&str>) -> EvalResult<LibraryContent>;
}

/// Compare dotted version strings.
///
/// Segments compare numerically when both are numeric and lexically
/// otherwise; missing segments count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Version ordering where an unversioned library sorts lowest
fn compare_optional_versions(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_versions(a, b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

/// In-memory pool of library resources
#[derive(Debug, Clone, Default)]
pub struct LibraryPool {
    entries: Vec<LibraryContent>,
}

impl LibraryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from resource texts
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> EvalResult<Self> {
        let mut pool = Self::new();
        for text in texts {
            pool.add_text(text)?;
        }
        Ok(pool)
    }

    /// Add one resource document
    pub fn add_text(&mut self, text: &str) -> EvalResult<()> {
        let json: JsonValue = serde_json::from_str(text)?;
        self.add_value(json)
    }

    /// Add a parsed ELM document, FHIR `Library` or `Bundle` of libraries
    pub fn add_value(&mut self, json: JsonValue) -> EvalResult<()> {
        match json.get("resourceType").and_then(JsonValue::as_str) {
            Some("Bundle") => {
                for entry in json
                    .get("entry")
                    .and_then(JsonValue::as_array)
                    .into_iter()
                    .flatten()
                {
                    if let Some(resource) = entry.get("resource") {
                        if resource.get("resourceType").and_then(JsonValue::as_str) == Some("Library") {
                            self.add_fhir_library(resource)?;
                        }
                    }
                }
                Ok(())
            }
            Some("Library") => self.add_fhir_library(&json),
            Some(other) => Err(EvalError::malformed(format!(
                "expected ELM or a Library resource, found {}",
                other
            ))),
            None => self.add_elm(json),
        }
    }

    fn add_elm(&mut self, elm: JsonValue) -> EvalResult<()> {
        let identifier = elm
            .pointer("/library/identifier")
            .or_else(|| elm.get("identifier"))
            .ok_or_else(|| EvalError::malformed("ELM document has no library identifier"))?;
        let name = identifier
            .get("id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| EvalError::malformed("ELM library identifier has no id"))?
            .to_string();
        let version = identifier
            .get("version")
            .and_then(JsonValue::as_str)
            .map(String::from);
        log::debug!("pooled library {} version {:?}", name, version);
        self.entries.push(LibraryContent {
            name,
            version,
            elm: Arc::new(elm),
        });
        Ok(())
    }

    fn add_fhir_library(&mut self, resource: &JsonValue) -> EvalResult<()> {
        let attachment = resource
            .get("content")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .find(|c| c.get("contentType").and_then(JsonValue::as_str) == Some(ELM_JSON_CONTENT_TYPE));
        let Some(attachment) = attachment else {
            // Libraries with only CQL text cannot be executed without translation
            log::debug!(
                "skipping Library {:?} without {} content",
                resource.get("name"),
                ELM_JSON_CONTENT_TYPE
            );
            return Ok(());
        };
        let data = attachment
            .get("data")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| EvalError::malformed("Library attachment has no data"))?;
        let bytes = BASE64
            .decode(data.trim())
            .map_err(|e| EvalError::malformed(format!("Library attachment is not base64: {}", e)))?;
        let elm: JsonValue = serde_json::from_slice(&bytes)?;
        self.add_elm(elm)
    }

    pub fn entries(&self) -> &[LibraryContent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContentResolver for LibraryPool {
    fn resolve(&self, name: &str, min_version: Option<&str>) -> EvalResult<LibraryContent> {
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .filter(|e| match (min_version, e.version.as_deref()) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(min), Some(version)) => compare_versions(version, min) != Ordering::Less,
            })
            .max_by(|a, b| compare_optional_versions(a.version.as_deref(), b.version.as_deref()))
            .cloned()
            .ok_or_else(|| EvalError::library_not_found(name, min_version))
    }
}

/// How translator options recorded in a library are checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OptionsPolicy {
    /// Accept every library; re-translation is unavailable at runtime
    #[default]
    Tolerate,
    /// Reject libraries missing any of these translator options
    Require(BTreeSet<String>),
}

impl OptionsPolicy {
    pub fn require<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Require(options.into_iter().map(Into::into).collect())
    }

    /// Check a compiled library against the policy
    pub fn check(&self, library: &Library) -> EvalResult<()> {
        let options = library.translator_options().unwrap_or_default();
        match self {
            Self::Tolerate => {
                log::debug!(
                    "accepting library {} without option check (translator options: [{}])",
                    library.name(),
                    options.join(", ")
                );
                Ok(())
            }
            Self::Require(required) => {
                let missing: Vec<String> = required
                    .iter()
                    .filter(|r| !options.contains(r))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(EvalError::IncompatibleLibrary {
                        library: library.name().to_string(),
                        missing,
                    })
                }
            }
        }
    }
}

/// Target of an include alias
#[derive(Debug, Clone)]
pub enum LibraryRef {
    Loaded(Arc<Library>),
    /// `FHIRHelpers` served by built-in functions
    BuiltinHelpers,
}

/// A primary library with its resolved includes, one version per name
#[derive(Debug, Clone)]
pub struct LibrarySet {
    main: Arc<Library>,
    libraries: IndexMap<String, Arc<Library>>,
    aliases: HashMap<(String, String), String>,
}

impl LibrarySet {
    /// A set holding a single library without includes
    pub fn single(library: impl Into<Arc<Library>>) -> Self {
        let main = library.into();
        let mut libraries = IndexMap::new();
        libraries.insert(main.name().to_string(), Arc::clone(&main));
        Self {
            main,
            libraries,
            aliases: HashMap::new(),
        }
    }

    pub fn main(&self) -> &Arc<Library> {
        &self.main
    }

    pub fn main_name(&self) -> &str {
        self.main.name()
    }

    /// Library by name
    pub fn get(&self, name: &str) -> Option<Arc<Library>> {
        self.libraries.get(name).cloned()
    }

    /// Loaded libraries in resolution order, primary first
    pub fn libraries(&self) -> impl Iterator<Item = &Arc<Library>> {
        self.libraries.values()
    }

    /// Resolve an include alias declared in `owner`
    pub fn resolve_alias(&self, owner: &str, alias: &str) -> EvalResult<LibraryRef> {
        match self.aliases.get(&(owner.to_string(), alias.to_string())) {
            Some(name) if name == FHIR_HELPERS && !self.libraries.contains_key(FHIR_HELPERS) => {
                Ok(LibraryRef::BuiltinHelpers)
            }
            Some(name) => self
                .get(name)
                .map(LibraryRef::Loaded)
                .ok_or_else(|| EvalError::library_not_found(name.as_str(), None)),
            None if alias == FHIR_HELPERS => Ok(LibraryRef::BuiltinHelpers),
            None => self
                .get(alias)
                .map(LibraryRef::Loaded)
                .ok_or_else(|| EvalError::library_not_found(alias, None)),
        }
    }
}

/// Resolves, compiles and caches libraries for one session
pub struct LibraryManager {
    resolver: Arc<dyn ContentResolver>,
    policy: OptionsPolicy,
    cache: RwLock<HashMap<(String, Option<String>), Arc<Library>>>,
}

impl LibraryManager {
    pub fn new(resolver: Arc<dyn ContentResolver>) -> Self {
        Self {
            resolver,
            policy: OptionsPolicy::default(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: OptionsPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &OptionsPolicy {
        &self.policy
    }

    /// Resolve and compile one library
    pub fn resolve_library(&self, name: &str, min_version: Option<&str>) -> EvalResult<Arc<Library>> {
        let content = self.resolver.resolve(name, min_version)?;
        let key = (content.name.clone(), content.version.clone());
        if let Some(library) = self.cache.read().get(&key) {
            return Ok(Arc::clone(library));
        }

        log::debug!(
            "compiling library {} version {:?} (requested >= {:?})",
            content.name,
            content.version,
            min_version
        );
        let library = library_from_value(content.elm.as_ref().clone())?;
        self.policy.check(&library)?;

        let library = Arc::new(library);
        self.cache.write().insert(key, Arc::clone(&library));
        Ok(library)
    }

    /// Load a primary library and every library it includes, transitively
    pub fn load(&self, name: &str, min_version: Option<&str>) -> EvalResult<LibrarySet> {
        let main = self.resolve_library(name, min_version)?;
        let mut set = LibrarySet::single(Arc::clone(&main));

        let mut pending = VecDeque::from([main]);
        while let Some(library) = pending.pop_front() {
            for include in library.includes() {
                set.aliases.insert(
                    (library.name().to_string(), include.local_identifier.clone()),
                    include.path.clone(),
                );
                if let Some(loaded) = set.libraries.get(&include.path) {
                    check_loaded_version(loaded, include.version.as_deref())?;
                    continue;
                }
                match self.resolve_library(&include.path, include.version.as_deref()) {
                    Ok(included) => {
                        set.libraries.insert(include.path.clone(), Arc::clone(&included));
                        pending.push_back(included);
                    }
                    Err(EvalError::LibraryNotFound { .. }) if include.path == FHIR_HELPERS => {
                        log::debug!("{} not supplied, using built-in helper functions", FHIR_HELPERS);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(set)
    }

    /// Number of compiled libraries held in the cache
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }
}

fn check_loaded_version(loaded: &Library, min_version: Option<&str>) -> EvalResult<()> {
    match min_version {
        Some(min) if compare_optional_versions(loaded.version(), Some(min)) == Ordering::Less => {
            Err(EvalError::library_not_found(loaded.name(), Some(min)))
        }
        _ => Ok(()),
    }
}
