//! Type descriptors
//!
//! A descriptor is the concrete, in-process representation of a logical model
//! type: its namespace, its elements and the paths the data layer needs for
//! context, code and date filtering.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Broad category of a model type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Primitive,
    Complex,
    Resource,
    Backbone,
}

/// A table of type descriptors for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name (e.g., "FHIR")
    pub name: String,
    /// Model version
    pub version: String,
    /// Model URL, used as the data-model namespace URI
    pub url: String,
    /// Type definitions in declaration order
    pub types: Vec<TypeDescriptor>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            url: url.into(),
            types: Vec::new(),
        }
    }
}

/// Concrete type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name within its namespace
    pub name: String,
    /// Namespace the type is registered under
    pub namespace: String,
    pub kind: TypeKind,
    /// Base type name (same model)
    pub base_type: Option<String>,
    /// Whether the type can be the target of a retrieve
    pub retrievable: bool,
    /// Path filtered by terminology in retrieves
    pub primary_code_path: Option<String>,
    /// Path filtered by date ranges in retrieves
    pub primary_date_path: Option<String>,
    /// Context name to the path that references the context subject
    pub context_paths: IndexMap<String, String>,
    pub elements: Vec<ElementDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind,
            base_type: None,
            retrievable: false,
            primary_code_path: None,
            primary_date_path: None,
            context_paths: IndexMap::new(),
            elements: Vec::new(),
        }
    }

    /// `Namespace.Name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Get an element declared directly on this type
    pub fn element(&self, name: &str) -> Option<&ElementDescriptor> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Path to the subject of the given context (`Patient` -> `subject`)
    pub fn context_path(&self, context: &str) -> Option<&str> {
        self.context_paths.get(context).map(String::as_str)
    }
}

/// Element (property) of a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub name: String,
    /// Logical type name; empty for choice elements
    pub element_type: String,
    pub is_list: bool,
    /// Allowed types of a choice element (`value[x]`)
    pub choices: Vec<String>,
}

impl ElementDescriptor {
    pub fn new(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element_type: element_type.into(),
            is_list: false,
            choices: Vec::new(),
        }
    }

    pub fn list(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            is_list: true,
            ..Self::new(name, element_type)
        }
    }

    pub fn choice(name: impl Into<String>, choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            choices: choices.into_iter().map(Into::into).collect(),
            ..Self::new(name, "")
        }
    }

    pub fn is_choice(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Match a JSON key like `valueQuantity` against this choice element,
    /// returning the selected type
    pub fn choice_for_key(&self, key: &str) -> Option<&str> {
        let suffix = key.strip_prefix(self.name.as_str())?;
        self.choices
            .iter()
            .find(|choice| capitalize(choice) == suffix)
            .map(String::as_str)
    }
}

/// Uppercase the first character (`dateTime` -> `DateTime`)
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
