//! Model error types

/// Errors raised while loading type tables, resolving types or converting data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A logical type name could not be resolved after the namespace search
    #[error("cannot resolve type '{name}' (searched: {searched})")]
    TypeResolution { name: String, searched: String },

    /// Resource or type-table text failed to parse or has the wrong shape
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl ModelError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedInput(err.to_string())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
