//! Evaluation errors

use octofhir_cqm_model::ModelError;
use thiserror::Error;

/// Result type for evaluation operations
pub type EvalResult<T> = Result<T, EvalError>;

/// Error category used by callers to decide how to react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LibraryNotFound,
    ExpressionNotFound,
    TerminologyNotFound,
    TypeResolution,
    MalformedInput,
    /// Runtime fault while evaluating an expression
    Evaluation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LibraryNotFound => "LibraryNotFoundError",
            Self::ExpressionNotFound => "ExpressionNotFoundError",
            Self::TerminologyNotFound => "TerminologyNotFoundError",
            Self::TypeResolution => "TypeResolutionError",
            Self::MalformedInput => "MalformedInputError",
            Self::Evaluation => "EvaluationError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while loading libraries or evaluating expressions
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// No library in the pool matches the requested name and version
    #[error("library not found: {name}{}", version.as_deref().map(|v| format!(" (version >= {})", v)).unwrap_or_default())]
    LibraryNotFound { name: String, version: Option<String> },

    /// A library was found but rejected by the options policy
    #[error("library {library} is incompatible: missing translator options {}", missing.join(", "))]
    IncompatibleLibrary { library: String, missing: Vec<String> },

    /// Named expression absent from the library
    #[error("expression '{name}' not found in library {library}")]
    ExpressionNotFound { library: String, name: String },

    /// Referenced value set is absent from the terminology bundle
    #[error("value set not found: {id}")]
    TerminologyNotFound { id: String },

    /// Logical type unresolvable after the namespace search
    #[error("cannot resolve type '{name}' (searched: {searched})")]
    TypeResolution { name: String, searched: String },

    /// Input text failed to parse or has the wrong shape
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Type mismatch error
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Invalid operand error
    #[error("invalid operand for {operator}: {message}")]
    InvalidOperand { operator: String, message: String },

    /// Arithmetic overflow
    #[error("arithmetic overflow in {operation}")]
    Overflow { operation: String },

    /// Undefined function reference
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },

    /// Undefined parameter
    #[error("undefined parameter: {name}")]
    UndefinedParameter { name: String },

    /// Undefined alias, let or operand in the current scope
    #[error("undefined identifier: {name}")]
    UndefinedIdentifier { name: String },

    /// Undefined code system, code or concept definition
    #[error("undefined {kind}: {name}")]
    UndefinedDefinition { kind: &'static str, name: String },

    /// Invalid regex pattern
    #[error("invalid regex pattern: {pattern}")]
    InvalidRegex { pattern: String },

    /// Conversion error
    #[error("cannot convert {from_type} to {to_type}")]
    ConversionError { from_type: String, to_type: String },

    /// Node type outside the supported expression set
    #[error("unsupported expression type: {expr_type}")]
    UnsupportedExpression { expr_type: String },

    /// Maximum recursion depth exceeded
    #[error("maximum recursion depth exceeded")]
    RecursionLimit,

    /// Internal error
    #[error("internal evaluation error: {message}")]
    Internal { message: String },
}

impl EvalError {
    /// Taxonomy category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LibraryNotFound { .. } | Self::IncompatibleLibrary { .. } => ErrorKind::LibraryNotFound,
            Self::ExpressionNotFound { .. } => ErrorKind::ExpressionNotFound,
            Self::TerminologyNotFound { .. } => ErrorKind::TerminologyNotFound,
            Self::TypeResolution { .. } => ErrorKind::TypeResolution,
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            _ => ErrorKind::Evaluation,
        }
    }

    /// Whether the error aborts a whole evaluation rather than one subject
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Evaluation
    }

    pub fn library_not_found(name: impl Into<String>, version: Option<&str>) -> Self {
        Self::LibraryNotFound {
            name: name.into(),
            version: version.map(String::from),
        }
    }

    pub fn expression_not_found(library: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ExpressionNotFound {
            library: library.into(),
            name: name.into(),
        }
    }

    pub fn terminology_not_found(id: impl Into<String>) -> Self {
        Self::TerminologyNotFound { id: id.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid_operand(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperand {
            operator: operator.into(),
            message: message.into(),
        }
    }

    pub fn overflow(operation: impl Into<String>) -> Self {
        Self::Overflow {
            operation: operation.into(),
        }
    }

    pub fn undefined_function(name: impl Into<String>) -> Self {
        Self::UndefinedFunction { name: name.into() }
    }

    pub fn undefined_parameter(name: impl Into<String>) -> Self {
        Self::UndefinedParameter { name: name.into() }
    }

    pub fn undefined_identifier(name: impl Into<String>) -> Self {
        Self::UndefinedIdentifier { name: name.into() }
    }

    pub fn conversion_error(from_type: impl Into<String>, to_type: impl Into<String>) -> Self {
        Self::ConversionError {
            from_type: from_type.into(),
            to_type: to_type.into(),
        }
    }

    pub fn unsupported_expression(expr_type: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            expr_type: expr_type.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<ModelError> for EvalError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::TypeResolution { name, searched } => Self::TypeResolution { name, searched },
            ModelError::MalformedInput(message) => Self::MalformedInput(message),
        }
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedInput(err.to_string())
    }
}

impl From<octofhir_cqm_elm::SerializeError> for EvalError {
    fn from(err: octofhir_cqm_elm::SerializeError) -> Self {
        Self::MalformedInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EvalError::library_not_found("L", None), ErrorKind::LibraryNotFound, true)]
    #[case(EvalError::expression_not_found("L", "X"), ErrorKind::ExpressionNotFound, true)]
    #[case(EvalError::terminology_not_found("http://vs"), ErrorKind::TerminologyNotFound, true)]
    #[case(EvalError::malformed("bad"), ErrorKind::MalformedInput, true)]
    #[case(EvalError::RecursionLimit, ErrorKind::Evaluation, false)]
    #[case(EvalError::unsupported_expression("Ln"), ErrorKind::Evaluation, false)]
    fn test_kind_and_fatality(#[case] err: EvalError, #[case] kind: ErrorKind, #[case] fatal: bool) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.is_fatal(), fatal);
    }

    #[test]
    fn test_model_errors_keep_their_category() {
        let err: EvalError = ModelError::TypeResolution {
            name: "Dosage.Nope".to_string(),
            searched: "FHIR, FHIR.Backbone".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TypeResolution);
        assert_eq!(
            err.to_string(),
            "cannot resolve type 'Dosage.Nope' (searched: FHIR, FHIR.Backbone)"
        );
    }

    #[test]
    fn test_library_not_found_message() {
        assert_eq!(
            EvalError::library_not_found("Common", Some("2.0")).to_string(),
            "library not found: Common (version >= 2.0)"
        );
    }
}
