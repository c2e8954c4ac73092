//! ELM JSON serialization
//!
//! Translator output wraps the library in an envelope (`{"library": {...}}`);
//! both the wrapped and the bare form are accepted on input.

use crate::model::Library;

/// Errors that can occur while reading or writing ELM
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but is not an ELM library
    #[error("not an ELM library: {0}")]
    NotALibrary(String),
}

#[derive(serde::Deserialize)]
struct Envelope {
    library: Library,
}

/// Parse an ELM library from JSON text
pub fn parse_library(input: &str) -> Result<Library, SerializeError> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    library_from_value(value)
}

/// Parse an ELM library from an already-decoded JSON document
pub fn library_from_value(value: serde_json::Value) -> Result<Library, SerializeError> {
    if value.get("library").is_some() {
        let envelope: Envelope = serde_json::from_value(value)?;
        return Ok(envelope.library);
    }
    if value.get("identifier").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    Err(SerializeError::NotALibrary(
        "missing `library` envelope and `identifier`".to_string(),
    ))
}

impl Library {
    /// Serialize to wrapped ELM JSON
    pub fn to_json(&self) -> Result<String, SerializeError> {
        let envelope = serde_json::json!({ "library": self });
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Deserialize from ELM JSON (wrapped or bare)
    pub fn from_json(json: &str) -> Result<Self, SerializeError> {
        parse_library(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccessModifier, Expression};
    use pretty_assertions::assert_eq;

    const ELM: &str = r#"{
        "library": {
            "annotation": [{
                "translatorVersion": "3.10.0",
                "translatorOptions": "EnableAnnotations, EnableLocators,DisableListDemotion",
                "type": "CqlToElmInfo"
            }],
            "identifier": {"id": "Adults", "version": "1.0.0"},
            "schemaIdentifier": {"id": "urn:hl7-org:elm", "version": "r1"},
            "usings": {"def": [
                {"localIdentifier": "System", "uri": "urn:hl7-org:elm-types:r1"},
                {"localIdentifier": "FHIR", "uri": "http://hl7.org/fhir", "version": "4.0.1"}
            ]},
            "statements": {"def": [
                {
                    "name": "Patient",
                    "context": "Patient",
                    "expression": {
                        "type": "SingletonFrom",
                        "operand": {"dataType": "{http://hl7.org/fhir}Patient", "type": "Retrieve"}
                    }
                },
                {
                    "localId": "4",
                    "name": "IsAdult",
                    "context": "Patient",
                    "accessLevel": "Public",
                    "expression": {
                        "type": "GreaterOrEqual",
                        "operand": [
                            {"type": "CalculateAge", "precision": "Year",
                             "operand": {"type": "Property", "path": "birthDate.value",
                                         "source": {"type": "ExpressionRef", "name": "Patient"}}},
                            {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Integer", "value": "18"}
                        ]
                    }
                },
                {
                    "type": "FunctionDef",
                    "name": "Twice",
                    "context": "Patient",
                    "accessLevel": "Private",
                    "operand": [{"name": "x", "operandType": "{urn:hl7-org:elm-types:r1}Integer"}],
                    "expression": {"type": "Multiply", "operand": [
                        {"type": "OperandRef", "name": "x"},
                        {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Integer", "value": "2"}
                    ]}
                },
                {
                    "name": "Exotic",
                    "context": "Patient",
                    "expression": {"type": "Ln", "operand": {"type": "Null"}}
                }
            ]}
        }
    }"#;

    #[test]
    fn test_parse_wrapped_library() {
        let library = parse_library(ELM).unwrap();
        assert_eq!(library.name(), "Adults");
        assert_eq!(library.version(), Some("1.0.0"));
        assert_eq!(library.statements().len(), 4);

        let is_adult = library.expression("IsAdult").unwrap();
        assert_eq!(is_adult.access_level, Some(AccessModifier::Public));
        assert!(matches!(
            is_adult.expression.as_deref(),
            Some(Expression::GreaterOrEqual(_))
        ));
    }

    #[test]
    fn test_function_definitions_are_separate_from_expressions() {
        let library = parse_library(ELM).unwrap();
        assert!(library.expression("Twice").is_none());
        let twice: Vec<_> = library.functions("Twice", 1).collect();
        assert_eq!(twice.len(), 1);
        assert!(!twice[0].is_public());
        assert_eq!(library.functions("Twice", 2).count(), 0);
    }

    #[test]
    fn test_unknown_node_types_parse_as_unsupported() {
        let library = parse_library(ELM).unwrap();
        let exotic = library.expression("Exotic").unwrap();
        assert!(matches!(
            exotic.expression.as_deref(),
            Some(Expression::Unsupported)
        ));
    }

    #[test]
    fn test_translator_options() {
        let library = parse_library(ELM).unwrap();
        assert_eq!(
            library.translator_options(),
            Some(vec![
                "EnableAnnotations".to_string(),
                "EnableLocators".to_string(),
                "DisableListDemotion".to_string(),
            ])
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let library = parse_library(ELM).unwrap();
        let json = library.to_json().unwrap();
        let reparsed = Library::from_json(&json).unwrap();
        assert_eq!(reparsed.name(), "Adults");
        assert_eq!(reparsed.statements().len(), 4);
    }

    #[test]
    fn test_retrieve_context_is_an_expression() {
        let library = library_from_value(serde_json::json!({"library": {
            "identifier": {"id": "Family"},
            "statements": {"def": [{
                "name": "MotherConditions",
                "expression": {
                    "type": "Retrieve",
                    "dataType": "{http://hl7.org/fhir}Condition",
                    "context": {"type": "ExpressionRef", "name": "Mother"}
                }
            }]}
        }}))
        .unwrap();
        let Some(Expression::Retrieve(retrieve)) = library.expression("MotherConditions").unwrap().expression.as_deref()
        else {
            panic!("expected a retrieve");
        };
        assert!(matches!(
            retrieve.context.as_deref(),
            Some(Expression::ExpressionRef(r)) if r.name == "Mother"
        ));
    }

    #[test]
    fn test_not_a_library() {
        let err = parse_library(r#"{"resourceType": "Patient"}"#).unwrap_err();
        assert!(matches!(err, SerializeError::NotALibrary(_)));
    }
}
