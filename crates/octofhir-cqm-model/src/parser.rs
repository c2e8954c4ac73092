//! Type table parser
//!
//! Reads a JSON type table (a ModelInfo-shaped document) into [`ModelInfo`].
//! Element types use `list<T>` for repeating elements; choice elements list
//! their allowed types under `choice`.

use crate::error::ModelError;
use crate::types::{ElementDescriptor, ModelInfo, TypeDescriptor, TypeKind};
use serde_json::Value as JsonValue;

/// Parse a type table from JSON text
pub fn parse_model_info(json_content: &str) -> Result<ModelInfo, ModelError> {
    let json: JsonValue = serde_json::from_str(json_content)?;

    let name = json["name"]
        .as_str()
        .ok_or_else(|| ModelError::malformed("type table is missing `name`"))?;
    let mut model_info = ModelInfo::new(
        name,
        json["version"].as_str().unwrap_or(""),
        json["url"].as_str().unwrap_or(""),
    );

    if let Some(type_infos) = json["typeInfo"].as_array() {
        for type_json in type_infos {
            model_info.types.push(parse_type_json(type_json, name)?);
        }
    }

    Ok(model_info)
}

fn parse_type_json(json: &JsonValue, default_namespace: &str) -> Result<TypeDescriptor, ModelError> {
    let name = json["name"]
        .as_str()
        .ok_or_else(|| ModelError::malformed("type entry is missing `name`"))?;
    let kind = match json["kind"].as_str() {
        Some("primitive") => TypeKind::Primitive,
        Some("resource") => TypeKind::Resource,
        Some("backbone") => TypeKind::Backbone,
        Some("complex") | None => TypeKind::Complex,
        Some(other) => {
            return Err(ModelError::malformed(format!(
                "type '{}' has unknown kind '{}'",
                name, other
            )));
        }
    };

    let mut descriptor = TypeDescriptor::new(
        name,
        json["namespace"].as_str().unwrap_or(default_namespace),
        kind,
    );
    descriptor.base_type = json["baseType"].as_str().map(String::from);
    descriptor.retrievable = json["retrievable"].as_bool().unwrap_or(false);
    descriptor.primary_code_path = json["primaryCodePath"].as_str().map(String::from);
    descriptor.primary_date_path = json["primaryDatePath"].as_str().map(String::from);

    if let Some(paths) = json["contextPath"].as_object() {
        for (context, path) in paths {
            let path = path.as_str().ok_or_else(|| {
                ModelError::malformed(format!("context path for '{}' on '{}' is not a string", context, name))
            })?;
            descriptor.context_paths.insert(context.clone(), path.to_string());
        }
    }

    if let Some(elements) = json["element"].as_array() {
        for elem_json in elements {
            descriptor.elements.push(parse_element_json(elem_json, name)?);
        }
    }

    Ok(descriptor)
}

fn parse_element_json(json: &JsonValue, owner: &str) -> Result<ElementDescriptor, ModelError> {
    let name = json["name"]
        .as_str()
        .ok_or_else(|| ModelError::malformed(format!("element of '{}' is missing `name`", owner)))?;

    if let Some(choices) = json["choice"].as_array() {
        let choices: Vec<&str> = choices.iter().filter_map(JsonValue::as_str).collect();
        return Ok(ElementDescriptor::choice(name, choices));
    }

    let element_type = json["type"]
        .as_str()
        .ok_or_else(|| ModelError::malformed(format!("element '{}.{}' is missing `type`", owner, name)))?;

    // list<T> marks a repeating element
    let inner = element_type
        .strip_prefix("list<")
        .or_else(|| element_type.strip_prefix("List<"))
        .and_then(|inner| inner.strip_suffix('>'));

    Ok(match inner {
        Some(inner) => ElementDescriptor::list(name, inner),
        None => ElementDescriptor::new(name, element_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_type_table() {
        let json = r#"{
            "name": "TestModel",
            "version": "1.0.0",
            "url": "http://test.org",
            "typeInfo": [{
                "name": "Patient",
                "kind": "resource",
                "retrievable": true,
                "contextPath": {"Patient": "id"},
                "element": [
                    {"name": "id", "type": "string"},
                    {"name": "name", "type": "list<HumanName>"},
                    {"name": "deceased", "choice": ["boolean", "dateTime"]}
                ]
            }, {
                "name": "PatientContactComponent",
                "namespace": "TestModel.Backbone",
                "kind": "backbone"
            }]
        }"#;

        let model = parse_model_info(json).unwrap();
        assert_eq!(model.name, "TestModel");
        assert_eq!(model.url, "http://test.org");
        assert_eq!(model.types.len(), 2);

        let patient = &model.types[0];
        assert_eq!(patient.namespace, "TestModel");
        assert_eq!(patient.kind, TypeKind::Resource);
        assert!(patient.retrievable);
        assert_eq!(patient.context_path("Patient"), Some("id"));

        let name = patient.element("name").unwrap();
        assert!(name.is_list);
        assert_eq!(name.element_type, "HumanName");
        assert!(patient.element("deceased").unwrap().is_choice());

        assert_eq!(model.types[1].namespace, "TestModel.Backbone");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let json = r#"{"name": "M", "typeInfo": [{"name": "X", "kind": "alien"}]}"#;
        assert!(matches!(
            parse_model_info(json),
            Err(ModelError::MalformedInput(_))
        ));
    }
}
