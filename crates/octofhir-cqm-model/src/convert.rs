//! FHIR JSON to runtime value conversion
//!
//! Field typing comes from the type resolver. Elements the type table does not
//! describe are converted structurally from their JSON shape.

use crate::error::ModelError;
use crate::resolver::TypeResolver;
use crate::types::TypeDescriptor;
use octofhir_cqm_types::{
    CqlCode, CqlConcept, CqlDate, CqlDateTime, CqlInterval, CqlList, CqlQuantity, CqlTuple,
    CqlValue, FhirResource,
};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;

/// Converts FHIR JSON resources into [`FhirResource`] values
pub struct FhirConverter<'a> {
    resolver: &'a dyn TypeResolver,
}

impl<'a> FhirConverter<'a> {
    pub fn new(resolver: &'a dyn TypeResolver) -> Self {
        Self { resolver }
    }

    /// Convert one resource document
    pub fn convert_resource(&self, json: &JsonValue) -> Result<FhirResource, ModelError> {
        let object = json
            .as_object()
            .ok_or_else(|| ModelError::malformed("resource is not a JSON object"))?;
        let resource_type = object
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ModelError::malformed("resource is missing `resourceType`"))?;

        let descriptor = match self.resolver.resolve_type(resource_type) {
            Ok(descriptor) => Some(descriptor),
            Err(_) => {
                log::debug!("no type descriptor for {}, converting structurally", resource_type);
                None
            }
        };

        let fields = self.convert_object(object, descriptor.as_deref(), resource_type)?;
        Ok(FhirResource {
            resource_type: resource_type.to_string(),
            id: object.get("id").and_then(JsonValue::as_str).map(String::from),
            fields,
            source: Arc::new(json.clone()),
        })
    }

    fn convert_object(
        &self,
        object: &Map<String, JsonValue>,
        descriptor: Option<&TypeDescriptor>,
        path: &str,
    ) -> Result<CqlTuple, ModelError> {
        let mut tuple = CqlTuple::new();
        for (key, value) in object {
            // `_field` entries carry primitive extensions
            if key == "resourceType" || key.starts_with('_') {
                continue;
            }
            let element_path = format!("{}.{}", path, key);

            let Some(descriptor) = descriptor else {
                tuple.set(key.clone(), self.convert_structural(value)?);
                continue;
            };

            if let Some(element) = self.resolver.element_of(descriptor, key) {
                if !element.is_choice() {
                    let converted = self.convert_typed(value, &element.element_type, &element_path)?;
                    tuple.set(key.clone(), converted);
                    continue;
                }
            }

            let choice = descriptor
                .elements
                .iter()
                .filter(|e| e.is_choice())
                .find_map(|e| e.choice_for_key(key).map(|ty| (e.name.clone(), ty.to_string())));
            match choice {
                Some((base_name, choice_type)) => {
                    let converted = self.convert_typed(value, &choice_type, &element_path)?;
                    tuple.set(base_name, converted);
                }
                None => tuple.set(key.clone(), self.convert_structural(value)?),
            }
        }
        Ok(tuple)
    }

    /// Convert a value whose logical type is known
    pub fn convert_typed(&self, value: &JsonValue, type_name: &str, path: &str) -> Result<CqlValue, ModelError> {
        match value {
            JsonValue::Null => return Ok(CqlValue::Null),
            JsonValue::Array(items) => {
                let elements = items
                    .iter()
                    .map(|item| self.convert_typed(item, type_name, path))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(CqlValue::List(CqlList::from_elements(elements)));
            }
            _ => {}
        }

        if let Some(primitive) = convert_primitive(value, type_name, path)? {
            return Ok(primitive);
        }

        let Some(object) = value.as_object() else {
            return Err(mismatch(path, type_name, value));
        };

        match type_name {
            "Coding" => Ok(coding_to_code(object).map_or(CqlValue::Null, CqlValue::Code)),
            "CodeableConcept" => Ok(CqlValue::Concept(codeable_concept(object))),
            "Quantity" | "SimpleQuantity" | "Age" | "Duration" | "Distance" | "Count" => {
                quantity(object, path)
            }
            "Period" => period(object, path),
            "Range" => range(object, path),
            _ => match self.resolver.resolve_type(type_name) {
                Ok(descriptor) => Ok(CqlValue::Tuple(self.convert_object(
                    object,
                    Some(&descriptor),
                    path,
                )?)),
                Err(_) => self.convert_structural(value),
            },
        }
    }

    /// Convert a value from its JSON shape alone
    pub fn convert_structural(&self, value: &JsonValue) -> Result<CqlValue, ModelError> {
        Ok(match value {
            JsonValue::Null => CqlValue::Null,
            JsonValue::Bool(b) => CqlValue::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => CqlValue::Integer(i),
                None => decimal_from_number(n).map_or(CqlValue::Null, CqlValue::Decimal),
            },
            JsonValue::String(s) => CqlValue::String(s.clone()),
            JsonValue::Array(items) => CqlValue::List(CqlList::from_elements(
                items
                    .iter()
                    .map(|item| self.convert_structural(item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            JsonValue::Object(object) => {
                if object.contains_key("resourceType") {
                    CqlValue::Resource(Arc::new(self.convert_resource(value)?))
                } else {
                    CqlValue::Tuple(self.convert_object(object, None, "")?)
                }
            }
        })
    }
}

fn mismatch(path: &str, expected: &str, value: &JsonValue) -> ModelError {
    let found = match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    ModelError::malformed(format!("{}: expected {}, found {}", path, expected, found))
}

/// Convert FHIR primitive types; `None` when `type_name` is not a primitive
fn convert_primitive(value: &JsonValue, type_name: &str, path: &str) -> Result<Option<CqlValue>, ModelError> {
    let converted = match type_name {
        "boolean" => value.as_bool().map(CqlValue::Boolean),
        "integer" | "positiveInt" | "unsignedInt" => value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(CqlValue::Integer),
        "decimal" => value
            .as_number()
            .and_then(decimal_from_number)
            .map(CqlValue::Decimal),
        "date" => value.as_str().and_then(CqlDate::parse).map(CqlValue::Date),
        "dateTime" | "instant" => value
            .as_str()
            .and_then(CqlDateTime::parse)
            .map(CqlValue::DateTime),
        "string" | "code" | "id" | "markdown" | "uri" | "url" | "canonical" | "oid" | "uuid"
        | "base64Binary" | "time" | "xhtml" => value.as_str().map(|s| CqlValue::String(s.to_string())),
        _ => return Ok(None),
    };
    converted
        .map(Some)
        .ok_or_else(|| mismatch(path, type_name, value))
}

fn decimal_from_number(number: &Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn str_field(object: &Map<String, JsonValue>, key: &str) -> Option<String> {
    object.get(key).and_then(JsonValue::as_str).map(String::from)
}

fn coding_to_code(object: &Map<String, JsonValue>) -> Option<CqlCode> {
    Some(CqlCode {
        code: str_field(object, "code")?,
        system: str_field(object, "system").unwrap_or_default(),
        version: str_field(object, "version"),
        display: str_field(object, "display"),
    })
}

fn codeable_concept(object: &Map<String, JsonValue>) -> CqlConcept {
    let codes = object
        .get("coding")
        .and_then(JsonValue::as_array)
        .map(|codings| {
            codings
                .iter()
                .filter_map(JsonValue::as_object)
                .filter_map(coding_to_code)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    CqlConcept::new(codes, str_field(object, "text"))
}

fn quantity(object: &Map<String, JsonValue>, path: &str) -> Result<CqlValue, ModelError> {
    let Some(value) = object.get("value") else {
        return Ok(CqlValue::Null);
    };
    let value = value
        .as_number()
        .and_then(decimal_from_number)
        .ok_or_else(|| mismatch(&format!("{}.value", path), "decimal", value))?;
    // UCUM code takes precedence over the human-readable unit
    let unit = str_field(object, "code").or_else(|| str_field(object, "unit"));
    Ok(CqlValue::Quantity(CqlQuantity { value, unit }))
}

fn period(object: &Map<String, JsonValue>, path: &str) -> Result<CqlValue, ModelError> {
    let bound = |key: &str| -> Result<Option<CqlValue>, ModelError> {
        match object.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => value
                .as_str()
                .and_then(CqlDateTime::parse)
                .map(|dt| Some(CqlValue::DateTime(dt)))
                .ok_or_else(|| mismatch(&format!("{}.{}", path, key), "dateTime", value)),
        }
    };
    let start = bound("start")?;
    let end = bound("end")?;
    if start.is_none() && end.is_none() {
        return Ok(CqlValue::Null);
    }
    Ok(CqlValue::Interval(CqlInterval::new(start, true, end, true)))
}

fn range(object: &Map<String, JsonValue>, path: &str) -> Result<CqlValue, ModelError> {
    let bound = |key: &str| -> Result<Option<CqlValue>, ModelError> {
        match object.get(key).and_then(JsonValue::as_object) {
            Some(q) => Ok(Some(quantity(q, &format!("{}.{}", path, key))?).filter(|v| !v.is_null())),
            None => Ok(None),
        }
    };
    let low = bound("low")?;
    let high = bound("high")?;
    if low.is_none() && high.is_none() {
        return Ok(CqlValue::Null);
    }
    Ok(CqlValue::Interval(CqlInterval::new(low, true, high, true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhir::fhir_r4_resolver;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_patient_fields_are_typed() {
        let resolver = fhir_r4_resolver().unwrap();
        let converter = FhirConverter::new(&resolver);
        let patient = converter
            .convert_resource(&json!({
                "resourceType": "Patient",
                "id": "p1",
                "gender": "female",
                "birthDate": "2000-05-14",
                "deceasedBoolean": false,
                "_gender": {"extension": []},
                "name": [{"family": "Doe", "given": ["Jane"]}]
            }))
            .unwrap();

        assert_eq!(patient.id.as_deref(), Some("p1"));
        assert_eq!(patient.get("gender"), Some(&CqlValue::string("female")));
        assert_eq!(
            patient.get("birthDate"),
            Some(&CqlValue::Date(CqlDate::new(2000, 5, 14)))
        );
        assert_eq!(patient.get("deceased"), Some(&CqlValue::Boolean(false)));
        assert!(patient.get("_gender").is_none());

        let names = patient.get("name").and_then(CqlValue::as_list).unwrap();
        let first = names.first().and_then(CqlValue::as_tuple).unwrap();
        assert_eq!(first.get("family"), Some(&CqlValue::string("Doe")));
    }

    #[test]
    fn test_observation_choice_and_clinical_types() {
        let resolver = fhir_r4_resolver().unwrap();
        let converter = FhirConverter::new(&resolver);
        let observation = converter
            .convert_resource(&json!({
                "resourceType": "Observation",
                "id": "o1",
                "status": "final",
                "code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}], "text": "SBP"},
                "subject": {"reference": "Patient/p1"},
                "effectivePeriod": {"start": "2024-01-01T10:00:00Z"},
                "valueQuantity": {"value": 120.5, "unit": "mmHg", "system": "http://unitsofmeasure.org", "code": "mm[Hg]"}
            }))
            .unwrap();

        let CqlValue::Concept(code) = observation.get("code").unwrap() else {
            panic!("code is not a concept");
        };
        assert_eq!(code.codes[0].code, "8480-6");
        assert_eq!(code.display.as_deref(), Some("SBP"));

        let CqlValue::Quantity(value) = observation.get("value").unwrap() else {
            panic!("value is not a quantity");
        };
        assert_eq!(value.value, Decimal::new(1205, 1));
        assert_eq!(value.unit.as_deref(), Some("mm[Hg]"));

        let CqlValue::Interval(effective) = observation.get("effective").unwrap() else {
            panic!("effective is not an interval");
        };
        assert!(effective.high().is_none());
    }

    #[test]
    fn test_backbone_elements_use_component_types() {
        let resolver = fhir_r4_resolver().unwrap();
        let converter = FhirConverter::new(&resolver);
        let request = converter
            .convert_resource(&json!({
                "resourceType": "MedicationRequest",
                "id": "m1",
                "dosageInstruction": [{
                    "doseAndRate": [{"doseQuantity": {"value": 5, "code": "mg"}}]
                }]
            }))
            .unwrap();

        let dosage = request.get("dosageInstruction").and_then(CqlValue::as_list).unwrap();
        let dose_and_rate = dosage
            .first()
            .and_then(CqlValue::as_tuple)
            .and_then(|d| d.get("doseAndRate"))
            .and_then(CqlValue::as_list)
            .and_then(|l| l.first())
            .and_then(CqlValue::as_tuple)
            .unwrap();
        assert!(matches!(dose_and_rate.get("dose"), Some(CqlValue::Quantity(_))));
    }

    #[test]
    fn test_malformed_primitive_is_reported() {
        let resolver = fhir_r4_resolver().unwrap();
        let converter = FhirConverter::new(&resolver);
        let err = converter
            .convert_resource(&json!({"resourceType": "Patient", "birthDate": "not-a-date"}))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::MalformedInput("Patient.birthDate: expected date, found string".to_string())
        );
    }

    #[test]
    fn test_unknown_resource_is_structural() {
        let resolver = fhir_r4_resolver().unwrap();
        let converter = FhirConverter::new(&resolver);
        let resource = converter
            .convert_resource(&json!({"resourceType": "Basic", "id": "b", "count": 3, "ratio": 0.25}))
            .unwrap();
        assert_eq!(resource.get("count"), Some(&CqlValue::Integer(3)));
        assert_eq!(resource.get("ratio"), Some(&CqlValue::Decimal(Decimal::new(25, 2))));
    }

    #[test]
    fn test_decimal_scale_is_kept() {
        let resolver = fhir_r4_resolver().unwrap();
        let converter = FhirConverter::new(&resolver);
        let json: JsonValue = serde_json::from_str(
            r#"{"resourceType": "Observation", "id": "o1", "status": "final",
                "valueQuantity": {"value": 1.50, "unit": "mg"}}"#,
        )
        .unwrap();
        let observation = converter.convert_resource(&json).unwrap();
        let Some(CqlValue::Quantity(quantity)) = observation.get("value") else {
            panic!("value is not a quantity");
        };
        assert_eq!(quantity.value.to_string(), "1.50");
    }
}
