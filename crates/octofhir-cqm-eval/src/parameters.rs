//! FHIR `Parameters` encoding of evaluation results
//!
//! Each expression result becomes one or more `parameter` entries named after
//! the expression. Lists repeat the parameter once per element, tuples nest
//! their elements as `part`, and resources are embedded under `resource`.
//! A list nested in a list becomes a single parameter whose `part` entries
//! are the inner elements.

use indexmap::IndexMap;
use octofhir_cqm_types::{CqlCode, CqlConcept, CqlInterval, CqlQuantity, CqlTuple, CqlValue};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue, json};

pub const EMPTY_LIST_EXTENSION: &str = "http://hl7.org/fhir/StructureDefinition/cqf-isEmptyList";
pub const DATA_ABSENT_EXTENSION: &str = "http://hl7.org/fhir/StructureDefinition/data-absent-reason";
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

/// Name of the leading parameter carrying the context label
pub const CONTEXT_PARAMETER: &str = "context";

/// Encode named results as a `Parameters` resource
pub fn to_parameters(values: &IndexMap<String, CqlValue>, label: Option<&str>) -> JsonValue {
    let mut parameter = Vec::new();
    if let Some(label) = label {
        parameter.push(json!({ "name": CONTEXT_PARAMETER, "valueString": label }));
    }
    for (name, value) in values {
        push_parameter(&mut parameter, name, value);
    }
    json!({ "resourceType": "Parameters", "parameter": parameter })
}

fn push_parameter(out: &mut Vec<JsonValue>, name: &str, value: &CqlValue) {
    match value {
        CqlValue::List(list) if list.is_empty() => out.push(json!({
            "name": name,
            "extension": [{ "url": EMPTY_LIST_EXTENSION, "valueBoolean": true }]
        })),
        CqlValue::List(list) => {
            for element in list.iter() {
                push_list_element(out, name, element);
            }
        }
        other => out.push(parameter(name, other)),
    }
}

/// An inner list keeps its nesting as one parameter holding its elements as `part`
fn push_list_element(out: &mut Vec<JsonValue>, name: &str, element: &CqlValue) {
    match element {
        CqlValue::List(inner) if !inner.is_empty() => {
            let mut parts = Vec::new();
            push_parameter(&mut parts, name, element);
            out.push(json!({ "name": name, "part": parts }));
        }
        other => push_parameter(out, name, other),
    }
}

fn parameter(name: &str, value: &CqlValue) -> JsonValue {
    let mut entry = Map::new();
    entry.insert("name".to_string(), JsonValue::from(name));
    match value {
        CqlValue::Null => {
            entry.insert(
                "extension".to_string(),
                json!([{ "url": DATA_ABSENT_EXTENSION, "valueCode": "unknown" }]),
            );
        }
        CqlValue::Tuple(tuple) => {
            entry.insert("part".to_string(), JsonValue::Array(parts(tuple)));
        }
        CqlValue::Resource(resource) => {
            entry.insert("resource".to_string(), resource.source.as_ref().clone());
        }
        other => {
            let (key, encoded) =
                value_element(other).unwrap_or_else(|| ("valueString", JsonValue::from(other.to_string())));
            entry.insert(key.to_string(), encoded);
        }
    }
    JsonValue::Object(entry)
}

fn parts(tuple: &CqlTuple) -> Vec<JsonValue> {
    let mut parts = Vec::new();
    for (name, value) in tuple.iter() {
        push_parameter(&mut parts, name, value);
    }
    parts
}

/// The `value[x]` key and encoding for a simple value
pub fn value_element(value: &CqlValue) -> Option<(&'static str, JsonValue)> {
    Some(match value {
        CqlValue::Boolean(b) => ("valueBoolean", JsonValue::Bool(*b)),
        CqlValue::Integer(i) => ("valueInteger", JsonValue::from(*i)),
        CqlValue::Decimal(d) => ("valueDecimal", decimal_json(*d)),
        CqlValue::String(s) => ("valueString", JsonValue::from(s.as_str())),
        CqlValue::Date(d) => ("valueDate", JsonValue::from(d.to_string())),
        CqlValue::DateTime(dt) => ("valueDateTime", JsonValue::from(dt.to_string())),
        CqlValue::Quantity(q) => ("valueQuantity", quantity_json(q)),
        CqlValue::Code(code) => ("valueCoding", coding_json(code)),
        CqlValue::Concept(concept) => ("valueCodeableConcept", concept_json(concept)),
        CqlValue::Interval(interval) => interval_element(interval)?,
        _ => return None,
    })
}

/// JSON number for a decimal, written with its exact digits and scale
pub fn decimal_json(value: Decimal) -> JsonValue {
    let text = value.to_string();
    text.parse::<serde_json::Number>()
        .map_or_else(|_| JsonValue::String(text), JsonValue::Number)
}

pub fn quantity_json(quantity: &CqlQuantity) -> JsonValue {
    let mut object = Map::new();
    object.insert("value".to_string(), decimal_json(quantity.value));
    if let Some(unit) = quantity.normalized_unit() {
        object.insert("unit".to_string(), JsonValue::from(unit));
        object.insert("system".to_string(), JsonValue::from(UCUM_SYSTEM));
        object.insert("code".to_string(), JsonValue::from(unit));
    }
    JsonValue::Object(object)
}

pub fn coding_json(code: &CqlCode) -> JsonValue {
    let mut object = Map::new();
    if !code.system.is_empty() {
        object.insert("system".to_string(), JsonValue::from(code.system.as_str()));
    }
    if let Some(version) = &code.version {
        object.insert("version".to_string(), JsonValue::from(version.as_str()));
    }
    object.insert("code".to_string(), JsonValue::from(code.code.as_str()));
    if let Some(display) = &code.display {
        object.insert("display".to_string(), JsonValue::from(display.as_str()));
    }
    JsonValue::Object(object)
}

pub fn concept_json(concept: &CqlConcept) -> JsonValue {
    let mut object = Map::new();
    object.insert(
        "coding".to_string(),
        JsonValue::Array(concept.codes.iter().map(coding_json).collect()),
    );
    if let Some(display) = &concept.display {
        object.insert("text".to_string(), JsonValue::from(display.as_str()));
    }
    JsonValue::Object(object)
}

/// Temporal intervals become a `Period`, numeric ones a `Range`
fn interval_element(interval: &CqlInterval) -> Option<(&'static str, JsonValue)> {
    let bound = interval.low().or(interval.high())?;
    match bound {
        CqlValue::Date(_) | CqlValue::DateTime(_) => {
            let mut period = Map::new();
            if let Some(low) = interval.low() {
                period.insert("start".to_string(), JsonValue::from(low.to_string()));
            }
            if let Some(high) = interval.high() {
                period.insert("end".to_string(), JsonValue::from(high.to_string()));
            }
            Some(("valuePeriod", JsonValue::Object(period)))
        }
        CqlValue::Quantity(_) | CqlValue::Integer(_) | CqlValue::Decimal(_) => {
            let mut range = Map::new();
            if let Some(low) = interval.low().and_then(range_bound) {
                range.insert("low".to_string(), low);
            }
            if let Some(high) = interval.high().and_then(range_bound) {
                range.insert("high".to_string(), high);
            }
            Some(("valueRange", JsonValue::Object(range)))
        }
        _ => None,
    }
}

fn range_bound(value: &CqlValue) -> Option<JsonValue> {
    match value {
        CqlValue::Quantity(q) => Some(quantity_json(q)),
        CqlValue::Integer(i) => Some(json!({ "value": i })),
        CqlValue::Decimal(d) => Some(json!({ "value": decimal_json(*d) })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_types::{CqlDate, CqlDateTime, CqlList};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn single(name: &str, value: CqlValue) -> JsonValue {
        let mut values = IndexMap::new();
        values.insert(name.to_string(), value);
        to_parameters(&values, None)
    }

    #[test]
    fn test_simple_values() {
        assert_eq!(
            single("IsAdult", CqlValue::Boolean(true)),
            json!({"resourceType": "Parameters", "parameter": [{"name": "IsAdult", "valueBoolean": true}]})
        );
        assert_eq!(
            single("Weight", CqlValue::Quantity(CqlQuantity::new(Decimal::new(725, 1), "kg")))["parameter"][0],
            json!({"name": "Weight", "valueQuantity": {
                "value": 72.5, "unit": "kg", "system": UCUM_SYSTEM, "code": "kg"}})
        );
        assert_eq!(
            single("Born", CqlValue::Date(CqlDate::new(2000, 1, 2)))["parameter"][0],
            json!({"name": "Born", "valueDate": "2000-01-02"})
        );
    }

    #[test]
    fn test_decimals_keep_their_digits() {
        let precise = Decimal::from_str("3.1415926535897932384626").unwrap();
        assert_eq!(
            single("Pi", CqlValue::Decimal(precise))["parameter"][0]["valueDecimal"].to_string(),
            "3.1415926535897932384626"
        );
        assert_eq!(decimal_json(Decimal::new(150, 2)).to_string(), "1.50");
        assert_eq!(decimal_json(Decimal::new(-42, 0)), json!(-42));
    }

    #[test]
    fn test_lists_repeat_and_empty_lists_are_flagged() {
        let params = single("Ages", CqlValue::list([CqlValue::Integer(1), CqlValue::Integer(2)]));
        assert_eq!(
            params["parameter"],
            json!([{"name": "Ages", "valueInteger": 1}, {"name": "Ages", "valueInteger": 2}])
        );
        let empty = single("None", CqlValue::List(CqlList::new()));
        assert_eq!(empty["parameter"][0]["extension"][0]["url"], json!(EMPTY_LIST_EXTENSION));
    }

    #[test]
    fn test_nested_lists_keep_their_shape() {
        let nested = CqlValue::list([
            CqlValue::list([CqlValue::Integer(1), CqlValue::Integer(2)]),
            CqlValue::List(CqlList::new()),
            CqlValue::Integer(3),
            CqlValue::list([CqlValue::list([CqlValue::Integer(4)])]),
        ]);
        assert_eq!(
            single("Groups", nested)["parameter"],
            json!([
                {"name": "Groups", "part": [
                    {"name": "Groups", "valueInteger": 1},
                    {"name": "Groups", "valueInteger": 2}
                ]},
                {"name": "Groups", "extension": [{"url": EMPTY_LIST_EXTENSION, "valueBoolean": true}]},
                {"name": "Groups", "valueInteger": 3},
                {"name": "Groups", "part": [
                    {"name": "Groups", "part": [{"name": "Groups", "valueInteger": 4}]}
                ]}
            ])
        );
    }

    #[test]
    fn test_null_tuple_and_label() {
        let mut tuple = CqlTuple::new();
        tuple.set("code", CqlValue::string("x"));
        tuple.set("missing", CqlValue::Null);
        let mut values = IndexMap::new();
        values.insert("Pair".to_string(), CqlValue::Tuple(tuple));
        let params = to_parameters(&values, Some("visit-1"));
        assert_eq!(
            params["parameter"],
            json!([
                {"name": "context", "valueString": "visit-1"},
                {"name": "Pair", "part": [
                    {"name": "code", "valueString": "x"},
                    {"name": "missing", "extension": [{"url": DATA_ABSENT_EXTENSION, "valueCode": "unknown"}]}
                ]}
            ])
        );
    }

    #[test]
    fn test_period() {
        let start = CqlDateTime::new(2024, 1, 1, 0, 0, 0, 0, Some(0));
        let end = CqlDateTime::new(2024, 12, 31, 23, 59, 59, 999, Some(0));
        let interval = CqlInterval::closed(CqlValue::DateTime(start), CqlValue::DateTime(end));
        assert_eq!(
            single("Period", CqlValue::Interval(interval))["parameter"][0],
            json!({"name": "Period", "valuePeriod": {
                "start": "2024-01-01T00:00:00.000Z", "end": "2024-12-31T23:59:59.999Z"}})
        );
    }
}
