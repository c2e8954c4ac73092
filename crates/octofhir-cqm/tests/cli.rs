//! Command Tests
//!
//! Inputs are written to a temporary directory and run through the same code
//! paths as the `cqm` binary.

#![cfg(feature = "cli")]

use octofhir_cqm::cli::InputPaths;
use octofhir_cqm::cli::evaluate::{self, EvaluateConfig};
use octofhir_cqm::cli::measure::{self, MeasureConfig};
use octofhir_cqm::measure::PopulationType;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn library() -> Value {
    let patient = json!({"type": "ExpressionRef", "name": "Patient"});
    json!({"library": {
        "identifier": {"id": "Cohort", "version": "1.2.0"},
        "statements": {"def": [
            {"name": "Patient", "context": "Patient", "accessLevel": "Public",
             "expression": {"type": "SingletonFrom", "operand": {"type": "Retrieve", "dataType": "{http://hl7.org/fhir}Patient"}}},
            {"name": "IsFemale", "context": "Patient", "accessLevel": "Public",
             "expression": {"type": "Equal", "operand": [
                {"type": "Property", "path": "gender", "source": patient},
                {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "female"}
             ]}},
            {"name": "Threshold", "context": "Patient", "accessLevel": "Public",
             "expression": {"type": "ParameterRef", "name": "Threshold"}}
        ]},
        "parameters": {"def": [{"name": "Threshold", "accessLevel": "Public"}]}
    }})
}

fn data() -> Value {
    json!({"resourceType": "Bundle", "entry": [
        {"resource": {"resourceType": "Patient", "id": "a", "gender": "female"}},
        {"resource": {"resourceType": "Patient", "id": "b", "gender": "male"}},
        {"resource": {"resourceType": "Patient", "id": "c", "gender": "female"}}
    ]})
}

fn cohort_measure() -> Value {
    json!({
        "resourceType": "Measure",
        "url": "http://example.org/fhir/Measure/women",
        "library": ["http://example.org/fhir/Library/Cohort|1.0.0"],
        "scoring": {"coding": [{"code": "cohort"}]},
        "group": [{"id": "g1", "population": [{
            "code": {"coding": [{"code": "initial-population"}]},
            "criteria": {"language": "text/cql-identifier", "expression": "IsFemale"}
        }]}]
    })
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            dir: TempDir::new().unwrap(),
        };
        fs::create_dir(workspace.dir.path().join("libraries")).unwrap();
        workspace.write("libraries/cohort.json", &library());
        workspace.write("data.json", &data());
        workspace.write("measure.json", &cohort_measure());
        workspace
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, value: &Value) {
        fs::write(self.path(name), value.to_string()).unwrap();
    }

    fn inputs(&self) -> InputPaths {
        InputPaths {
            libraries: vec![self.path("libraries")],
            value_sets: None,
            data: Some(self.path("data.json")),
        }
    }

    fn measure_config(&self) -> MeasureConfig {
        MeasureConfig {
            inputs: self.inputs(),
            measure: self.path("measure.json"),
            period_start: "2024-01-01".to_string(),
            period_end: "2024-12-31".to_string(),
            report_type: "population".to_string(),
            timestamp: Some("2024-06-01T12:00:00.000Z".to_string()),
            shards: 1,
            ..MeasureConfig::default()
        }
    }
}

// ============================================================================
// Evaluate
// ============================================================================

#[test]
fn test_evaluate_prints_parameters() {
    let workspace = Workspace::new();
    let config = EvaluateConfig {
        inputs: workspace.inputs(),
        primary: "Cohort".to_string(),
        expressions: vec!["IsFemale".to_string(), "Threshold".to_string()],
        context: Some("Patient=a".to_string()),
        label: Some("patient-a".to_string()),
        params: vec!["Threshold=3".to_string()],
        ..EvaluateConfig::default()
    };
    assert_eq!(
        evaluate::run(&config).unwrap(),
        json!({"resourceType": "Parameters", "parameter": [
            {"name": "context", "valueString": "patient-a"},
            {"name": "IsFemale", "valueBoolean": true},
            {"name": "Threshold", "valueInteger": 3}
        ]})
    );
}

#[test]
fn test_evaluate_reports_error_kind() {
    let workspace = Workspace::new();
    let config = EvaluateConfig {
        inputs: workspace.inputs(),
        primary: "Missing".to_string(),
        ..EvaluateConfig::default()
    };
    let err = evaluate::run(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("LibraryNotFoundError"));
}

#[test]
fn test_evaluate_requires_a_library() {
    let config = EvaluateConfig {
        primary: "Cohort".to_string(),
        ..EvaluateConfig::default()
    };
    assert!(evaluate::run(&config).is_err());
}

// ============================================================================
// Measure
// ============================================================================

#[rstest]
#[case(1)]
#[case(2)]
#[tokio::test]
async fn test_measure_population_report(#[case] shards: usize) {
    let workspace = Workspace::new();
    let config = MeasureConfig {
        shards,
        ..workspace.measure_config()
    };
    let report = measure::run(&config).await.unwrap();
    assert_eq!(report.groups[0].count(PopulationType::InitialPopulation), Some(2));

    let json = report.to_json();
    assert_eq!(json["type"], "summary");
    assert_eq!(json["date"], "2024-06-01T12:00:00.000Z");
    assert_eq!(json["measure"], "http://example.org/fhir/Measure/women");
}

#[tokio::test]
async fn test_measure_writes_output_file() {
    let workspace = Workspace::new();
    let config = MeasureConfig {
        report_type: "subject-list".to_string(),
        output_file: Some(workspace.path("report.json")),
        ..workspace.measure_config()
    };
    measure::execute(config).await.unwrap();

    let written: Value = serde_json::from_str(&fs::read_to_string(workspace.path("report.json")).unwrap()).unwrap();
    assert_eq!(written["resourceType"], "MeasureReport");
    assert_eq!(written["type"], "subject-list");
}

#[tokio::test]
async fn test_measure_rejects_unknown_report_type() {
    let workspace = Workspace::new();
    let config = MeasureConfig {
        report_type: "everything".to_string(),
        ..workspace.measure_config()
    };
    assert!(measure::run(&config).await.is_err());
}
