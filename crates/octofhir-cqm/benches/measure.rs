//! Measure evaluation benchmarks using divan
//!
//! Scores a synthetic population against a cohort measure.

use octofhir_cqm::{
    EvaluatorOptions, LibraryPool, MeasureDefinition, MeasureEvaluator, MeasureEvaluatorOptions, MeasurePeriod,
    MeasureReportType, MeasureRequest, ResourceBundle, fhir_r4_resolver,
};
use octofhir_cqm::eval::ContentResolver;
use octofhir_cqm::types::CqlDateTime;
use serde_json::json;
use std::sync::Arc;

fn main() {
    divan::main();
}

fn evaluator(patients: usize) -> MeasureEvaluator {
    let resolver = fhir_r4_resolver().unwrap();
    let library = json!({"library": {
        "identifier": {"id": "Bench", "version": "1.0.0"},
        "statements": {"def": [
            {"name": "Patient", "context": "Patient", "accessLevel": "Public",
             "expression": {"type": "SingletonFrom", "operand": {"type": "Retrieve", "dataType": "{http://hl7.org/fhir}Patient"}}},
            {"name": "IsFemale", "context": "Patient", "accessLevel": "Public",
             "expression": {"type": "Equal", "operand": [
                {"type": "Property", "path": "gender", "source": {"type": "ExpressionRef", "name": "Patient"}},
                {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "female"}
             ]}}
        ]}
    }})
    .to_string();
    let entries: Vec<_> = (0..patients)
        .map(|i| {
            let gender = if i % 2 == 0 { "female" } else { "male" };
            json!({"resource": {"resourceType": "Patient", "id": format!("p{}", i), "gender": gender}})
        })
        .collect();
    let data = ResourceBundle::from_value(&json!({"resourceType": "Bundle", "entry": entries}), &resolver).unwrap();
    let pool = LibraryPool::from_texts([library.as_str()]).unwrap();
    let options = MeasureEvaluatorOptions::default()
        .evaluator(EvaluatorOptions::default().evaluation_timestamp(CqlDateTime::new(2024, 6, 1, 0, 0, 0, 0, Some(0))));
    MeasureEvaluator::new(
        Arc::new(pool) as Arc<dyn ContentResolver>,
        Arc::new(ResourceBundle::new()),
        Arc::new(data),
        options,
    )
    .unwrap()
}

fn definition() -> MeasureDefinition {
    MeasureDefinition::from_value(&json!({
        "resourceType": "Measure",
        "library": ["Bench"],
        "scoring": {"coding": [{"code": "cohort"}]},
        "group": [{"id": "g1", "population": [{
            "code": {"coding": [{"code": "initial-population"}]},
            "criteria": {"expression": "IsFemale"}
        }]}]
    }))
    .unwrap()
}

#[divan::bench(args = [10, 100, 1000])]
fn cohort_population(bencher: divan::Bencher, patients: usize) {
    let evaluator = evaluator(patients);
    let definition = definition();
    let request = MeasureRequest::new(
        MeasurePeriod::parse("2024-01-01", "2024-12-31").unwrap(),
        MeasureReportType::Population,
    );
    bencher.bench_local(|| evaluator.evaluate(&definition, &request).unwrap());
}
