//! Population-Based Measure Evaluation
//!
//! Scores a FHIR `Measure` over a population of patients and produces a
//! `MeasureReport`:
//!
//! - **Definitions**: scoring type, groups and population criteria read from
//!   the `Measure` resource
//! - **Scoring**: population algebra for proportion, ratio and cohort measures
//! - **Reports**: individual, subject-list and summary reports with scores
//! - **Failure tolerance**: a subject whose criteria fail is reported and left
//!   out of every population instead of aborting the run
//!
//! # Example
//!
//! ```ignore
//! use octofhir_cqm_measure::{MeasureDefinition, MeasureEvaluator, MeasurePeriod, MeasureRequest};
//!
//! let definition = MeasureDefinition::parse(measure_json)?;
//! let evaluator = MeasureEvaluator::new(libraries, value_sets, data, Default::default())?;
//! let period = MeasurePeriod::parse("2024-01-01", "2024-12-31")?;
//! let report = evaluator.evaluate(&definition, &MeasureRequest::new(period, Default::default()))?;
//! println!("{}", report.to_json());
//! ```

pub mod definition;
pub mod error;
pub mod evaluator;
pub mod report;
pub mod scoring;

pub use definition::{
    LibraryReference, MEASURE_POPULATION_SYSTEM, MeasureDefinition, MeasureGroup, MeasureScoring, PopulationCriteria,
    PopulationType,
};
pub use error::{MeasureError, MeasureResult};
pub use evaluator::{MEASUREMENT_PERIOD, MeasureEvaluator, MeasureEvaluatorOptions, MeasureRequest};
pub use report::{
    GroupReport, MeasurePeriod, MeasureReport, MeasureReportType, PopulationReport, SubjectFailure, patient_reference,
};
pub use scoring::{GroupMembership, GroupTally, SCORE_SCALE, is_member, score_group};
