//! Clinical expression and measure evaluation for Rust
//!
//! This crate bundles the evaluation stack:
//! - Runtime values for clinical logic
//! - Compiled library (ELM JSON) model
//! - FHIR type resolution and resource bundles
//! - Expression evaluation with terminology and data retrieval
//! - Population-based measure scoring and `MeasureReport` output
//!
//! # Example
//!
//! ```ignore
//! use octofhir_cqm::{ContextBinding, EvaluationRequest, EvaluatorOptions, ExpressionEvaluator};
//!
//! let evaluator = ExpressionEvaluator::from_texts([elm], value_sets, data, EvaluatorOptions::default())?;
//! let request = EvaluationRequest::new("Screening").context(ContextBinding::patient("p1"));
//! println!("{}", evaluator.evaluate(&request)?.to_parameters());
//! ```

// Re-export all public APIs from internal crates
pub use octofhir_cqm_elm as elm;
pub use octofhir_cqm_eval as eval;
pub use octofhir_cqm_measure as measure;
pub use octofhir_cqm_model as model;
pub use octofhir_cqm_types as types;

// Convenience re-exports
pub use octofhir_cqm_eval::{
    AssetCache, Assets, ContextBinding, ErrorKind, EvalError, EvalResult, EvaluationRequest, EvaluationResult,
    EvaluatorOptions, ExpressionEvaluator, LibraryPool, ResourceSource, evaluate_to_parameters,
};
pub use octofhir_cqm_measure::{
    MeasureDefinition, MeasureError, MeasureEvaluator, MeasureEvaluatorOptions, MeasurePeriod, MeasureReport,
    MeasureReportType, MeasureRequest,
};
pub use octofhir_cqm_model::{ResourceBundle, TypeResolver, fhir_r4_resolver};
pub use octofhir_cqm_types::CqlValue;

pub mod source;

// CLI module (only available with cli feature)
#[cfg(feature = "cli")]
pub mod cli;
