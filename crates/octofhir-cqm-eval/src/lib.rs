//! Clinical Expression Evaluation
//!
//! This crate loads compiled clinical-logic libraries, binds them to
//! terminology and patient data, and evaluates named expressions:
//!
//! - **Library resolution**: highest-version selection over a supplied pool,
//!   transitive includes, translator-options policy
//! - **Terminology**: value-set membership and expansion from a bundle
//! - **Data retrieval**: context-scoped retrieves with code and date filters
//! - **Evaluation**: three-valued logic, temporal, interval, list, query and
//!   clinical operators over the ELM expression tree
//! - **Output**: FHIR `Parameters` encoding of results
//!
//! # Example
//!
//! ```ignore
//! use octofhir_cqm_eval::{ContextBinding, EvaluationRequest, EvaluatorOptions, ExpressionEvaluator};
//!
//! let evaluator = ExpressionEvaluator::from_texts([elm], value_sets, data, EvaluatorOptions::default())?;
//! let request = EvaluationRequest::new("Screening")
//!     .expression("IsAdult")
//!     .context(ContextBinding::patient("p1"));
//! let parameters = evaluator.evaluate(&request)?.to_parameters();
//! ```
//!
//! # Architecture
//!
//! - `ExpressionEvaluator`: one session over libraries, value sets and data
//! - `CqlEngine`: dispatches ELM nodes to operator implementations
//! - `EvaluationContext`: per-subject state (binding, scopes, result cache)
//! - `LibraryManager`: resolves and caches compiled libraries
//! - `DataProviderRegistry`: retrieve providers keyed by model namespace
//! - `AssetCache`: construct-once cache of parsed input documents

pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod library;
pub mod operators;
pub mod parameters;
pub mod query;
pub mod registry;
pub mod retrieve;
pub mod terminology;

// Re-export main types
pub use cache::{AssetCache, Assets, ResourceSource};
pub use context::{ContextBinding, DEFAULT_MAX_DEPTH, EvaluationContext, EvaluationContextBuilder};
pub use engine::{CqlEngine, public_definitions};
pub use error::{ErrorKind, EvalError, EvalResult};
pub use evaluator::{EvaluationRequest, EvaluationResult, EvaluatorOptions, ExpressionEvaluator, evaluate_to_parameters};
pub use library::{
    ContentResolver, FHIR_HELPERS, LibraryContent, LibraryManager, LibraryPool, LibrarySet, OptionsPolicy,
    compare_versions,
};
pub use parameters::to_parameters;
pub use registry::FunctionRegistry;
pub use retrieve::{
    BundleRetrieveProvider, CodeFilter, CompositeDataProvider, DataProviderRegistry, FHIR_MODEL_URI,
    RetrieveProvider, RetrieveRequest,
};
pub use terminology::{BundleTerminologyProvider, TerminologyProvider};

// Re-export commonly used operator helpers
pub use operators::comparison::{cql_compare, cql_equal, cql_equivalent};
