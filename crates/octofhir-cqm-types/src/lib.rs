//! Runtime value model for clinical expression evaluation
//!
//! Every value produced by the evaluation engine is a [`CqlValue`]. FHIR
//! resources read from a data bundle are carried as [`FhirResource`] so the
//! original document survives for output serialization.

pub mod value;

pub use value::*;
