//! Data model support for clinical logic evaluation
//!
//! This crate provides:
//! - Type descriptors and the type table format they are loaded from
//! - A type registry with an ordered namespace fallback for nested types
//! - The embedded FHIR R4 type table
//! - FHIR JSON to runtime value conversion and resource bundle parsing

pub mod bundle;
pub mod convert;
pub mod error;
pub mod fhir;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod types;

pub use bundle::*;
pub use convert::*;
pub use error::*;
pub use fhir::*;
pub use parser::*;
pub use registry::*;
pub use resolver::*;
pub use types::*;
