//! FHIR model support
//!
//! This module provides the embedded FHIR R4 type table.

pub mod r4;

pub use r4::*;
