//! Compiled clinical-logic library representation (ELM)
//!
//! This crate provides:
//! - ELM data structures for the subset of node types the engine evaluates
//! - JSON (de)serialization compatible with HL7 ELM JSON output
//! - Access to the translator metadata carried in library annotations

pub mod model;
pub mod serialize;

pub use model::*;
pub use serialize::{SerializeError, library_from_value, parse_library};
