//! Operator Implementations
//!
//! Each module adds an `impl CqlEngine` block for one operator category:
//! - Arithmetic operators (Add, Subtract, etc.)
//! - Comparison operators (Equal, Less, etc.)
//! - Logical and nullological operators (And, Or, Coalesce, If, Case)
//! - String operators (Concatenate, Matches, etc.)
//! - DateTime operators (Date constructors, DurationBetween, etc.)
//! - Interval operators (Contains, Overlaps, etc.)
//! - List operators (First, Last, Count, Union, etc.)
//! - Type operators (As, Is, conversions)
//! - Clinical operators (CalculateAge, InValueSet, etc.)

pub mod arithmetic;
pub mod clinical;
pub mod comparison;
pub mod datetime;
pub mod interval;
pub mod list;
pub mod logical;
pub mod string;
pub mod type_ops;

// Re-export helper functions
pub use comparison::*;
pub use datetime::*;
pub use interval::*;
pub use list::*;
pub use type_ops::*;
