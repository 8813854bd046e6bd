//! Domain layer types and invariants.

pub mod error;
pub mod filters;
pub mod indicators;
pub mod rows;
