//! Application services: indicator catalog, cached loading and session state.

pub mod catalog;
pub mod error;
pub mod indicator;
pub mod repos;
pub mod shell;
pub mod sources;
