//! Shared configuration, error types and IDs for Quarry crates.
//!
//! Architecture role:
//! - defines validator configuration and SQL conformance levels
//! - provides common [`QuarryError`] / [`Result`] contracts, including the structured
//!   [`ValidationError`] raised for semantic failures
//! - hosts the node/rel/correlation identifiers used as map keys across passes
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

pub mod config;
pub mod error;
pub mod ids;

pub use config::{Conformance, ValidatorConfig};
pub use error::{QuarryError, Result, ValidationError, ValidationErrorKind};
pub use ids::*;
