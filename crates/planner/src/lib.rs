//! SQL validation and correlated subquery elimination.
//!
//! Architecture role:
//! - converts parsed SQL into an id-carrying AST ([`sql_frontend`], [`ast`])
//! - resolves names and types against a [`catalog::CatalogReader`] ([`validator`])
//! - rewrites correlated relational trees into joins ([`rel`], [`decorrelate`])
//!
//! Key modules:
//! - [`validator`]
//! - [`decorrelate`]
//! - [`rel`]

pub mod ast;
pub mod catalog;
pub mod decorrelate;
pub mod explain;
pub mod metadata;
pub mod moniker;
pub mod operators;
pub mod rel;
pub mod sql_frontend;
pub mod types;
pub mod validator;

pub use catalog::{CatalogReader, MemoryCatalog, MemoryTable, Table};
pub use decorrelate::{decorrelate_query, CorrelationMaps, Decorrelator};
pub use explain::explain_rel;
pub use metadata::RelMetadata;
pub use moniker::{Moniker, MonikerKind};
pub use operators::OperatorTable;
pub use rel::{RelNode, RelRef, Rex};
pub use sql_frontend::sql_to_statement;
pub use validator::SqlValidator;
