use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of object a [`Moniker`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonikerKind {
    Catalog,
    Schema,
    Table,
    View,
    Column,
    Function,
    Keyword,
}

/// A possibly multi-part object name tagged with its kind.
///
/// Returned by completion hints and qualified-name lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Moniker {
    pub kind: MonikerKind,
    pub names: Vec<String>,
}

impl Moniker {
    pub fn new(kind: MonikerKind, names: Vec<String>) -> Self {
        Self { kind, names }
    }

    pub fn simple(kind: MonikerKind, name: impl Into<String>) -> Self {
        Self::new(kind, vec![name.into()])
    }

    /// Last name part, e.g. the column name of `emp.sal`.
    pub fn name(&self) -> &str {
        self.names.last().map(String::as_str).unwrap_or("")
    }

    /// Dotted spelling of the full name.
    pub fn id(&self) -> String {
        self.names.join(".")
    }
}

impl fmt::Display for Moniker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.id())
    }
}
