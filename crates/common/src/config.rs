use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// Validator behavior switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// SQL dialect conformance level.
    pub conformance: Conformance,
    /// Record fully qualified identifiers and expanded select lists.
    pub identifier_expansion: bool,
    /// Match identifiers case-sensitively.
    pub case_sensitive: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            conformance: Conformance::Default,
            identifier_expansion: true,
            case_sensitive: false,
        }
    }
}

impl ValidatorConfig {
    /// Decode a config from JSON; missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| QuarryError::InvalidConfig(e.to_string()))
    }

    pub fn with_conformance(mut self, conformance: Conformance) -> Self {
        self.conformance = conformance;
        self
    }
}

/// SQL conformance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conformance {
    Default,
    Strict92,
    Strict99,
    Strict2003,
    Pragmatic2003,
    Lenient,
    Babel,
}

impl Conformance {
    /// ORDER BY may reference a select-list alias.
    pub fn is_sort_by_alias(self) -> bool {
        !matches!(self, Conformance::Strict99 | Conformance::Strict2003)
    }

    /// A select-list alias hides a same-named FROM column in ORDER BY.
    pub fn is_sort_by_alias_obscures(self) -> bool {
        matches!(self, Conformance::Strict92)
    }

    /// ORDER BY may reference a select-list ordinal.
    pub fn is_sort_by_ordinal(self) -> bool {
        !matches!(self, Conformance::Strict99 | Conformance::Strict2003)
    }

    pub fn is_group_by_alias(self) -> bool {
        matches!(self, Conformance::Lenient | Conformance::Babel)
    }

    pub fn is_group_by_ordinal(self) -> bool {
        matches!(self, Conformance::Lenient | Conformance::Babel)
    }

    /// FROM is mandatory in a query.
    pub fn is_from_required(self) -> bool {
        matches!(
            self,
            Conformance::Strict92 | Conformance::Strict99 | Conformance::Strict2003
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Conformance, ValidatorConfig};

    #[test]
    fn config_json_defaults_missing_fields() {
        let cfg = ValidatorConfig::from_json(r#"{"conformance":"strict92"}"#).expect("decode");
        assert_eq!(cfg.conformance, Conformance::Strict92);
        assert!(cfg.identifier_expansion);
        assert!(cfg.conformance.is_sort_by_alias_obscures());
    }

    #[test]
    fn config_json_rejects_unknown_conformance() {
        let err = ValidatorConfig::from_json(r#"{"conformance":"oracle"}"#).expect_err("must fail");
        assert!(err.to_string().contains("invalid configuration"), "err={err}");
    }

    #[test]
    fn strict2003_disables_sort_by_alias() {
        assert!(!Conformance::Strict2003.is_sort_by_alias());
        assert!(Conformance::Default.is_sort_by_alias());
        assert!(!Conformance::Default.is_sort_by_alias_obscures());
    }
}
