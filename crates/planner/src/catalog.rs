//! Catalog contracts consumed by the validator, plus an in-memory catalog.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields};
use quarry_common::{QuarryError, Result};
use serde::{Deserialize, Serialize};

use crate::moniker::{Moniker, MonikerKind};
use crate::types::{parse_type_name, RowType};

/// Whether a column's values are known to be ordered in the produced stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monotonicity {
    StrictlyIncreasing,
    Increasing,
    StrictlyDecreasing,
    Decreasing,
    Constant,
    NotMonotonic,
}

impl Monotonicity {
    /// Strict variants become their non-strict counterparts.
    pub fn unstrict(self) -> Self {
        match self {
            Monotonicity::StrictlyIncreasing => Monotonicity::Increasing,
            Monotonicity::StrictlyDecreasing => Monotonicity::Decreasing,
            other => other,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Monotonicity::StrictlyIncreasing => Monotonicity::StrictlyDecreasing,
            Monotonicity::Increasing => Monotonicity::Decreasing,
            Monotonicity::StrictlyDecreasing => Monotonicity::StrictlyIncreasing,
            Monotonicity::Decreasing => Monotonicity::Increasing,
            other => other,
        }
    }

    pub fn is_decreasing(self) -> bool {
        matches!(
            self,
            Monotonicity::StrictlyDecreasing | Monotonicity::Decreasing
        )
    }

    /// Whether consecutive values may be equal.
    pub fn may_repeat(self) -> bool {
        !matches!(
            self,
            Monotonicity::StrictlyIncreasing | Monotonicity::StrictlyDecreasing
        )
    }
}

/// Statement kinds checked against a table's allowed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Select,
    Insert,
    Update,
    Delete,
}

impl AccessType {
    fn bit(self) -> u8 {
        match self {
            AccessType::Select => 1,
            AccessType::Insert => 2,
            AccessType::Update => 4,
            AccessType::Delete => 8,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Select => write!(f, "SELECT"),
            AccessType::Insert => write!(f, "INSERT"),
            AccessType::Update => write!(f, "UPDATE"),
            AccessType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Set of permitted [`AccessType`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessSet(u8);

impl AccessSet {
    pub const ALL: AccessSet = AccessSet(0b1111);
    pub const NONE: AccessSet = AccessSet(0);

    pub fn of(types: &[AccessType]) -> Self {
        AccessSet(types.iter().fold(0, |acc, t| acc | t.bit()))
    }

    pub fn allows(self, access: AccessType) -> bool {
        self.0 & access.bit() != 0
    }
}

/// A table as the validator sees it.
pub trait Table: fmt::Debug + Send + Sync {
    fn row_type(&self) -> RowType;

    /// Fully qualified name path, e.g. `["sales", "emp"]`.
    fn qualified_name(&self) -> Vec<String>;

    fn monotonicity(&self, _column: &str) -> Monotonicity {
        Monotonicity::NotMonotonic
    }

    fn allowed_access(&self) -> AccessSet {
        AccessSet::ALL
    }

    /// Whether INSERT may omit `column`.
    fn column_has_default(&self, _column: &str) -> bool {
        false
    }

    /// Column-position sets known to be unique.
    fn unique_keys(&self) -> Vec<Vec<usize>> {
        vec![]
    }
}

/// Catalog lookups; must be synchronous and side-effect free.
pub trait CatalogReader: Send + Sync {
    /// Look up a table by (possibly partial) name path.
    fn get_table(&self, names: &[String]) -> Option<Arc<dyn Table>>;

    /// Look up a user-defined type by name.
    fn get_named_type(&self, names: &[String]) -> Option<DataType>;

    /// Objects directly under `names` (schemas and tables for an empty path).
    fn get_all_schema_object_names(&self, names: &[String]) -> Vec<Moniker>;
}

// -------------------------
// In-memory catalog
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub monotonicity: Option<Monotonicity>,
    #[serde(default)]
    pub has_default: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub schema: Vec<String>,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Unique column-name sets.
    #[serde(default)]
    pub unique_keys: Vec<Vec<String>>,
    /// Allowed statement kinds; empty means all.
    #[serde(default)]
    pub access: Vec<AccessType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<ColumnDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDef {
    #[serde(default)]
    pub default_schema: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

#[derive(Debug)]
pub struct MemoryTable {
    name: Vec<String>,
    row_type: RowType,
    monotonic: HashMap<String, Monotonicity>,
    defaults: HashSet<String>,
    unique_keys: Vec<Vec<usize>>,
    access: AccessSet,
}

impl MemoryTable {
    pub fn new(name: Vec<String>, row_type: RowType) -> Self {
        Self {
            name,
            row_type,
            monotonic: HashMap::new(),
            defaults: HashSet::new(),
            unique_keys: vec![],
            access: AccessSet::ALL,
        }
    }

    pub fn with_monotonicity(mut self, column: &str, m: Monotonicity) -> Self {
        self.monotonic.insert(column.to_ascii_lowercase(), m);
        self
    }

    pub fn with_default(mut self, column: &str) -> Self {
        self.defaults.insert(column.to_ascii_lowercase());
        self
    }

    pub fn with_unique_key(mut self, key: Vec<usize>) -> Self {
        self.unique_keys.push(key);
        self
    }

    pub fn with_access(mut self, access: AccessSet) -> Self {
        self.access = access;
        self
    }
}

impl Table for MemoryTable {
    fn row_type(&self) -> RowType {
        self.row_type.clone()
    }

    fn qualified_name(&self) -> Vec<String> {
        self.name.clone()
    }

    fn monotonicity(&self, column: &str) -> Monotonicity {
        self.monotonic
            .get(&column.to_ascii_lowercase())
            .copied()
            .unwrap_or(Monotonicity::NotMonotonic)
    }

    fn allowed_access(&self) -> AccessSet {
        self.access
    }

    fn column_has_default(&self, column: &str) -> bool {
        self.defaults.contains(&column.to_ascii_lowercase())
    }

    fn unique_keys(&self) -> Vec<Vec<usize>> {
        self.unique_keys.clone()
    }
}

/// Catalog held entirely in memory; names match case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    default_schema: Vec<String>,
    tables: BTreeMap<Vec<String>, Arc<MemoryTable>>,
    types: HashMap<String, DataType>,
}

fn lower_path(names: &[String]) -> Vec<String> {
    names.iter().map(|n| n.to_ascii_lowercase()).collect()
}

impl MemoryCatalog {
    pub fn new(default_schema: Vec<String>) -> Self {
        Self {
            default_schema,
            tables: BTreeMap::new(),
            types: HashMap::new(),
        }
    }

    pub fn register_table(&mut self, table: MemoryTable) {
        self.tables.insert(lower_path(&table.name), Arc::new(table));
    }

    pub fn register_type(&mut self, name: &str, data_type: DataType) {
        self.types.insert(name.to_ascii_lowercase(), data_type);
    }

    pub fn from_def(def: CatalogDef) -> Result<Self> {
        let mut cat = MemoryCatalog::new(def.default_schema.clone());
        for t in &def.types {
            let fields = columns_to_fields(&t.fields, &cat)?;
            cat.register_type(&t.name, DataType::Struct(Fields::from(fields)));
        }
        for t in def.tables {
            let fields = columns_to_fields(&t.columns, &cat)?;
            let row_type = RowType::new(fields);
            let mut name = if t.schema.is_empty() {
                def.default_schema.clone()
            } else {
                t.schema.clone()
            };
            name.push(t.name.clone());
            let mut table = MemoryTable::new(name, row_type.clone());
            for c in &t.columns {
                if let Some(m) = c.monotonicity {
                    table = table.with_monotonicity(&c.name, m);
                }
                if c.has_default {
                    table = table.with_default(&c.name);
                }
            }
            for key in &t.unique_keys {
                let mut positions = vec![];
                for col in key {
                    let pos = row_type.index_of(col, false).ok_or_else(|| {
                        QuarryError::InvalidConfig(format!(
                            "unique key column '{col}' not found in table '{}'",
                            t.name
                        ))
                    })?;
                    positions.push(pos);
                }
                table = table.with_unique_key(positions);
            }
            if !t.access.is_empty() {
                table = table.with_access(AccessSet::of(&t.access));
            }
            cat.register_table(table);
        }
        Ok(cat)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let def: CatalogDef =
            serde_json::from_str(s).map_err(|e| QuarryError::InvalidConfig(e.to_string()))?;
        Self::from_def(def)
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json(&s)
    }

    fn resolve_type_name(&self, name: &str) -> Option<DataType> {
        parse_type_name(name).or_else(|| self.types.get(&name.to_ascii_lowercase()).cloned())
    }
}

fn columns_to_fields(columns: &[ColumnDef], cat: &MemoryCatalog) -> Result<Vec<Field>> {
    columns
        .iter()
        .map(|c| {
            let dt = cat.resolve_type_name(&c.type_name).ok_or_else(|| {
                QuarryError::InvalidConfig(format!(
                    "unknown type '{}' for column '{}'",
                    c.type_name, c.name
                ))
            })?;
            Ok(Field::new(c.name.clone(), dt, c.nullable))
        })
        .collect()
}

impl CatalogReader for MemoryCatalog {
    fn get_table(&self, names: &[String]) -> Option<Arc<dyn Table>> {
        let path = lower_path(names);
        if let Some(t) = self.tables.get(&path) {
            return Some(t.clone() as Arc<dyn Table>);
        }
        let mut qualified = lower_path(&self.default_schema);
        qualified.extend(path);
        self.tables
            .get(&qualified)
            .map(|t| t.clone() as Arc<dyn Table>)
    }

    fn get_named_type(&self, names: &[String]) -> Option<DataType> {
        let name = names.last()?;
        self.types.get(&name.to_ascii_lowercase()).cloned()
    }

    fn get_all_schema_object_names(&self, names: &[String]) -> Vec<Moniker> {
        let prefix = if names.is_empty() {
            lower_path(&self.default_schema)
        } else {
            lower_path(names)
        };
        let mut out = vec![];
        let mut schemas = HashSet::new();
        for (path, table) in &self.tables {
            if names.is_empty() && path.len() > 1 && schemas.insert(path[0].clone()) {
                out.push(Moniker::new(
                    MonikerKind::Schema,
                    vec![table.name[0].clone()],
                ));
            }
            if path.len() == prefix.len() + 1 && path.starts_with(&prefix) {
                out.push(Moniker::new(MonikerKind::Table, table.name.clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessType, CatalogReader, MemoryCatalog, Monotonicity};

    const CATALOG: &str = r#"{
        "default_schema": ["sales"],
        "types": [{"name": "address", "fields": [
            {"name": "street", "type": "VARCHAR"},
            {"name": "zip", "type": "INTEGER"}
        ]}],
        "tables": [{
            "name": "emp",
            "columns": [
                {"name": "empno", "type": "INTEGER", "nullable": false, "monotonicity": "strictly_increasing"},
                {"name": "home", "type": "address"}
            ],
            "unique_keys": [["empno"]],
            "access": ["select"]
        }]
    }"#;

    #[test]
    fn load_catalog_from_json() {
        let cat = MemoryCatalog::from_json(CATALOG).expect("catalog");
        let emp = cat
            .get_table(&["EMP".to_string()])
            .expect("emp via default schema");
        assert_eq!(emp.qualified_name(), vec!["sales", "emp"]);
        assert_eq!(emp.monotonicity("EMPNO"), Monotonicity::StrictlyIncreasing);
        assert_eq!(emp.unique_keys(), vec![vec![0]]);
        assert!(emp.allowed_access().allows(AccessType::Select));
        assert!(!emp.allowed_access().allows(AccessType::Insert));
        assert!(cat.get_named_type(&["Address".to_string()]).is_some());
    }

    #[test]
    fn unknown_column_type_is_config_error() {
        let err = MemoryCatalog::from_json(
            r#"{"tables":[{"name":"t","columns":[{"name":"a","type":"wat"}]}]}"#,
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("unknown type 'wat'"), "err={err}");
    }

    #[test]
    fn monotonicity_algebra() {
        assert_eq!(
            Monotonicity::StrictlyIncreasing.unstrict(),
            Monotonicity::Increasing
        );
        assert_eq!(
            Monotonicity::Increasing.reverse(),
            Monotonicity::Decreasing
        );
        assert!(Monotonicity::StrictlyDecreasing.is_decreasing());
        assert!(!Monotonicity::StrictlyIncreasing.may_repeat());
        assert!(Monotonicity::Constant.may_repeat());
    }

    #[test]
    fn schema_object_names_lists_schemas_and_default_tables() {
        let cat = MemoryCatalog::from_json(CATALOG).expect("catalog");
        let names = cat.get_all_schema_object_names(&[]);
        assert!(names.iter().any(|m| m.id() == "sales"));
        assert!(names.iter().any(|m| m.id() == "sales.emp"));
    }
}
