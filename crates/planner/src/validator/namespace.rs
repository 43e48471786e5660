//! Namespaces: anything that produces a row type and can be aliased in FROM.

use std::sync::Arc;

use quarry_common::{NodeId, QuarryError, Result, ValidationErrorKind};
use tracing::trace;

use crate::ast::{Expr, JoinKind, Query};
use crate::catalog::{Monotonicity, Table};
use crate::types::{ColumnType, RowType};

use super::scope::ScopeId;
use super::{fail, SqlValidator};

/// Index of a namespace in the validator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(pub(crate) usize);

/// Validation lifecycle of a namespace.
///
/// `Unvalidated -> InProgress -> Valid`. Meeting an `InProgress` namespace
/// again means its row type depends on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Unvalidated,
    InProgress,
    Valid,
}

#[derive(Debug, Clone)]
pub enum NamespaceKind {
    /// Catalog table reference. DML targets are table namespaces too; the
    /// statement checks its own access type against them.
    Table { names: Vec<String> },
    Select { query: Arc<Query> },
    SetOp { query: Arc<Query> },
    Values { query: Arc<Query>, scope: ScopeId },
    Join {
        left: NamespaceId,
        right: NamespaceId,
        kind: JoinKind,
    },
    /// `item AS alias (c1, c2, ...)`
    Alias {
        inner: NamespaceId,
        columns: Vec<String>,
    },
    /// Rows of a struct-typed field reached by a compound identifier.
    FieldDrill { column_type: ColumnType },
    /// Fixed row type supplied by the caller.
    Parameter { row_type: RowType },
    /// Table function call in FROM.
    Procedure { call: Expr, scope: ScopeId },
    /// `MULTISET(<query>)`; row type is that of the inner query.
    Collect { inner: NamespaceId },
    Unnest {
        exprs: Vec<Expr>,
        scope: ScopeId,
        with_ordinality: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub(crate) node: Option<NodeId>,
    pub(crate) kind: NamespaceKind,
    pub(crate) status: ValidationStatus,
    pub(crate) row_type: Option<RowType>,
    pub(crate) force_nullable: bool,
    pub(crate) table: Option<Arc<dyn Table>>,
    /// Free-form metadata callers may attach after validation.
    pub extra: Option<serde_json::Value>,
}

impl Namespace {
    pub(crate) fn new(node: Option<NodeId>, kind: NamespaceKind) -> Self {
        Self {
            node,
            kind,
            status: ValidationStatus::Unvalidated,
            row_type: None,
            force_nullable: false,
            table: None,
            extra: None,
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn kind(&self) -> &NamespaceKind {
        &self.kind
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    /// Row type, once validated.
    pub fn row_type(&self) -> Option<&RowType> {
        self.row_type.as_ref()
    }

    /// Resolved catalog table for table namespaces.
    pub fn table(&self) -> Option<&Arc<dyn Table>> {
        self.table.as_ref()
    }

    pub fn is_nullable_forced(&self) -> bool {
        self.force_nullable
    }
}

impl SqlValidator {
    pub(crate) fn add_namespace(&mut self, node: Option<NodeId>, kind: NamespaceKind) -> NamespaceId {
        let id = NamespaceId(self.namespaces.len());
        self.namespaces.push(Namespace::new(node, kind));
        if let Some(node) = node {
            self.node_namespaces.insert(node, id);
        }
        id
    }

    pub(crate) fn ns(&self, id: NamespaceId) -> &Namespace {
        &self.namespaces[id.0]
    }

    /// Force every field of `id` nullable. Only legal before validation
    /// finalizes the row type.
    pub(crate) fn make_nullable(&mut self, id: NamespaceId) -> Result<()> {
        let ns = &mut self.namespaces[id.0];
        if ns.status == ValidationStatus::Valid {
            return Err(QuarryError::Planning(
                "cannot force nullability of an already validated namespace".to_string(),
            ));
        }
        ns.force_nullable = true;
        Ok(())
    }

    /// Namespace for the struct-typed field `name` of `id`, for drilling
    /// into nested columns. Table namespaces are leaves.
    pub fn lookup_child(&mut self, id: NamespaceId, name: &str) -> Result<Option<NamespaceId>> {
        if matches!(self.ns(id).kind, NamespaceKind::Table { .. }) {
            return Ok(None);
        }
        let row_type = self.namespace_row_type(id)?;
        let Some(pos) = row_type.index_of(name, self.config.case_sensitive) else {
            return Ok(None);
        };
        let column_type = row_type.column_type(pos);
        if column_type.struct_fields().is_none() {
            return Ok(None);
        }
        Ok(Some(self.add_namespace(
            None,
            NamespaceKind::FieldDrill { column_type },
        )))
    }

    /// Whether `id` exposes a field called `name`. A namespace that fails
    /// to validate has no fields.
    pub fn field_exists(&mut self, id: NamespaceId, name: &str) -> bool {
        match self.namespace_row_type(id) {
            Ok(row_type) => row_type.index_of(name, self.config.case_sensitive).is_some(),
            Err(e) => {
                trace!(namespace = id.0, error = %e, "field lookup on invalid namespace");
                false
            }
        }
    }

    /// Row type of a namespace, validating it first if needed.
    pub(crate) fn namespace_row_type(&mut self, id: NamespaceId) -> Result<RowType> {
        let ns = &self.namespaces[id.0];
        match ns.status {
            ValidationStatus::Valid => {
                return ns.row_type.clone().ok_or_else(|| {
                    QuarryError::Planning("valid namespace without a row type".to_string())
                })
            }
            ValidationStatus::InProgress => {
                return Err(fail(ValidationErrorKind::CycleDetected, ns.node));
            }
            ValidationStatus::Unvalidated => {}
        }
        self.namespaces[id.0].status = ValidationStatus::InProgress;
        trace!(namespace = id.0, node = ?self.namespaces[id.0].node, "validating namespace");
        match self.validate_namespace_impl(id) {
            Ok(row_type) => {
                let ns = &mut self.namespaces[id.0];
                let row_type = if ns.force_nullable {
                    row_type.make_nullable()
                } else {
                    row_type
                };
                ns.row_type = Some(row_type.clone());
                ns.status = ValidationStatus::Valid;
                Ok(row_type)
            }
            Err(e) => {
                self.namespaces[id.0].status = ValidationStatus::Unvalidated;
                Err(e)
            }
        }
    }

    fn validate_namespace_impl(&mut self, id: NamespaceId) -> Result<RowType> {
        let kind = self.namespaces[id.0].kind.clone();
        let node = self.namespaces[id.0].node;
        match kind {
            NamespaceKind::Table { names } => {
                let table = self.catalog.get_table(&names).ok_or_else(|| {
                    fail(ValidationErrorKind::TableNameNotFound(names.join(".")), node)
                })?;
                let row_type = table.row_type();
                self.namespaces[id.0].table = Some(table);
                Ok(row_type)
            }
            NamespaceKind::Select { query } => self.validate_select(&query),
            NamespaceKind::SetOp { query } => self.validate_set_op(&query),
            NamespaceKind::Values { query, scope } => self.validate_values(&query, scope),
            NamespaceKind::Join { left, right, kind } => {
                let mut l = self.namespace_row_type(left)?;
                let mut r = self.namespace_row_type(right)?;
                if kind.generates_nulls_on_left() {
                    l = l.make_nullable();
                }
                if kind.generates_nulls_on_right() {
                    r = r.make_nullable();
                }
                Ok(l.concat(&r))
            }
            NamespaceKind::Alias { inner, columns } => {
                let inner_type = self.namespace_row_type(inner)?;
                if columns.len() != inner_type.len() {
                    return Err(fail(
                        ValidationErrorKind::AliasListDegree {
                            expected: inner_type.len(),
                            actual: columns.len(),
                        },
                        node,
                    ));
                }
                for (i, c) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|p| self.names_match(p, c)) {
                        return Err(fail(
                            ValidationErrorKind::AliasListDuplicate(c.clone()),
                            node,
                        ));
                    }
                }
                Ok(inner_type.rename(&columns))
            }
            NamespaceKind::FieldDrill { column_type } => {
                Ok(RowType::from_struct_or_wrap(&column_type, "EXPR$0"))
            }
            NamespaceKind::Parameter { row_type } => Ok(row_type),
            NamespaceKind::Procedure { call, scope } => self.validate_table_function(&call, scope),
            NamespaceKind::Collect { inner } => self.namespace_row_type(inner),
            NamespaceKind::Unnest {
                exprs,
                scope,
                with_ordinality,
            } => self.validate_unnest(&exprs, scope, with_ordinality),
        }
    }

    /// Columns of `id` known to be monotonic, with their direction.
    pub fn monotonic_columns(&mut self, id: NamespaceId) -> Result<Vec<(String, Monotonicity)>> {
        let row_type = self.namespace_row_type(id)?;
        let kind = self.namespaces[id.0].kind.clone();
        match kind {
            NamespaceKind::Table { .. } => {
                let Some(table) = self.namespaces[id.0].table.clone() else {
                    return Ok(vec![]);
                };
                Ok(row_type
                    .field_names()
                    .into_iter()
                    .filter_map(|name| {
                        let m = table.monotonicity(&name);
                        (m != Monotonicity::NotMonotonic).then_some((name, m))
                    })
                    .collect())
            }
            NamespaceKind::Alias { inner, columns } => {
                let inner_names = self.namespace_row_type(inner)?.field_names();
                let inner_mono = self.monotonic_columns(inner)?;
                Ok(inner_mono
                    .into_iter()
                    .filter_map(|(name, m)| {
                        let pos = inner_names.iter().position(|n| n == &name)?;
                        Some((columns[pos].clone(), m))
                    })
                    .collect())
            }
            NamespaceKind::Select { query } => self.select_monotonic_columns(&query, &row_type),
            _ => Ok(vec![]),
        }
    }

    /// A plain column passed through a select list keeps its monotonicity.
    fn select_monotonic_columns(
        &mut self,
        query: &Arc<Query>,
        row_type: &RowType,
    ) -> Result<Vec<(String, Monotonicity)>> {
        let Some(items) = self.expanded_select_lists.get(&query.id).cloned() else {
            return Ok(vec![]);
        };
        let mut out = vec![];
        for (i, item) in items.iter().enumerate() {
            let Some(super::Resolution::Column {
                namespace, path, ..
            }) = self.resolutions.get(&item.expr.id).cloned()
            else {
                continue;
            };
            if path.len() != 1 {
                continue;
            }
            let found = self
                .monotonic_columns(namespace)?
                .into_iter()
                .find(|(name, _)| self.names_match(name, &path[0]));
            if let Some((_, m)) = found {
                out.push((row_type.field(i).name().clone(), m));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quarry_common::{NodeId, ValidationErrorKind, ValidatorConfig};

    use super::{NamespaceKind, ValidationStatus};
    use crate::ast::Statement;
    use crate::catalog::{MemoryCatalog, Monotonicity};
    use crate::operators::OperatorTable;
    use crate::sql_frontend::sql_to_statement;
    use crate::validator::SqlValidator;

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
            ]
        }]
    }"#;

    fn validator() -> SqlValidator {
        SqlValidator::new(
            Arc::new(MemoryCatalog::new(vec!["sales".to_string()])),
            Arc::new(OperatorTable::with_builtins()),
            ValidatorConfig::default(),
        )
    }

    fn validated(sql: &str) -> (SqlValidator, Statement) {
        let mut v = SqlValidator::new(
            Arc::new(MemoryCatalog::from_json(CATALOG).expect("catalog")),
            Arc::new(OperatorTable::with_builtins()),
            ValidatorConfig::default(),
        );
        let stmt = v
            .validate(sql_to_statement(sql).expect("parse"))
            .expect("validate");
        (v, stmt)
    }

    #[test]
    fn lookup_child_drills_into_struct_columns() {
        let (mut v, stmt) = validated("SELECT empno, home FROM emp");
        let ns = v.namespace_of(stmt.id()).expect("query namespace");

        let home = v
            .lookup_child(ns, "HOME")
            .expect("lookup")
            .expect("struct column");
        let fields = v.namespace_row_type(home).expect("row type").field_names();
        assert_eq!(fields, vec!["street", "zip"]);
        assert!(v.lookup_child(ns, "empno").expect("lookup").is_none());
        assert!(v.lookup_child(ns, "nope").expect("lookup").is_none());

        assert!(v.field_exists(ns, "EMPNO"));
        assert!(!v.field_exists(ns, "street"));
    }

    #[test]
    fn table_namespace_is_a_leaf() {
        let (mut v, stmt) = validated("SELECT * FROM emp");
        let Statement::Query(q) = &stmt else {
            panic!("expected query");
        };
        let from = q
            .as_select()
            .and_then(|s| s.from.as_ref())
            .expect("from item");
        let table_ns = v.namespace_of(from.id).expect("table namespace");
        assert!(v.lookup_child(table_ns, "home").expect("lookup").is_none());
        assert!(v.field_exists(table_ns, "home"));
    }

    #[test]
    fn monotonic_columns_follow_select_aliases() {
        let (mut v, stmt) = validated("SELECT home, empno AS e FROM emp");
        let ns = v.namespace_of(stmt.id()).expect("query namespace");
        assert_eq!(
            v.monotonic_columns(ns).expect("monotonic"),
            vec![("e".to_string(), Monotonicity::StrictlyIncreasing)]
        );
    }

    #[test]
    fn self_referencing_namespace_reports_cycle() {
        let mut v = validator();
        let node = NodeId::next();
        let id = v.add_namespace(
            Some(node),
            NamespaceKind::Table {
                names: vec!["placeholder".to_string()],
            },
        );
        v.namespaces[id.0].kind = NamespaceKind::Alias {
            inner: id,
            columns: vec![],
        };
        let err = v.namespace_row_type(id).expect_err("cycle");
        assert_eq!(err.validation_kind(), Some(&ValidationErrorKind::CycleDetected));
        assert_eq!(v.ns(id).status(), ValidationStatus::Unvalidated);
    }

    #[test]
    fn make_nullable_rejected_after_validation() {
        let mut v = validator();
        let id = v.add_namespace(
            None,
            NamespaceKind::Parameter {
                row_type: crate::types::RowType::default(),
            },
        );
        v.namespace_row_type(id).expect("row type");
        assert_eq!(v.ns(id).status(), ValidationStatus::Valid);
        let err = v.make_nullable(id).expect_err("finalized");
        assert!(err.to_string().contains("already validated"), "err={err}");
    }
}
