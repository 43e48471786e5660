//! SQL semantic validation.
//!
//! [`SqlValidator::validate`] rewrites shorthand syntax, registers every
//! namespace and scope of the statement, then validates clause by clause in
//! SQL evaluation order. Results are kept in node-id keyed maps: the type of
//! every expression, the resolution of every identifier and the expanded
//! select list of every SELECT.
//!
//! The validator is single-threaded and holds state for one statement at a
//! time; share the catalog and operator table between instances instead.

mod agg;
mod dml;
mod expr;
mod hints;
pub mod namespace;
mod register;
pub mod rewrite;
pub mod scope;
mod select;
mod window;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use quarry_common::{
    NodeId, QuarryError, Result, ValidationError, ValidationErrorKind, ValidatorConfig,
};
use tracing::debug;

use crate::ast::{Expr, Query, SelectItem, Statement};
use crate::catalog::CatalogReader;
use crate::operators::OperatorTable;
use crate::types::{names_match, ColumnType, RowType};

pub use hints::HINT_TOKEN;
use namespace::{Namespace, NamespaceId, NamespaceKind};
use scope::{Scope, ScopeId, ScopeKind};

pub(crate) fn fail(kind: ValidationErrorKind, node: Option<NodeId>) -> QuarryError {
    match node {
        Some(node) => QuarryError::validation(kind, node),
        None => ValidationError::new(kind).into(),
    }
}

/// What an identifier expression resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// A column (or nested field) of a scope child.
    Column {
        scope: ScopeId,
        namespace: NamespaceId,
        alias: String,
        path: Vec<String>,
    },
    /// An ORDER BY reference to a select-list item.
    SelectAlias { select: NodeId, ordinal: usize },
}

/// Scopes owned by one SELECT.
#[derive(Debug, Clone)]
pub(crate) struct SelectScopes {
    /// Sees the FROM children; used for FROM, WHERE, GROUP BY and WINDOW.
    pub select: ScopeId,
    pub aggregating: Option<ScopeId>,
    pub distinct: Option<ScopeId>,
    pub order: Option<ScopeId>,
    pub is_aggregate: bool,
}

/// Validates statements against a catalog and operator table.
pub struct SqlValidator {
    pub(crate) catalog: Arc<dyn CatalogReader>,
    pub(crate) operators: Arc<OperatorTable>,
    pub(crate) config: ValidatorConfig,
    pub(crate) namespaces: Vec<Namespace>,
    pub(crate) scopes: Vec<Scope>,
    pub(crate) root_scope: ScopeId,
    pub(crate) node_namespaces: HashMap<NodeId, NamespaceId>,
    pub(crate) select_scopes: HashMap<NodeId, SelectScopes>,
    pub(crate) join_scopes: HashMap<NodeId, ScopeId>,
    /// Scope each clause-level expression node was registered in.
    pub(crate) expr_scopes: HashMap<NodeId, ScopeId>,
    pub(crate) queries: HashMap<NodeId, Arc<Query>>,
    pub(crate) node_types: HashMap<NodeId, ColumnType>,
    pub(crate) resolutions: HashMap<NodeId, Resolution>,
    pub(crate) expanded_select_lists: HashMap<NodeId, Vec<SelectItem>>,
    /// Select row types, available to ORDER BY before the namespace is final.
    pub(crate) select_row_types: HashMap<NodeId, RowType>,
    pub(crate) group_exprs: HashMap<NodeId, Vec<Expr>>,
    /// Expected row types pushed down from INSERT/UPDATE targets.
    pub(crate) target_types: HashMap<NodeId, RowType>,
    /// Synthesized DML source selects; their FROM tables skip the SELECT
    /// access check.
    pub(crate) dml_sources: HashSet<NodeId>,
    next_alias: usize,
}

impl fmt::Debug for SqlValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlValidator")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces.len())
            .field("scopes", &self.scopes.len())
            .field("typed_nodes", &self.node_types.len())
            .finish()
    }
}

impl SqlValidator {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        operators: Arc<OperatorTable>,
        config: ValidatorConfig,
    ) -> Self {
        let mut v = Self {
            catalog,
            operators,
            config,
            namespaces: vec![],
            scopes: vec![],
            root_scope: ScopeId(0),
            node_namespaces: HashMap::new(),
            select_scopes: HashMap::new(),
            join_scopes: HashMap::new(),
            expr_scopes: HashMap::new(),
            queries: HashMap::new(),
            node_types: HashMap::new(),
            resolutions: HashMap::new(),
            expanded_select_lists: HashMap::new(),
            select_row_types: HashMap::new(),
            group_exprs: HashMap::new(),
            target_types: HashMap::new(),
            dml_sources: HashSet::new(),
            next_alias: 0,
        };
        v.root_scope = v.add_scope(None, None, ScopeKind::Empty);
        v
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate one statement and return it in rewritten form.
    ///
    /// All node ids of the input survive the rewrite; the getters below are
    /// keyed by them.
    pub fn validate(&mut self, stmt: Statement) -> Result<Statement> {
        let stmt = rewrite::rewrite_statement(stmt);
        self.validate_rewritten(&stmt)?;
        Ok(stmt)
    }

    /// Register and validate a statement that has already been rewritten.
    pub(crate) fn validate_rewritten(&mut self, stmt: &Statement) -> Result<()> {
        debug!(node = %stmt.id(), "validating statement");
        self.register_statement(stmt)?;
        match stmt {
            Statement::Query(q) => {
                let row_type = self.validate_query(q, None)?;
                debug!(node = %q.id, columns = row_type.len(), "validated query");
            }
            Statement::Insert(ins) => self.validate_insert(ins)?,
            Statement::Update(upd) => self.validate_update(upd)?,
            Statement::Delete(del) => self.validate_delete(del)?,
            Statement::Merge(m) => self.validate_merge(m)?,
        }
        Ok(())
    }

    /// Validate a free-standing expression whose identifiers name the given
    /// parameters. Returns the rewritten expression; its type is available
    /// from [`SqlValidator::get_validated_node_type`].
    pub fn validate_parameterized_expression(
        &mut self,
        expr: Expr,
        params: &[(String, ColumnType)],
    ) -> Result<Expr> {
        let expr = rewrite::rewrite_expr(&expr);
        let scope = self.add_scope(Some(self.root_scope), None, ScopeKind::Parameter);
        let ns = self.add_namespace(
            None,
            NamespaceKind::Parameter {
                row_type: RowType::of(params.to_vec()),
            },
        );
        self.add_child(scope, "", ns, false);
        self.register_expr(scope, &expr)?;
        self.infer_unknown_types(scope, &expr, None)?;
        let ty = self.derive_type(scope, &expr)?;
        debug!(node = %expr.id, r#type = %ty, "validated parameterized expression");
        Ok(expr)
    }

    pub(crate) fn validate_query(
        &mut self,
        query: &Arc<Query>,
        target: Option<RowType>,
    ) -> Result<RowType> {
        if let Some(target) = target {
            self.target_types.insert(query.id, target);
        }
        let ns = self.namespace_of(query.id)?;
        self.namespace_row_type(ns)
    }

    pub(crate) fn namespace_of(&self, node: NodeId) -> Result<NamespaceId> {
        self.node_namespaces.get(&node).copied().ok_or_else(|| {
            QuarryError::Planning(format!("node {node} was not registered as a namespace"))
        })
    }

    pub(crate) fn names_match(&self, a: &str, b: &str) -> bool {
        names_match(a, b, self.config.case_sensitive)
    }

    pub(crate) fn next_alias(&mut self) -> String {
        let alias = format!("EXPR${}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    // -------------------------
    // Accessors
    // -------------------------

    /// Validated type of an expression, or the row type (as a struct) of a
    /// query or FROM item.
    pub fn get_validated_node_type(&self, node: NodeId) -> Result<ColumnType> {
        if let Some(t) = self.node_types.get(&node) {
            return Ok(t.clone());
        }
        self.node_namespaces
            .get(&node)
            .and_then(|ns| self.ns(*ns).row_type())
            .map(|rt| ColumnType::not_null(rt.as_struct()))
            .ok_or_else(|| QuarryError::Planning(format!("node {node} has no validated type")))
    }

    /// Namespace registered for a query, FROM item or DML statement node.
    pub fn get_namespace(&self, node: NodeId) -> Option<&Namespace> {
        self.node_namespaces.get(&node).map(|ns| self.ns(*ns))
    }

    pub fn namespace(&self, id: NamespaceId) -> &Namespace {
        self.ns(id)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        self.sc(id)
    }

    /// Validate (if needed) and return the row type of a registered node.
    pub fn validate_namespace(&mut self, node: NodeId) -> Result<RowType> {
        let ns = self.namespace_of(node)?;
        self.namespace_row_type(ns)
    }

    pub fn get_select_scope(&self, select: NodeId) -> Option<ScopeId> {
        self.select_scopes.get(&select).map(|s| s.select)
    }

    pub fn get_from_scope(&self, select: NodeId) -> Option<ScopeId> {
        self.get_select_scope(select)
    }

    pub fn get_where_scope(&self, select: NodeId) -> Option<ScopeId> {
        self.get_select_scope(select)
    }

    pub fn get_group_scope(&self, select: NodeId) -> Option<ScopeId> {
        self.get_select_scope(select)
    }

    pub fn get_having_scope(&self, select: NodeId) -> Option<ScopeId> {
        self.select_scopes
            .get(&select)
            .map(|s| s.aggregating.unwrap_or(s.select))
    }

    pub fn get_order_scope(&self, select: NodeId) -> Option<ScopeId> {
        self.select_scopes.get(&select).and_then(|s| s.order)
    }

    pub fn get_join_scope(&self, join: NodeId) -> Option<ScopeId> {
        self.join_scopes.get(&join).copied()
    }

    /// Whether a validated SELECT aggregates.
    pub fn is_aggregate(&self, select: NodeId) -> bool {
        self.select_scopes
            .get(&select)
            .is_some_and(|s| s.is_aggregate)
    }

    /// Fully qualified form of an identifier: the table alias followed by
    /// the column and any field path. A select-list alias reference
    /// qualifies to the alias itself.
    pub fn get_qualified_identifier(&self, node: NodeId) -> Option<Vec<String>> {
        match self.resolutions.get(&node)? {
            Resolution::Column { alias, path, .. } => {
                let mut names = vec![alias.clone()];
                names.extend(path.iter().cloned());
                Some(names)
            }
            Resolution::SelectAlias { select, ordinal } => {
                let row_type = self.select_row_types.get(select)?;
                Some(vec![row_type.field(*ordinal).name().clone()])
            }
        }
    }

    /// Select list with stars expanded and every item aliased.
    pub fn get_expanded_select_list(&self, select: NodeId) -> Option<&[SelectItem]> {
        self.expanded_select_lists.get(&select).map(Vec::as_slice)
    }
}
