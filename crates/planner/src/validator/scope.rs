//! Scopes: the name-lookup environments of a statement.

use quarry_common::{NodeId, Result, ValidationErrorKind};

use crate::ast::{Expr, WindowSpec};
use crate::types::{ColumnType, RowType};

use super::namespace::{NamespaceId, NamespaceKind, ValidationStatus};
use super::{fail, Resolution, SqlValidator};

/// Index of a scope in the validator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    /// Root of every scope chain; resolves nothing.
    Empty,
    /// Holds one parameter namespace for free-standing expressions.
    Parameter,
    /// Scope of a join; `usage` is the scope its children also belong to.
    Join { usage: Option<ScopeId> },
    /// FROM-clause children of a SELECT.
    Select { select: NodeId },
    /// Above-aggregation view of a SELECT. With `distinct`, the "group keys"
    /// are the select items (ORDER BY of a SELECT DISTINCT).
    Aggregating { select: NodeId, distinct: bool },
    /// ORDER BY of a SELECT; may see select-list aliases.
    OrderBy { select: NodeId },
}

/// A namespace visible in a scope under an alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChild {
    pub ordinal: usize,
    pub alias: String,
    pub namespace: NamespaceId,
    pub nullable: bool,
}

/// Columns merged by `USING` or `NATURAL`. An unqualified reference to
/// `column` is not ambiguous across these namespaces and resolves to
/// `preferred`.
#[derive(Debug, Clone)]
pub struct UsingGroup {
    pub column: String,
    pub namespaces: Vec<NamespaceId>,
    pub preferred: NamespaceId,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub(crate) parent: Option<ScopeId>,
    pub(crate) node: Option<NodeId>,
    pub(crate) kind: ScopeKind,
    pub(crate) children: Vec<ScopeChild>,
    pub(crate) using_groups: Vec<UsingGroup>,
}

impl Scope {
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn kind(&self) -> &ScopeKind {
        &self.kind
    }

    pub fn children(&self) -> &[ScopeChild] {
        &self.children
    }

    /// Whether this scope owns children (as opposed to delegating lookups).
    pub fn is_list(&self) -> bool {
        matches!(
            self.kind,
            ScopeKind::Parameter | ScopeKind::Join { .. } | ScopeKind::Select { .. }
        )
    }
}

impl SqlValidator {
    pub(crate) fn add_scope(
        &mut self,
        parent: Option<ScopeId>,
        node: Option<NodeId>,
        kind: ScopeKind,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent,
            node,
            kind,
            children: vec![],
            using_groups: vec![],
        });
        id
    }

    pub(crate) fn sc(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    /// Register `namespace` under `alias`. A join scope forwards the child to
    /// its usage scope unless that is also its parent.
    pub(crate) fn add_child(
        &mut self,
        scope: ScopeId,
        alias: &str,
        namespace: NamespaceId,
        nullable: bool,
    ) {
        let s = &mut self.scopes[scope.0];
        let ordinal = s.children.len();
        s.children.push(ScopeChild {
            ordinal,
            alias: alias.to_string(),
            namespace,
            nullable,
        });
        if let Some(usage) = self.forward_target(scope) {
            self.add_child(usage, alias, namespace, nullable);
        }
    }

    pub(crate) fn add_using_group(&mut self, scope: ScopeId, group: UsingGroup) {
        self.scopes[scope.0].using_groups.push(group.clone());
        if let Some(usage) = self.forward_target(scope) {
            self.add_using_group(usage, group);
        }
    }

    fn forward_target(&self, scope: ScopeId) -> Option<ScopeId> {
        let s = &self.scopes[scope.0];
        match s.kind {
            ScopeKind::Join { usage: Some(u) } if Some(u) != s.parent => Some(u),
            _ => None,
        }
    }

    /// Find the child registered under a table alias or a (suffix of a)
    /// qualified table name, walking outwards.
    pub(crate) fn resolve_table(
        &self,
        scope: ScopeId,
        names: &[String],
    ) -> Option<(ScopeId, ScopeChild)> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = &self.scopes[id.0];
            if s.is_list() {
                let found = s.children.iter().find(|c| self.child_matches(c, names));
                if let Some(child) = found {
                    return Some((id, child.clone()));
                }
            }
            cur = s.parent;
        }
        None
    }

    fn child_matches(&self, child: &ScopeChild, names: &[String]) -> bool {
        let Some(last) = names.last() else {
            return false;
        };
        if !self.names_match(&child.alias, last) {
            return false;
        }
        if names.len() == 1 {
            return true;
        }
        let ns = self.ns(child.namespace);
        let qualified = match (&ns.table, &ns.kind) {
            (Some(t), _) => t.qualified_name(),
            (None, NamespaceKind::Table { names }) => names.clone(),
            _ => return false,
        };
        qualified.len() >= names.len()
            && qualified[qualified.len() - names.len()..]
                .iter()
                .zip(names)
                .all(|(a, b)| self.names_match(a, b))
    }

    /// The child of the nearest scope that has a column `name`.
    ///
    /// Several children of one scope having it is an ambiguity, unless they
    /// were all merged by the same USING/NATURAL join.
    pub(crate) fn find_qualifying_table_name(
        &mut self,
        scope: ScopeId,
        name: &str,
        node: NodeId,
    ) -> Result<Option<(ScopeId, ScopeChild)>> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.scopes[id.0].is_list() {
                let children = self.scopes[id.0].children.clone();
                let mut matches = vec![];
                for child in children {
                    if self.ns(child.namespace).status() == ValidationStatus::InProgress {
                        continue;
                    }
                    let row_type = self.namespace_row_type(child.namespace)?;
                    if row_type.index_of(name, self.config.case_sensitive).is_some() {
                        matches.push(child);
                    }
                }
                match matches.len() {
                    0 => {}
                    1 => return Ok(matches.pop().map(|c| (id, c))),
                    _ => {
                        let group = self.scopes[id.0].using_groups.iter().find(|g| {
                            self.names_match(&g.column, name)
                                && matches.iter().all(|m| g.namespaces.contains(&m.namespace))
                        });
                        let Some(group) = group else {
                            return Err(fail(
                                ValidationErrorKind::ColumnAmbiguous(name.to_string()),
                                Some(node),
                            ));
                        };
                        let preferred = group.preferred;
                        let pick = matches
                            .iter()
                            .position(|m| m.namespace == preferred)
                            .unwrap_or(0);
                        return Ok(Some((id, matches.swap_remove(pick))));
                    }
                }
            }
            cur = self.scopes[id.0].parent;
        }
        Ok(None)
    }

    /// Resolve an identifier expression to a column (or select alias) and
    /// its type.
    pub(crate) fn resolve_identifier(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        names: &[String],
    ) -> Result<(Resolution, ColumnType)> {
        if let ScopeKind::OrderBy { select } = self.scopes[scope.0].kind {
            if names.len() == 1 {
                if let Some(found) = self.resolve_order_alias(select, &names[0], expr.id)? {
                    return Ok(found);
                }
            }
        }
        if names.len() == 1 {
            let Some((sid, child)) = self.find_qualifying_table_name(scope, &names[0], expr.id)?
            else {
                return Err(fail(
                    ValidationErrorKind::ColumnNotFound(names[0].clone()),
                    Some(expr.id),
                ));
            };
            return self.column_of_child(sid, child, &names[0], &[], expr.id);
        }
        for k in (1..names.len()).rev() {
            if let Some((sid, child)) = self.resolve_table(scope, &names[..k]) {
                let row_type = self.namespace_row_type(child.namespace)?;
                if row_type.index_of(&names[k], self.config.case_sensitive).is_none() {
                    return Err(fail(
                        ValidationErrorKind::ColumnNotFoundInTable {
                            column: names[k].clone(),
                            table: names[..k].join("."),
                        },
                        Some(expr.id),
                    ));
                }
                return self.column_of_child(sid, child, &names[k], &names[k + 1..], expr.id);
            }
        }
        if let Some((sid, child)) = self.find_qualifying_table_name(scope, &names[0], expr.id)? {
            return self.column_of_child(sid, child, &names[0], &names[1..], expr.id);
        }
        Err(fail(
            ValidationErrorKind::TableNameNotFound(names[..names.len() - 1].join(".")),
            Some(expr.id),
        ))
    }

    fn column_of_child(
        &mut self,
        scope: ScopeId,
        child: ScopeChild,
        column: &str,
        fields: &[String],
        node: NodeId,
    ) -> Result<(Resolution, ColumnType)> {
        let row_type = self.namespace_row_type(child.namespace)?;
        let idx = row_type
            .index_of(column, self.config.case_sensitive)
            .ok_or_else(|| {
                fail(
                    ValidationErrorKind::ColumnNotFound(column.to_string()),
                    Some(node),
                )
            })?;
        let mut ty = row_type.column_type(idx);
        if child.nullable {
            ty = ty.with_nullable(true);
        }
        let mut path = vec![row_type.field(idx).name().clone()];
        for field in fields {
            let (name, next) = self.drill_field(&ty, field, node)?;
            path.push(name);
            ty = next;
        }
        let resolution = Resolution::Column {
            scope,
            namespace: child.namespace,
            alias: child.alias,
            path,
        };
        Ok((resolution, ty))
    }

    /// Step into field `name` of a struct-typed value.
    fn drill_field(
        &mut self,
        ty: &ColumnType,
        name: &str,
        node: NodeId,
    ) -> Result<(String, ColumnType)> {
        let drill = self.add_namespace(
            None,
            NamespaceKind::FieldDrill {
                column_type: ty.clone(),
            },
        );
        let row_type = self.namespace_row_type(drill)?;
        let unknown = || fail(ValidationErrorKind::UnknownField(name.to_string()), Some(node));
        if ty.struct_fields().is_none() {
            return Err(unknown());
        }
        let idx = row_type
            .index_of(name, self.config.case_sensitive)
            .ok_or_else(unknown)?;
        let field_type = row_type.column_type(idx);
        let nullable = ty.nullable || field_type.nullable;
        Ok((
            row_type.field(idx).name().clone(),
            field_type.with_nullable(nullable),
        ))
    }

    /// ORDER BY may name a select-list alias; under the obscuring conformance
    /// a bare name must be one.
    fn resolve_order_alias(
        &mut self,
        select: NodeId,
        name: &str,
        node: NodeId,
    ) -> Result<Option<(Resolution, ColumnType)>> {
        let conformance = self.config.conformance;
        if !conformance.is_sort_by_alias() {
            return Ok(None);
        }
        let Some(row_type) = self.select_row_types.get(&select).cloned() else {
            return Ok(None);
        };
        let positions = row_type.positions_of(name, self.config.case_sensitive);
        match positions.as_slice() {
            [ordinal] => Ok(Some((
                Resolution::SelectAlias {
                    select,
                    ordinal: *ordinal,
                },
                row_type.column_type(*ordinal),
            ))),
            [] if conformance.is_sort_by_alias_obscures() => Err(fail(
                ValidationErrorKind::ColumnNotFound(name.to_string()),
                Some(node),
            )),
            [] => Ok(None),
            _ => Err(fail(
                ValidationErrorKind::ColumnAmbiguous(name.to_string()),
                Some(node),
            )),
        }
    }

    /// Scope in which the operands of `call` are resolved. Inside an
    /// aggregating scope, arguments of aggregates and grouped expressions
    /// are evaluated below the aggregation.
    pub(crate) fn get_operand_scope(&self, scope: ScopeId, call: &Expr) -> ScopeId {
        let s = &self.scopes[scope.0];
        let parent = s.parent.unwrap_or(scope);
        let is_aggregate_call = matches!(
            &call.kind,
            crate::ast::ExprKind::Call { op, .. } if self.operators.is_aggregator(op)
        );
        // Aggregate arguments in ORDER BY never see select-list aliases.
        if matches!(s.kind, ScopeKind::OrderBy { .. }) && is_aggregate_call {
            return parent;
        }
        let ScopeKind::Aggregating {
            select,
            distinct: false,
        } = s.kind
        else {
            return scope;
        };
        if is_aggregate_call {
            return parent;
        }
        if self.is_group_key(select, call) {
            return parent;
        }
        scope
    }

    /// Named window visible from `scope`.
    pub(crate) fn lookup_window(&self, scope: ScopeId, name: &str) -> Option<WindowSpec> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = &self.scopes[id.0];
            if let ScopeKind::Select { select } = s.kind {
                let found = self
                    .queries
                    .get(&select)
                    .and_then(|q| q.as_select())
                    .and_then(|sel| {
                        sel.windows.iter().find(|w| {
                            w.name.len() == 1 && self.names_match(&w.name[0], name)
                        })
                    });
                if let Some(def) = found {
                    return Some(def.spec.clone());
                }
            }
            cur = s.parent;
        }
        None
    }

    /// Every column visible from `scope`, nearest first, for completion.
    pub(crate) fn visible_columns(&mut self, scope: ScopeId) -> Vec<(String, String)> {
        let mut out = vec![];
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.scopes[id.0].is_list() {
                for child in self.scopes[id.0].children.clone() {
                    let row_type = self
                        .namespace_row_type(child.namespace)
                        .unwrap_or_else(|_| RowType::default());
                    for name in row_type.field_names() {
                        out.push((child.alias.clone(), name));
                    }
                }
            }
            cur = self.scopes[id.0].parent;
        }
        out
    }
}
