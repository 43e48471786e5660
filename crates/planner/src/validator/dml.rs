//! INSERT, UPDATE, DELETE and MERGE validation.
//!
//! UPDATE, DELETE and MERGE are validated through the source SELECT the
//! rewrite synthesized for them; the statement node itself is bound to the
//! target table namespace.

use std::sync::Arc;

use quarry_common::{NodeId, QuarryError, Result, ValidationErrorKind};
use tracing::debug;

use crate::ast::{Assignment, Delete, Insert, Merge, Query, QueryBody, Update};
use crate::catalog::{AccessType, Table};
use crate::types::{can_assign, RowType};

use super::namespace::NamespaceId;
use super::{fail, SqlValidator};

impl SqlValidator {
    pub(crate) fn validate_insert(&mut self, ins: &Insert) -> Result<()> {
        let (ns, table) = self.target_table(ins.id)?;
        self.check_access(ns, AccessType::Insert, ins.id)?;
        let target = self.insert_target_row_type(&table, &ins.columns, ins.id)?;
        let source = self.validate_query(&ins.source, Some(target.clone()))?;
        if source.len() != target.len() {
            return Err(fail(
                ValidationErrorKind::UnmatchInsertColumn {
                    target: target.len(),
                    source_count: source.len(),
                },
                Some(ins.id),
            ));
        }
        let nodes = self.source_item_nodes(&ins.source);
        for i in 0..target.len() {
            let node = nodes.get(i).copied().unwrap_or(ins.id);
            self.check_assignable(&target, i, &source, i, node)?;
        }
        debug!(node = %ins.id, columns = target.len(), "validated insert");
        Ok(())
    }

    pub(crate) fn validate_update(&mut self, upd: &Update) -> Result<()> {
        let (ns, table) = self.target_table(upd.id)?;
        self.check_access(ns, AccessType::Update, upd.id)?;
        let row_type = table.row_type();
        let positions = self.assignment_positions(&row_type, &upd.assignments, upd.id)?;
        let source = dml_source(upd.id, upd.source_select.as_ref())?;
        // Source rows are the target row followed by the new values.
        let expected = row_type.concat(&row_type.project(&positions));
        let source_type = self.validate_query(source, Some(expected))?;
        self.check_assignments(&row_type, &positions, &upd.assignments, &source_type)?;
        debug!(node = %upd.id, assignments = positions.len(), "validated update");
        Ok(())
    }

    pub(crate) fn validate_delete(&mut self, del: &Delete) -> Result<()> {
        let (ns, _) = self.target_table(del.id)?;
        self.check_access(ns, AccessType::Delete, del.id)?;
        let source = dml_source(del.id, del.source_select.as_ref())?;
        self.validate_query(source, None)?;
        debug!(node = %del.id, "validated delete");
        Ok(())
    }

    pub(crate) fn validate_merge(&mut self, m: &Merge) -> Result<()> {
        let (ns, table) = self.target_table(m.id)?;
        // The target namespace may sit on the null side of the source join;
        // assignments check against the declared columns.
        let row_type = table.row_type();
        if m.update.is_some() {
            self.check_access(ns, AccessType::Update, m.id)?;
        }
        if m.insert.is_some() {
            self.check_access(ns, AccessType::Insert, m.id)?;
        }
        if m.delete {
            self.check_access(ns, AccessType::Delete, m.id)?;
        }
        let mut update_positions = vec![];
        if let Some(u) = &m.update {
            update_positions = self.assignment_positions(&row_type, &u.assignments, u.id)?;
            for (a, &pos) in u.assignments.iter().zip(&update_positions) {
                if self.is_unknown(&a.value) {
                    self.node_types
                        .insert(a.value.id, row_type.column_type(pos).with_nullable(true));
                }
            }
        }
        let source = dml_source(m.id, m.source_select.as_ref())?;
        let source_type = self.validate_query(source, None)?;
        if let Some(u) = &m.update {
            self.check_assignments(&row_type, &update_positions, &u.assignments, &source_type)?;
        }
        if let Some(ins) = &m.insert {
            let target = self.insert_target_row_type(&table, &ins.columns, ins.id)?;
            if target.len() != ins.values.len() {
                return Err(fail(
                    ValidationErrorKind::UnmatchInsertColumn {
                        target: target.len(),
                        source_count: ins.values.len(),
                    },
                    Some(ins.id),
                ));
            }
            let scope = self.get_select_scope(source.id).ok_or_else(|| {
                QuarryError::Planning(format!("merge source {} has no scope", source.id))
            })?;
            let mut values = vec![];
            for (i, v) in ins.values.iter().enumerate() {
                self.infer_unknown_types(scope, v, Some(target.column_type(i)))?;
                values.push((format!("EXPR${i}"), self.derive_type(scope, v)?));
            }
            let values = RowType::of(values);
            for (i, v) in ins.values.iter().enumerate() {
                self.check_assignable(&target, i, &values, i, v.id)?;
            }
        }
        debug!(node = %m.id, "validated merge");
        Ok(())
    }

    // -------------------------
    // Helpers
    // -------------------------

    /// Table namespace bound to a DML statement, validated.
    fn target_table(&mut self, stmt: NodeId) -> Result<(NamespaceId, Arc<dyn Table>)> {
        let ns = self.namespace_of(stmt)?;
        self.namespace_row_type(ns)?;
        let table = self.ns(ns).table().cloned().ok_or_else(|| {
            QuarryError::Planning(format!("target of statement {stmt} is not a table"))
        })?;
        Ok((ns, table))
    }

    /// Row type an INSERT column list asks for. Columns left out must be
    /// nullable or have a default.
    fn insert_target_row_type(
        &self,
        table: &Arc<dyn Table>,
        columns: &[String],
        node: NodeId,
    ) -> Result<RowType> {
        let row_type = table.row_type();
        if columns.is_empty() {
            return Ok(row_type);
        }
        let positions = self.target_positions(&row_type, columns, node)?;
        for (i, field) in row_type.fields().iter().enumerate() {
            if !positions.contains(&i)
                && !field.is_nullable()
                && !table.column_has_default(field.name())
            {
                return Err(fail(
                    ValidationErrorKind::ColumnHasNoDefault(field.name().clone()),
                    Some(node),
                ));
            }
        }
        Ok(row_type.project(&positions))
    }

    fn assignment_positions(
        &self,
        row_type: &RowType,
        assignments: &[Assignment],
        node: NodeId,
    ) -> Result<Vec<usize>> {
        let columns: Vec<String> = assignments.iter().map(|a| a.column.clone()).collect();
        self.target_positions(row_type, &columns, node)
    }

    fn target_positions(
        &self,
        row_type: &RowType,
        columns: &[String],
        node: NodeId,
    ) -> Result<Vec<usize>> {
        let mut positions = Vec::with_capacity(columns.len());
        for c in columns {
            let idx = row_type
                .index_of(c, self.config.case_sensitive)
                .ok_or_else(|| {
                    fail(ValidationErrorKind::UnknownTargetColumn(c.clone()), Some(node))
                })?;
            if positions.contains(&idx) {
                return Err(fail(
                    ValidationErrorKind::DuplicateTargetColumn(c.clone()),
                    Some(node),
                ));
            }
            positions.push(idx);
        }
        Ok(positions)
    }

    /// The new values of an UPDATE or MERGE are the trailing source columns.
    fn check_assignments(
        &self,
        row_type: &RowType,
        positions: &[usize],
        assignments: &[Assignment],
        source_type: &RowType,
    ) -> Result<()> {
        let offset = source_type.len().checked_sub(positions.len()).ok_or_else(|| {
            QuarryError::Planning("source select is narrower than its assignments".to_string())
        })?;
        for (k, (a, &pos)) in assignments.iter().zip(positions).enumerate() {
            self.check_assignable(row_type, pos, source_type, offset + k, a.value.id)?;
        }
        Ok(())
    }

    fn check_assignable(
        &self,
        target: &RowType,
        target_pos: usize,
        source: &RowType,
        source_pos: usize,
        node: NodeId,
    ) -> Result<()> {
        let t = target.column_type(target_pos);
        let s = source.column_type(source_pos);
        if can_assign(&t.data_type, &s.data_type) {
            return Ok(());
        }
        Err(fail(
            ValidationErrorKind::TypeNotAssignable {
                column: target.field(target_pos).name().clone(),
                target_type: t.to_string(),
                source_type: s.to_string(),
            },
            Some(node),
        ))
    }

    /// Node of each source column, for error positions.
    fn source_item_nodes(&self, query: &Query) -> Vec<NodeId> {
        match &query.body {
            QueryBody::Select(_) => self
                .expanded_select_lists
                .get(&query.id)
                .map(|items| items.iter().map(|i| i.expr.id).collect())
                .unwrap_or_default(),
            QueryBody::Values(values) => values
                .rows
                .first()
                .map(|r| r.values.iter().map(|v| v.id).collect())
                .unwrap_or_default(),
            QueryBody::SetOp(op) => self.source_item_nodes(&op.left),
            QueryBody::Ordered(o) => self.source_item_nodes(&o.query),
            QueryBody::Table(_) => vec![],
        }
    }
}

fn dml_source(stmt: NodeId, source: Option<&Arc<Query>>) -> Result<&Arc<Query>> {
    source.ok_or_else(|| {
        QuarryError::Planning(format!("statement {stmt} has no source select; rewrite first"))
    })
}
