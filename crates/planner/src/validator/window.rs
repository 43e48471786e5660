//! WINDOW clause validation and window reference resolution.

use std::collections::HashSet;

use quarry_common::{NodeId, Result, ValidationErrorKind};
use tracing::trace;

use crate::ast::{Select, WindowRef, WindowSpec};

use super::scope::ScopeId;
use super::{fail, SqlValidator};

impl SqlValidator {
    /// Resolve a window reference to a self-contained specification,
    /// folding in the chain of windows it refines.
    pub(crate) fn resolve_window(
        &self,
        scope: ScopeId,
        window: &WindowRef,
        node: NodeId,
    ) -> Result<WindowSpec> {
        let spec = match window {
            WindowRef::Named(name) => self.lookup_window(scope, name).ok_or_else(|| {
                fail(ValidationErrorKind::WindowNotFound(name.clone()), Some(node))
            })?,
            WindowRef::Spec(spec) => spec.clone(),
        };
        self.overlay_window(scope, spec, node, &mut HashSet::new())
    }

    fn overlay_window(
        &self,
        scope: ScopeId,
        spec: WindowSpec,
        node: NodeId,
        seen: &mut HashSet<String>,
    ) -> Result<WindowSpec> {
        let Some(base_name) = spec.base.clone() else {
            return Ok(spec);
        };
        if !seen.insert(base_name.to_ascii_lowercase()) {
            return Err(fail(ValidationErrorKind::CycleDetected, Some(node)));
        }
        let base = self.lookup_window(scope, &base_name).ok_or_else(|| {
            fail(ValidationErrorKind::WindowNotFound(base_name.clone()), Some(node))
        })?;
        let base = self.overlay_window(scope, base, node, seen)?;
        if !spec.partition_by.is_empty() {
            return Err(fail(ValidationErrorKind::PartitionNotAllowed, Some(node)));
        }
        if !spec.order_by.is_empty() && !base.order_by.is_empty() {
            return Err(fail(ValidationErrorKind::OrderByOverlap, Some(node)));
        }
        if base.frame.is_some() {
            return Err(fail(ValidationErrorKind::RefWindowWithFrame, Some(node)));
        }
        Ok(WindowSpec {
            base: None,
            partition_by: base.partition_by,
            order_by: if spec.order_by.is_empty() {
                base.order_by
            } else {
                spec.order_by
            },
            frame: spec.frame,
        })
    }

    pub(crate) fn validate_window_clause(&mut self, select: &Select, scope: ScopeId) -> Result<()> {
        let parent = self.sc(scope).parent();
        let mut names: Vec<String> = vec![];
        let mut specs: Vec<String> = vec![];
        for def in &select.windows {
            let [name] = def.name.as_slice() else {
                return Err(fail(
                    ValidationErrorKind::WindowNameMustBeSimple,
                    Some(def.id),
                ));
            };
            let shadows_outer = parent.is_some_and(|p| self.lookup_window(p, name).is_some());
            if shadows_outer || names.iter().any(|n| self.names_match(n, name)) {
                return Err(fail(
                    ValidationErrorKind::DuplicateWindowName(name.clone()),
                    Some(def.id),
                ));
            }
            names.push(name.clone());
            for e in def
                .spec
                .partition_by
                .iter()
                .chain(def.spec.order_by.iter().map(|o| &o.expr))
                .chain(def.spec.frame.iter().flat_map(|f| f.offsets()))
            {
                self.infer_unknown_types(scope, e, None)?;
                self.derive_type(scope, e)?;
            }
            self.resolve_window(scope, &WindowRef::Spec(def.spec.clone()), def.id)?;
            let key = def.spec.render(&|e| e.identifier().map(|_| self.expr_key(e)));
            if specs.contains(&key) {
                return Err(fail(ValidationErrorKind::DupWindowSpec, Some(def.id)));
            }
            trace!(window = %name, spec = %key, "validated window");
            specs.push(key);
        }
        Ok(())
    }
}
