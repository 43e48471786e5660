use crate::rel::{RelKind, RelNode, SortKey};

/// Render a relational tree as human-readable multiline text.
pub fn explain_rel(rel: &RelNode) -> String {
    let mut s = String::new();
    fmt_rel(rel, 0, &mut s);
    s
}

fn fmt_rel(rel: &RelNode, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match &rel.kind {
        RelKind::Scan { table } => {
            out.push_str(&format!(
                "{pad}Scan table={}\n",
                table.qualified_name().join(".")
            ));
        }
        RelKind::Values { rows } => {
            out.push_str(&format!(
                "{pad}Values columns={:?} rows={}\n",
                rel.row_type().field_names(),
                rows.len()
            ));
            for row in rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                out.push_str(&format!("{pad}  ({})\n", cells.join(", ")));
            }
        }
        RelKind::Filter { input, condition } => {
            out.push_str(&format!("{pad}Filter {condition}\n"));
            fmt_rel(input, indent + 1, out);
        }
        RelKind::Project {
            input,
            exprs,
            names,
        } => {
            out.push_str(&format!("{pad}Project\n"));
            for (e, name) in exprs.iter().zip(names) {
                out.push_str(&format!("{pad}  {name} := {e}\n"));
            }
            fmt_rel(input, indent + 1, out);
        }
        RelKind::Join {
            left,
            right,
            condition,
            join_type,
        } => {
            out.push_str(&format!("{pad}Join type={join_type} on={condition}\n"));
            fmt_rel(left, indent + 1, out);
            fmt_rel(right, indent + 1, out);
        }
        RelKind::Correlate {
            left,
            right,
            correlation,
            required,
            join_type,
        } => {
            out.push_str(&format!(
                "{pad}Correlate type={join_type} correlation={correlation} required={required:?}\n"
            ));
            fmt_rel(left, indent + 1, out);
            fmt_rel(right, indent + 1, out);
        }
        RelKind::Aggregate {
            input,
            group,
            calls,
        } => {
            out.push_str(&format!("{pad}Aggregate group={group:?}\n"));
            for c in calls {
                let distinct = if c.distinct { "DISTINCT " } else { "" };
                let args: Vec<String> = c.args.iter().map(|a| format!("${a}")).collect();
                out.push_str(&format!(
                    "{pad}  {} := {}({distinct}{})\n",
                    c.name,
                    c.func,
                    args.join(", ")
                ));
            }
            fmt_rel(input, indent + 1, out);
        }
        RelKind::Sort {
            input,
            keys,
            offset,
            fetch,
        } => {
            let keys: Vec<String> = keys.iter().map(fmt_sort_key).collect();
            out.push_str(&format!(
                "{pad}Sort keys=[{}] offset={offset:?} fetch={fetch:?}\n",
                keys.join(", ")
            ));
            fmt_rel(input, indent + 1, out);
        }
        RelKind::SetOp { kind, all, inputs } => {
            let all = if *all { " ALL" } else { "" };
            out.push_str(&format!("{pad}SetOp {kind}{all}\n"));
            for i in inputs {
                fmt_rel(i, indent + 1, out);
            }
        }
    }
}

fn fmt_sort_key(k: &SortKey) -> String {
    let dir = if k.descending { "DESC" } else { "ASC" };
    let nulls = if k.nulls_first { "NULLS FIRST" } else { "NULLS LAST" };
    format!("${} {dir} {nulls}", k.field)
}
