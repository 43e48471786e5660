#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use quarry_common::{Conformance, CorrelationId, QuarryError, Result, ValidatorConfig};
use quarry_planner::ast::{SetOpKind, Statement};
use quarry_planner::rel::{AggFunc, JoinType, RelKind, RelNode, Rex, RexOp, ScalarValue};
use quarry_planner::types::RowType;
use quarry_planner::{sql_to_statement, CatalogReader, MemoryCatalog, OperatorTable, SqlValidator, Table};
use tracing_subscriber::EnvFilter;

// -----------------------------
// Catalog
// -----------------------------

pub const CATALOG_JSON: &str = r#"{
  "default_schema": ["sales"],
  "tables": [
    {
      "name": "emp",
      "columns": [
        {"name": "empno", "type": "INTEGER", "nullable": false},
        {"name": "ename", "type": "VARCHAR(20)", "nullable": false},
        {"name": "job", "type": "VARCHAR(10)"},
        {"name": "mgr", "type": "INTEGER"},
        {"name": "deptno", "type": "INTEGER"},
        {"name": "sal", "type": "INTEGER", "nullable": false},
        {"name": "comm", "type": "INTEGER"}
      ],
      "unique_keys": [["empno"]]
    },
    {
      "name": "dept",
      "columns": [
        {"name": "deptno", "type": "INTEGER", "nullable": false},
        {"name": "name", "type": "VARCHAR(20)", "nullable": false}
      ],
      "unique_keys": [["deptno"]]
    },
    {
      "name": "bonus",
      "columns": [
        {"name": "ename", "type": "VARCHAR(20)"},
        {"name": "job", "type": "VARCHAR(10)"},
        {"name": "sal", "type": "INTEGER"},
        {"name": "comm", "type": "INTEGER"}
      ],
      "access": ["select"]
    },
    {
      "name": "orders",
      "columns": [
        {"name": "id", "type": "INTEGER", "nullable": false},
        {"name": "empno", "type": "INTEGER"},
        {"name": "amount", "type": "INTEGER"},
        {"name": "note", "type": "VARCHAR", "nullable": false, "has_default": true}
      ],
      "unique_keys": [["id"]]
    }
  ]
}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn catalog() -> Arc<MemoryCatalog> {
    Arc::new(MemoryCatalog::from_json(CATALOG_JSON).expect("fixture catalog"))
}

pub fn table(name: &str) -> Arc<dyn Table> {
    catalog()
        .get_table(&[name.to_string()])
        .unwrap_or_else(|| panic!("fixture table {name}"))
}

pub fn validator_with(config: ValidatorConfig) -> SqlValidator {
    init_tracing();
    SqlValidator::new(catalog(), Arc::new(OperatorTable::with_builtins()), config)
}

pub fn validator() -> SqlValidator {
    validator_with(ValidatorConfig::default())
}

pub fn validate_with(config: ValidatorConfig, sql: &str) -> Result<(SqlValidator, Statement)> {
    let mut v = validator_with(config);
    let stmt = v.validate(sql_to_statement(sql)?)?;
    Ok((v, stmt))
}

pub fn validate(sql: &str) -> Result<(SqlValidator, Statement)> {
    validate_with(ValidatorConfig::default(), sql)
}

/// Output row type of a query that must validate.
pub fn row_type_of(sql: &str) -> RowType {
    let (mut v, stmt) = validate(sql).unwrap_or_else(|e| panic!("validate {sql}: {e}"));
    v.validate_namespace(stmt.id()).expect("row type")
}

pub fn validation_error(sql: &str) -> QuarryError {
    validate(sql)
        .err()
        .unwrap_or_else(|| panic!("expected {sql} to fail validation"))
}

pub fn validation_error_with(conformance: Conformance, sql: &str) -> QuarryError {
    validate_with(ValidatorConfig::default().with_conformance(conformance), sql)
        .err()
        .unwrap_or_else(|| panic!("expected {sql} to fail under {conformance:?}"))
}

// -----------------------------
// Data
// -----------------------------

pub type Row = Vec<ScalarValue>;
pub type TableData = HashMap<String, Vec<Row>>;

pub fn int(v: i64) -> ScalarValue {
    ScalarValue::Int64(v)
}

pub fn text(s: &str) -> ScalarValue {
    ScalarValue::Utf8(s.to_string())
}

pub fn null() -> ScalarValue {
    ScalarValue::Null
}

#[allow(clippy::too_many_arguments)]
fn emp_row(
    empno: i64,
    ename: &str,
    job: &str,
    mgr: Option<i64>,
    deptno: Option<i64>,
    sal: i64,
    comm: Option<i64>,
) -> Row {
    let opt = |v: Option<i64>| v.map(int).unwrap_or(ScalarValue::Null);
    vec![
        int(empno),
        text(ename),
        text(job),
        opt(mgr),
        opt(deptno),
        int(sal),
        opt(comm),
    ]
}

/// Rows of the fixture tables, keyed by table name. Department 40 has no
/// employees and NOBODY has no department.
pub fn fixture_data() -> TableData {
    let mut data = TableData::new();
    data.insert(
        "dept".to_string(),
        vec![
            vec![int(10), text("ACCOUNTING")],
            vec![int(20), text("RESEARCH")],
            vec![int(30), text("SALES")],
            vec![int(40), text("OPERATIONS")],
        ],
    );
    data.insert(
        "emp".to_string(),
        vec![
            emp_row(7369, "SMITH", "CLERK", Some(7902), Some(20), 800, None),
            emp_row(7499, "ALLEN", "SALESMAN", Some(7698), Some(30), 1600, Some(300)),
            emp_row(7521, "WARD", "SALESMAN", Some(7698), Some(30), 1250, Some(500)),
            emp_row(7566, "JONES", "MANAGER", Some(7839), Some(20), 2975, None),
            emp_row(7839, "KING", "PRESIDENT", None, Some(10), 5000, None),
            emp_row(7902, "FORD", "ANALYST", Some(7566), Some(20), 3000, None),
            emp_row(7950, "NOBODY", "CLERK", Some(7839), None, 900, None),
        ],
    );
    data
}

// -----------------------------
// Reference evaluator
// -----------------------------

/// Rows bound to correlation variables.
pub type Env = HashMap<CorrelationId, Row>;

/// Evaluate a relational tree naively: every `Correlate` re-runs its right
/// side per left row.
pub fn eval(rel: &RelNode, data: &TableData) -> Vec<Row> {
    eval_in(rel, data, &Env::new())
}

/// Rows as a sorted multiset, for order-insensitive comparison.
pub fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort();
    rows
}

fn eval_in(rel: &RelNode, data: &TableData, env: &Env) -> Vec<Row> {
    match &rel.kind {
        RelKind::Scan { table } => {
            let name = table
                .qualified_name()
                .last()
                .map(|n| n.to_ascii_lowercase())
                .unwrap_or_default();
            data.get(&name)
                .cloned()
                .unwrap_or_else(|| panic!("no data for table {name}"))
        }
        RelKind::Values { rows } => rows.clone(),
        RelKind::Filter { input, condition } => eval_in(input, data, env)
            .into_iter()
            .filter(|row| is_true(&eval_rex(condition, row, env)))
            .collect(),
        RelKind::Project { input, exprs, .. } => eval_in(input, data, env)
            .iter()
            .map(|row| exprs.iter().map(|e| eval_rex(e, row, env)).collect())
            .collect(),
        RelKind::Join {
            left,
            right,
            condition,
            join_type,
        } => {
            let l = eval_in(left, data, env);
            let r = eval_in(right, data, env);
            join_rows(
                &l,
                &r,
                left.row_type().len(),
                right.row_type().len(),
                *join_type,
                |row| is_true(&eval_rex(condition, row, env)),
            )
        }
        RelKind::Correlate {
            left,
            right,
            correlation,
            join_type,
            ..
        } => {
            let width = right.row_type().len();
            let mut out = vec![];
            for l in eval_in(left, data, env) {
                let mut inner = env.clone();
                inner.insert(*correlation, l.clone());
                let r = eval_in(right, data, &inner);
                match join_type {
                    JoinType::Inner => out.extend(r.into_iter().map(|r| concat(&l, &r))),
                    JoinType::Left if r.is_empty() => {
                        out.push(concat(&l, &vec![ScalarValue::Null; width]))
                    }
                    JoinType::Left => out.extend(r.into_iter().map(|r| concat(&l, &r))),
                    JoinType::Semi if !r.is_empty() => out.push(l),
                    JoinType::Anti if r.is_empty() => out.push(l),
                    JoinType::Semi | JoinType::Anti => {}
                    other => panic!("correlate type {other} not evaluated"),
                }
            }
            out
        }
        RelKind::Aggregate {
            input,
            group,
            calls,
        } => {
            let rows = eval_in(input, data, env);
            let mut groups: BTreeMap<Row, Vec<Row>> = BTreeMap::new();
            for row in rows {
                let key = group.iter().map(|&g| row[g].clone()).collect();
                groups.entry(key).or_default().push(row);
            }
            if group.is_empty() && groups.is_empty() {
                groups.insert(vec![], vec![]);
            }
            groups
                .into_iter()
                .map(|(mut key, rows)| {
                    for call in calls {
                        let mut args: Vec<ScalarValue> = match call.args.first() {
                            Some(&a) => rows.iter().map(|r| r[a].clone()).collect(),
                            None => vec![int(1); rows.len()],
                        };
                        if call.distinct {
                            args.sort();
                            args.dedup();
                        }
                        key.push(aggregate(call.func, args));
                    }
                    key
                })
                .collect()
        }
        RelKind::Sort {
            input,
            keys,
            offset,
            fetch,
        } => {
            let mut rows = eval_in(input, data, env);
            rows.sort_by(|a, b| {
                for k in keys {
                    let (x, y) = (&a[k.field], &b[k.field]);
                    let ord = match (x.is_null(), y.is_null()) {
                        (true, true) => std::cmp::Ordering::Equal,
                        (true, false) if k.nulls_first => std::cmp::Ordering::Less,
                        (true, false) => std::cmp::Ordering::Greater,
                        (false, true) if k.nulls_first => std::cmp::Ordering::Greater,
                        (false, true) => std::cmp::Ordering::Less,
                        (false, false) if k.descending => y.cmp(x),
                        (false, false) => x.cmp(y),
                    };
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            rows.into_iter()
                .skip(offset.unwrap_or(0))
                .take(fetch.unwrap_or(usize::MAX))
                .collect()
        }
        RelKind::SetOp { kind, all, inputs } => {
            let mut results = inputs.iter().map(|i| eval_in(i, data, env));
            let mut acc = results.next().unwrap_or_default();
            for next in results {
                acc = match kind {
                    SetOpKind::Union => {
                        acc.extend(next);
                        acc
                    }
                    SetOpKind::Intersect => {
                        let mut pool = next;
                        acc.into_iter()
                            .filter(|row| take_one(&mut pool, row))
                            .collect()
                    }
                    SetOpKind::Except => {
                        let mut pool = next;
                        acc.into_iter()
                            .filter(|row| !take_one(&mut pool, row))
                            .collect()
                    }
                };
            }
            if !*all {
                acc.sort();
                acc.dedup();
            }
            acc
        }
    }
}

fn take_one(pool: &mut Vec<Row>, row: &Row) -> bool {
    match pool.iter().position(|r| r == row) {
        Some(i) => {
            pool.swap_remove(i);
            true
        }
        None => false,
    }
}

fn concat(l: &Row, r: &Row) -> Row {
    let mut row = l.clone();
    row.extend(r.iter().cloned());
    row
}

fn join_rows(
    left: &[Row],
    right: &[Row],
    left_width: usize,
    right_width: usize,
    join_type: JoinType,
    matches: impl Fn(&Row) -> bool,
) -> Vec<Row> {
    let mut out = vec![];
    let mut right_matched = vec![false; right.len()];
    for l in left {
        let mut matched = false;
        for (i, r) in right.iter().enumerate() {
            let row = concat(l, r);
            if matches(&row) {
                matched = true;
                right_matched[i] = true;
                if join_type.projects_right() {
                    out.push(row);
                }
            }
        }
        match join_type {
            JoinType::Semi if matched => out.push(l.clone()),
            JoinType::Anti if !matched => out.push(l.clone()),
            JoinType::Left | JoinType::Full if !matched => {
                out.push(concat(l, &vec![ScalarValue::Null; right_width]))
            }
            _ => {}
        }
    }
    if matches!(join_type, JoinType::Right | JoinType::Full) {
        for (r, _) in right.iter().zip(&right_matched).filter(|(_, m)| !**m) {
            out.push(concat(&vec![ScalarValue::Null; left_width], r));
        }
    }
    out
}

fn aggregate(func: AggFunc, args: Vec<ScalarValue>) -> ScalarValue {
    let present: Vec<ScalarValue> = args.iter().filter(|v| !v.is_null()).cloned().collect();
    match func {
        AggFunc::Count => int(present.len() as i64),
        AggFunc::Sum => {
            if present.is_empty() {
                return ScalarValue::Null;
            }
            int(present.iter().map(as_int).sum())
        }
        AggFunc::Min => present.into_iter().min().unwrap_or(ScalarValue::Null),
        AggFunc::Max => present.into_iter().max().unwrap_or(ScalarValue::Null),
        AggFunc::SingleValue => match args.len() {
            0 => ScalarValue::Null,
            1 => args[0].clone(),
            n => panic!("scalar subquery returned {n} rows"),
        },
    }
}

fn as_int(v: &ScalarValue) -> i64 {
    match v {
        ScalarValue::Int64(i) => *i,
        other => panic!("not an integer: {other}"),
    }
}

fn is_true(v: &ScalarValue) -> bool {
    matches!(v, ScalarValue::Boolean(true))
}

fn eval_rex(rex: &Rex, row: &Row, env: &Env) -> ScalarValue {
    match rex {
        Rex::InputRef { index, .. } => row[*index].clone(),
        Rex::Literal { value, .. } => value.clone(),
        Rex::FieldAccess { expr, field, .. } => match expr.as_ref() {
            Rex::CorrelVariable { id, .. } => env
                .get(id)
                .unwrap_or_else(|| panic!("unbound correlation {id}"))[*field]
                .clone(),
            other => panic!("field access on {other} not evaluated"),
        },
        Rex::CorrelVariable { id, .. } => panic!("bare correlation variable {id}"),
        Rex::Call { op, operands, .. } => {
            let args: Vec<ScalarValue> = operands.iter().map(|o| eval_rex(o, row, env)).collect();
            eval_call(*op, args)
        }
    }
}

fn eval_call(op: RexOp, args: Vec<ScalarValue>) -> ScalarValue {
    use ScalarValue::{Boolean, Null};
    match op {
        RexOp::Eq | RexOp::NotEq | RexOp::Lt | RexOp::LtEq | RexOp::Gt | RexOp::GtEq => {
            let (a, b) = (&args[0], &args[1]);
            if a.is_null() || b.is_null() {
                return Null;
            }
            let ord = a.cmp(b);
            Boolean(match op {
                RexOp::Eq => ord.is_eq(),
                RexOp::NotEq => ord.is_ne(),
                RexOp::Lt => ord.is_lt(),
                RexOp::LtEq => ord.is_le(),
                RexOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
        RexOp::IsNotDistinctFrom => Boolean(args[0] == args[1]),
        RexOp::And => {
            if args.iter().any(|a| *a == Boolean(false)) {
                Boolean(false)
            } else if args.iter().any(ScalarValue::is_null) {
                Null
            } else {
                Boolean(true)
            }
        }
        RexOp::Or => {
            if args.iter().any(|a| *a == Boolean(true)) {
                Boolean(true)
            } else if args.iter().any(ScalarValue::is_null) {
                Null
            } else {
                Boolean(false)
            }
        }
        RexOp::Not => match &args[0] {
            Boolean(b) => Boolean(!b),
            _ => Null,
        },
        RexOp::IsNull => Boolean(args[0].is_null()),
        RexOp::IsNotNull => Boolean(!args[0].is_null()),
        RexOp::Plus | RexOp::Minus | RexOp::Multiply => {
            if args.iter().any(ScalarValue::is_null) {
                return Null;
            }
            let (a, b) = (as_int(&args[0]), as_int(&args[1]));
            int(match op {
                RexOp::Plus => a + b,
                RexOp::Minus => a - b,
                _ => a * b,
            })
        }
        RexOp::Case => {
            let (pairs, otherwise) = args.split_at(args.len() - 1);
            pairs
                .chunks(2)
                .find(|c| is_true(&c[0]))
                .map(|c| c[1].clone())
                .unwrap_or_else(|| otherwise[0].clone())
        }
        RexOp::Coalesce => args.into_iter().find(|a| !a.is_null()).unwrap_or(Null),
    }
}
