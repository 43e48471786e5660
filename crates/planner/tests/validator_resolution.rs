mod support;

use arrow_schema::DataType;
use quarry_common::{Conformance, ValidationErrorKind, ValidatorConfig};
use quarry_planner::ast::Statement;

use support::{row_type_of, validate, validate_with, validation_error, validation_error_with};

fn names(sql: &str) -> Vec<String> {
    row_type_of(sql).field_names()
}

// -----------------------------
// Name resolution
// -----------------------------

#[test]
fn star_expands_table_columns_in_order() {
    let rt = row_type_of("SELECT * FROM emp");
    assert_eq!(
        rt.field_names(),
        vec!["empno", "ename", "job", "mgr", "deptno", "sal", "comm"]
    );
    let empno = rt.column_type(0);
    assert_eq!(empno.data_type, DataType::Int32);
    assert!(!empno.nullable);
    assert_eq!(rt.column_type(1).data_type, DataType::Utf8);
    assert!(rt.column_type(4).nullable);
}

#[test]
fn unqualified_column_on_both_join_sides_is_ambiguous() {
    let err = validation_error("SELECT deptno FROM emp JOIN dept ON emp.deptno = dept.deptno");
    assert!(
        err.to_string().contains("Column 'deptno' is ambiguous"),
        "err={err}"
    );
}

#[test]
fn unknown_columns_are_reported_with_their_table() {
    let err = validation_error("SELECT foo FROM emp");
    assert!(
        err.to_string().contains("Column 'foo' not found in any table"),
        "err={err}"
    );

    let err = validation_error("SELECT e.foo FROM emp e");
    assert!(
        err.to_string().contains("Column 'foo' not found in table 'e'"),
        "err={err}"
    );
}

#[test]
fn unknown_table_is_reported() {
    let err = validation_error("SELECT * FROM nope");
    assert!(err.to_string().contains("Object 'nope' not found"), "err={err}");
}

#[test]
fn using_merges_the_common_column() {
    let rt = row_type_of("SELECT * FROM emp JOIN dept USING (deptno)");
    let names = rt.field_names();
    assert_eq!(names.len(), 8, "names={names:?}");
    assert_eq!(names.iter().filter(|n| *n == "deptno").count(), 1);
    assert_eq!(names.last().map(String::as_str), Some("name"));

    // The merged column is not ambiguous when unqualified.
    let rt = row_type_of("SELECT deptno, name FROM emp JOIN dept USING (deptno)");
    assert_eq!(rt.field_names(), vec!["deptno", "name"]);
}

#[test]
fn natural_join_merges_like_using() {
    assert_eq!(names("SELECT * FROM emp NATURAL JOIN dept").len(), 8);
}

#[test]
fn outer_join_makes_null_side_nullable() {
    let rt = row_type_of(
        "SELECT e.ename, d.name FROM emp e LEFT JOIN dept d ON e.deptno = d.deptno",
    );
    assert!(!rt.column_type(0).nullable);
    assert!(rt.column_type(1).nullable);

    let rt = row_type_of(
        "SELECT e.ename, d.name FROM emp e RIGHT JOIN dept d ON e.deptno = d.deptno",
    );
    assert!(rt.column_type(0).nullable);
    assert!(!rt.column_type(1).nullable);

    let rt = row_type_of(
        "SELECT e.ename, d.name FROM emp e FULL JOIN dept d ON e.deptno = d.deptno",
    );
    assert!(rt.column_type(0).nullable);
    assert!(rt.column_type(1).nullable);
}

#[test]
fn from_items_do_not_see_their_siblings() {
    let err = validation_error(
        "SELECT * FROM emp e, (SELECT * FROM dept WHERE dept.deptno = e.deptno) d",
    );
    assert!(err.to_string().contains("'e'"), "err={err}");
}

#[test]
fn correlated_scalar_subquery_sees_outer_alias() {
    let rt = row_type_of(
        "SELECT d.name, (SELECT COUNT(*) FROM emp e WHERE e.deptno = d.deptno) AS cnt FROM dept d",
    );
    assert_eq!(rt.field_names(), vec!["name", "cnt"]);
    let cnt = rt.column_type(1);
    assert_eq!(cnt.data_type, DataType::Int64);
    // No row means NULL even though COUNT itself never is.
    assert!(cnt.nullable);
}

#[test]
fn alias_column_list_must_match_degree() {
    let err = validation_error("SELECT * FROM emp AS e(a, b)");
    assert!(err.to_string().contains("same degree"), "err={err}");

    let rt = row_type_of("SELECT a FROM dept AS d(a, b)");
    assert_eq!(rt.field_names(), vec!["a"]);
}

// -----------------------------
// Output naming
// -----------------------------

#[test]
fn duplicate_output_names_get_suffixes() {
    assert_eq!(
        names("SELECT e.deptno, d.deptno FROM emp e JOIN dept d ON e.deptno = d.deptno"),
        vec!["deptno", "deptno0"]
    );
}

#[test]
fn unaliased_expressions_are_named_by_position() {
    assert_eq!(names("SELECT sal + 1, ename FROM emp"), vec!["EXPR$0", "ename"]);
}

#[test]
fn expanded_select_list_and_qualified_identifier() {
    let (v, stmt) = validate("SELECT ename FROM emp").expect("validate");
    let Statement::Query(q) = &stmt else {
        panic!("expected query, got {stmt:?}");
    };
    let expanded = v.get_expanded_select_list(q.id).expect("expanded list");
    assert_eq!(expanded.len(), 1);
    assert_eq!(expanded[0].alias.as_deref(), Some("ename"));
    assert_eq!(
        v.get_qualified_identifier(expanded[0].expr.id),
        Some(vec!["emp".to_string(), "ename".to_string()])
    );
    assert!(!v.is_aggregate(q.id));
}

// -----------------------------
// Clauses
// -----------------------------

#[test]
fn where_must_be_boolean() {
    let err = validation_error("SELECT * FROM emp WHERE sal");
    assert_eq!(err.validation_kind(), Some(&ValidationErrorKind::WhereMustBeBoolean));
}

#[test]
fn untyped_null_is_illegal_in_select_list() {
    let err = validation_error("SELECT NULL FROM emp");
    assert!(err.to_string().contains("Illegal use of 'NULL'"), "err={err}");
}

#[test]
fn order_by_alias_falls_back_to_from_columns_by_default() {
    validate("SELECT ename AS n FROM emp ORDER BY n").expect("alias under default");
    validate("SELECT ename AS n FROM emp ORDER BY sal").expect("FROM column under default");
}

#[test]
fn strict92_order_by_sees_only_output_columns() {
    let config = ValidatorConfig::default().with_conformance(Conformance::Strict92);
    validate_with(config, "SELECT ename AS n FROM emp ORDER BY n").expect("alias under Strict92");

    let err = validation_error_with(Conformance::Strict92, "SELECT ename AS n FROM emp ORDER BY sal");
    assert_eq!(
        err.validation_kind(),
        Some(&ValidationErrorKind::ColumnNotFound("sal".to_string()))
    );
}

#[test]
fn strict2003_order_by_rejects_aliases() {
    let config = ValidatorConfig::default().with_conformance(Conformance::Strict2003);
    validate_with(config, "SELECT ename AS n FROM emp ORDER BY ename").expect("FROM column");

    let err = validation_error_with(Conformance::Strict2003, "SELECT ename AS n FROM emp ORDER BY n");
    assert_eq!(
        err.validation_kind(),
        Some(&ValidationErrorKind::ColumnNotFound("n".to_string()))
    );
}

#[test]
fn order_by_ordinal_must_be_in_range() {
    validate("SELECT ename, sal FROM emp ORDER BY 2").expect("ordinal in range");
    let err = validation_error("SELECT ename FROM emp ORDER BY 3");
    assert_eq!(
        err.validation_kind(),
        Some(&ValidationErrorKind::OrdinalOutOfRange(3))
    );
}

#[test]
fn distinct_order_by_must_use_selected_expressions() {
    validate("SELECT DISTINCT deptno FROM emp ORDER BY deptno").expect("selected key");
    let err = validation_error("SELECT DISTINCT deptno FROM emp ORDER BY sal");
    assert!(
        err.to_string().contains("is not in the select clause"),
        "err={err}"
    );
}

// -----------------------------
// VALUES and set operations
// -----------------------------

#[test]
fn values_rows_share_a_row_type() {
    let rt = row_type_of("VALUES (1, 'a'), (2, 'b')");
    assert_eq!(rt.len(), 2);
    assert_eq!(rt.column_type(0).data_type, DataType::Int32);
    assert!(!rt.column_type(0).nullable);

    let rt = row_type_of("VALUES (1), (NULL)");
    assert_eq!(rt.column_type(0).data_type, DataType::Int32);
    assert!(rt.column_type(0).nullable);
}

#[test]
fn values_rows_must_have_the_same_width() {
    let err = validation_error("VALUES (1), (1, 2)");
    assert!(
        err.to_string().contains("must have compatible types"),
        "err={err}"
    );
}

#[test]
fn set_operation_arms_must_have_the_same_width() {
    let err = validation_error("SELECT empno FROM emp UNION SELECT deptno, name FROM dept");
    assert!(
        err.to_string().contains("Column count mismatch in UNION"),
        "err={err}"
    );

    let rt = row_type_of("SELECT ename FROM emp UNION ALL SELECT name FROM dept");
    assert_eq!(rt.field_names(), vec!["ename"]);
}

#[test]
fn validation_is_repeatable() {
    let sql = "SELECT d.name, COUNT(*) FROM emp e JOIN dept d USING (deptno) GROUP BY d.name";
    let first = row_type_of(sql);
    let second = row_type_of(sql);
    assert_eq!(first, second);
}

#[test]
fn inner_join_requires_a_condition() {
    let err = validation_error("SELECT * FROM emp JOIN dept");
    assert_eq!(
        err.validation_kind(),
        Some(&ValidationErrorKind::JoinRequiresCondition),
        "err={err}"
    );

    validate("SELECT * FROM emp CROSS JOIN dept").expect("cross join");
    validate("SELECT * FROM emp NATURAL JOIN dept").expect("natural join");
}
