mod support;

use quarry_planner::ast::{FromKind, Statement};
use quarry_planner::{Moniker, MonikerKind};

use support::{validate, validator};

fn names_of(hints: &[Moniker], kind: MonikerKind) -> Vec<String> {
    hints
        .iter()
        .filter(|m| m.kind == kind)
        .map(|m| m.name().to_string())
        .collect()
}

#[test]
fn qualified_prefix_lists_table_columns() {
    let sql = "SELECT e. FROM emp e";
    let hints = validator()
        .lookup_hints_at(sql, "SELECT e.".len())
        .expect("hints");
    assert_eq!(hints.len(), 7, "hints={hints:?}");
    assert!(hints.iter().all(|m| m.kind == MonikerKind::Column));
    assert!(hints.contains(&Moniker::new(
        MonikerKind::Column,
        vec!["e".to_string(), "ename".to_string()]
    )));
}

#[test]
fn partial_name_filters_hints() {
    let sql = "SELECT e.en FROM emp e";
    let hints = validator()
        .lookup_hints_at(sql, "SELECT e.en".len())
        .expect("hints");
    assert_eq!(names_of(&hints, MonikerKind::Column), vec!["ename"]);
}

#[test]
fn bare_position_offers_columns_aliases_and_functions() {
    let sql = "SELECT  FROM emp";
    let hints = validator()
        .lookup_hints_at(sql, "SELECT ".len())
        .expect("hints");
    let columns = names_of(&hints, MonikerKind::Column);
    assert!(columns.contains(&"sal".to_string()), "columns={columns:?}");
    assert_eq!(names_of(&hints, MonikerKind::Table), vec!["emp"]);
    let functions = names_of(&hints, MonikerKind::Function);
    assert!(
        functions.iter().any(|f| f.eq_ignore_ascii_case("count")),
        "functions={functions:?}"
    );
}

#[test]
fn table_position_offers_catalog_tables() {
    let sql = "SELECT * FROM de";
    let hints = validator().lookup_hints_at(sql, sql.len()).expect("hints");
    assert_eq!(
        hints,
        vec![Moniker::new(
            MonikerKind::Table,
            vec!["sales".to_string(), "dept".to_string()]
        )]
    );
}

#[test]
fn cursor_inside_a_character_is_rejected() {
    let err = validator()
        .lookup_hints_at("SELECT 'é' FROM emp", "SELECT 'é".len() - 1)
        .expect_err("not a boundary");
    assert!(err.to_string().contains("character boundary"), "err={err}");
}

#[test]
fn qualified_names_of_columns_and_tables() {
    let (v, stmt) = validate("SELECT e.sal FROM emp e").expect("validate");
    let Statement::Query(q) = &stmt else {
        panic!("expected query, got {stmt:?}");
    };
    let select = q.as_select().expect("select");

    let column = v
        .lookup_qualified_name(&stmt, select.items[0].expr.id)
        .expect("column moniker");
    assert_eq!(column.kind, MonikerKind::Column);
    assert_eq!(column.id(), "sales.emp.sal");

    let from = select.from.as_ref().expect("from");
    let table_item = from.strip_alias();
    assert!(matches!(table_item.kind, FromKind::Table(_)));
    let table = v
        .lookup_qualified_name(&stmt, table_item.id)
        .expect("table moniker");
    assert_eq!(table.kind, MonikerKind::Table);
    assert_eq!(table.id(), "sales.emp");
}
