mod support;

use std::sync::Arc;

use quarry_common::CorrelationId;
use quarry_planner::ast::SetOpKind;
use quarry_planner::rel::{AggCall, AggFunc, JoinType, RelNode, RelRef, Rex, RexOp, ScalarValue, SortKey};
use quarry_planner::{decorrelate_query, explain_rel, CorrelationMaps, Decorrelator};
use support::{eval, fixture_data, int, null, sorted, table, text, Row};

// emp: empno, ename, job, mgr, deptno, sal, comm
const EMP_ENAME: usize = 1;
const EMP_JOB: usize = 2;
const EMP_MGR: usize = 3;
const EMP_DEPTNO: usize = 4;
const EMP_SAL: usize = 5;
const EMP_EMPNO: usize = 0;
// dept: deptno, name
const DEPT_DEPTNO: usize = 0;
const DEPT_NAME: usize = 1;

fn scan(name: &str) -> RelRef {
    RelNode::scan(table(name))
}

fn names(n: &[&str]) -> Vec<String> {
    n.iter().map(|s| s.to_string()).collect()
}

fn project(input: RelRef, positions: &[usize], n: &[&str]) -> RelRef {
    let exprs = positions
        .iter()
        .map(|&p| Rex::field_of(input.row_type(), p))
        .collect();
    RelNode::project(input, exprs, names(n))
}

/// `input.column = $cor.field`
fn correlated_eq(input: &RelRef, column: usize, cor: CorrelationId, outer: &RelRef, field: usize) -> Rex {
    Rex::eq(
        Rex::field_of(input.row_type(), column),
        Rex::correl_field(cor, outer.row_type(), field),
    )
}

/// Evaluate `root` before and after the rewrite and check both against
/// `expected`.
fn assert_same_rows(root: &RelRef, rewritten: &RelRef, expected: Vec<Row>) {
    let data = fixture_data();
    let before = sorted(eval(root, &data));
    let after = sorted(eval(rewritten, &data));
    assert_eq!(before, sorted(expected), "reference evaluation");
    assert_eq!(after, before, "plan:\n{}", explain_rel(rewritten));
    assert_eq!(rewritten.row_type().field_names(), root.row_type().field_names());
}

/// `SELECT d.deptno, (SELECT COUNT(*) FROM emp e WHERE e.deptno = d.deptno) FROM dept d`
fn count_per_dept() -> RelRef {
    let dept = scan("dept");
    let emp = scan("emp");
    let cor = CorrelationId::next();
    let filter = RelNode::filter(emp.clone(), correlated_eq(&emp, EMP_DEPTNO, cor, &dept, DEPT_DEPTNO));
    let agg = RelNode::aggregate(filter, vec![], vec![AggCall::count_star("cnt")]);
    let correlate = RelNode::correlate(dept, agg, cor, vec![DEPT_DEPTNO], JoinType::Left);
    project(correlate, &[0, 2], &["deptno", "cnt"])
}

/// Departments with (or without) an employee earning more than 2000.
fn exists_rich_employee(join_type: JoinType) -> RelRef {
    let dept = scan("dept");
    let emp = scan("emp");
    let cor = CorrelationId::next();
    let cond = Rex::and(vec![
        correlated_eq(&emp, EMP_DEPTNO, cor, &dept, DEPT_DEPTNO),
        Rex::call(
            RexOp::Gt,
            vec![
                Rex::field_of(emp.row_type(), EMP_SAL),
                Rex::literal(ScalarValue::Int64(2000)),
            ],
        ),
    ]);
    let filter = RelNode::filter(emp, cond);
    let correlate = RelNode::correlate(dept, filter, cor, vec![DEPT_DEPTNO], join_type);
    project(correlate, &[DEPT_DEPTNO], &["deptno"])
}

#[test]
fn count_subquery_keeps_empty_groups_as_zero() {
    support::init_tracing();
    let root = count_per_dept();
    let out = decorrelate_query(root.clone());
    assert!(!out.has_correlation(), "plan:\n{}", explain_rel(&out));
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![int(10), int(1)],
            vec![int(20), int(3)],
            vec![int(30), int(2)],
            vec![int(40), int(0)],
        ],
    );
}

#[test]
fn explain_shows_joins_instead_of_correlate() {
    let out = decorrelate_query(count_per_dept());
    let text = explain_rel(&out);
    assert!(!text.contains("Correlate"), "plan:\n{text}");
    assert!(text.contains("Join type=left"), "plan:\n{text}");
    assert!(text.contains("IS NOT DISTINCT FROM"), "plan:\n{text}");
    assert!(text.contains("COALESCE("), "plan:\n{text}");
}

#[test]
fn null_correlation_key_counts_zero_rows() {
    // SELECT e.ename, (SELECT COUNT(*) FROM emp e2 WHERE e2.deptno = e.deptno) FROM emp e
    let outer = scan("emp");
    let inner = scan("emp");
    let cor = CorrelationId::next();
    let filter = RelNode::filter(
        inner.clone(),
        correlated_eq(&inner, EMP_DEPTNO, cor, &outer, EMP_DEPTNO),
    );
    let agg = RelNode::aggregate(filter, vec![], vec![AggCall::count_star("colleagues")]);
    let correlate = RelNode::correlate(outer, agg, cor, vec![EMP_DEPTNO], JoinType::Left);
    let root = project(correlate, &[EMP_ENAME, 7], &["ename", "colleagues"]);

    let out = decorrelate_query(root.clone());
    assert!(!out.has_correlation());
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![text("SMITH"), int(3)],
            vec![text("ALLEN"), int(2)],
            vec![text("WARD"), int(2)],
            vec![text("JONES"), int(3)],
            vec![text("KING"), int(1)],
            vec![text("FORD"), int(3)],
            vec![text("NOBODY"), int(0)],
        ],
    );
}

#[test]
fn exists_and_not_exists_become_semi_and_anti_joins() {
    let semi = exists_rich_employee(JoinType::Semi);
    let out = decorrelate_query(semi.clone());
    assert!(!out.has_correlation());
    assert!(explain_rel(&out).contains("Join type=semi"));
    assert_same_rows(&semi, &out, vec![vec![int(10)], vec![int(20)]]);

    let anti = exists_rich_employee(JoinType::Anti);
    let out = decorrelate_query(anti.clone());
    assert!(!out.has_correlation());
    assert_same_rows(&anti, &out, vec![vec![int(30)], vec![int(40)]]);
}

#[test]
fn unique_scalar_lookup_is_removed_as_left_join() {
    // SELECT e.ename, (SELECT d.name FROM dept d WHERE d.deptno = e.deptno) FROM emp e
    let emp = scan("emp");
    let dept = scan("dept");
    let cor = CorrelationId::next();
    let filter = RelNode::filter(
        dept.clone(),
        correlated_eq(&dept, DEPT_DEPTNO, cor, &emp, EMP_DEPTNO),
    );
    let value = project(filter, &[DEPT_NAME], &["name"]);
    let agg = RelNode::aggregate(
        value,
        vec![],
        vec![AggCall::new(AggFunc::SingleValue, vec![0], "dname")],
    );
    let correlate = RelNode::correlate(emp, agg, cor, vec![EMP_DEPTNO], JoinType::Left);
    let root = project(correlate, &[EMP_ENAME, 7], &["ename", "dname"]);

    let mut decorrelator = Decorrelator::new(CorrelationMaps::build(&root));
    let out = decorrelator.remove_correlation(root.clone());
    let plan = explain_rel(&out);
    assert!(!out.has_correlation(), "plan:\n{plan}");
    assert!(plan.contains("nullIndicator"), "plan:\n{plan}");
    assert!(!plan.contains("SINGLE_VALUE"), "plan:\n{plan}");
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![text("SMITH"), text("RESEARCH")],
            vec![text("ALLEN"), text("SALES")],
            vec![text("WARD"), text("SALES")],
            vec![text("JONES"), text("RESEARCH")],
            vec![text("KING"), text("ACCOUNTING")],
            vec![text("FORD"), text("RESEARCH")],
            vec![text("NOBODY"), null()],
        ],
    );
}

#[test]
fn non_unique_scalar_lookup_falls_back_to_full_decorrelation() {
    // SELECT d.deptno,
    //   (SELECT e.ename FROM emp e WHERE e.deptno = d.deptno AND e.job = 'PRESIDENT')
    // FROM dept d
    let dept = scan("dept");
    let emp = scan("emp");
    let cor = CorrelationId::next();
    let cond = Rex::and(vec![
        correlated_eq(&emp, EMP_DEPTNO, cor, &dept, DEPT_DEPTNO),
        Rex::eq(
            Rex::field_of(emp.row_type(), EMP_JOB),
            Rex::literal(ScalarValue::Utf8("PRESIDENT".to_string())),
        ),
    ]);
    let filter = RelNode::filter(emp, cond);
    let value = project(filter, &[EMP_ENAME], &["ename"]);
    let agg = RelNode::aggregate(
        value,
        vec![],
        vec![AggCall::new(AggFunc::SingleValue, vec![0], "boss")],
    );
    let correlate = RelNode::correlate(dept, agg, cor, vec![DEPT_DEPTNO], JoinType::Left);
    let root = project(correlate, &[DEPT_DEPTNO, 2], &["deptno", "boss"]);

    let mut decorrelator = Decorrelator::new(CorrelationMaps::build(&root));
    let kept = decorrelator.remove_correlation(root.clone());
    assert!(Arc::ptr_eq(&kept, &root), "emp.deptno is not unique");

    let out = decorrelate_query(root.clone());
    assert!(!out.has_correlation(), "plan:\n{}", explain_rel(&out));
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![int(10), text("KING")],
            vec![int(20), null()],
            vec![int(30), null()],
            vec![int(40), null()],
        ],
    );
}

#[test]
fn projected_correlated_value_is_carried_through_aggregate() {
    // SELECT d.deptno, (SELECT MAX(e.sal + d.deptno) FROM emp e WHERE e.deptno = d.deptno)
    // FROM dept d
    let dept = scan("dept");
    let emp = scan("emp");
    let cor = CorrelationId::next();
    let filter = RelNode::filter(
        emp.clone(),
        correlated_eq(&emp, EMP_DEPTNO, cor, &dept, DEPT_DEPTNO),
    );
    let shifted = RelNode::project(
        filter,
        vec![Rex::call(
            RexOp::Plus,
            vec![
                Rex::field_of(emp.row_type(), EMP_SAL),
                Rex::correl_field(cor, dept.row_type(), DEPT_DEPTNO),
            ],
        )],
        names(&["v"]),
    );
    let agg = RelNode::aggregate(shifted, vec![], vec![AggCall::new(AggFunc::Max, vec![0], "m")]);
    let correlate = RelNode::correlate(dept, agg, cor, vec![DEPT_DEPTNO], JoinType::Left);
    let root = project(correlate, &[DEPT_DEPTNO, 2], &["deptno", "m"]);

    let out = decorrelate_query(root.clone());
    assert!(!out.has_correlation(), "plan:\n{}", explain_rel(&out));
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![int(10), int(5010)],
            vec![int(20), int(3020)],
            vec![int(30), int(1630)],
            vec![int(40), null()],
        ],
    );
}

#[test]
fn nested_correlation_is_resolved_across_levels() {
    // Departments with an employee whose manager works in another department:
    //
    // SELECT d.deptno FROM dept d WHERE EXISTS (
    //   SELECT 1 FROM emp e, emp m
    //   WHERE e.deptno = d.deptno AND m.empno = e.mgr AND m.deptno <> d.deptno)
    let dept = scan("dept");
    let e = scan("emp");
    let m = scan("emp");
    let outer_cor = CorrelationId::next();
    let inner_cor = CorrelationId::next();

    let employees = RelNode::filter(
        e.clone(),
        correlated_eq(&e, EMP_DEPTNO, outer_cor, &dept, DEPT_DEPTNO),
    );
    let managers = RelNode::filter(
        m.clone(),
        Rex::and(vec![
            correlated_eq(&m, EMP_EMPNO, inner_cor, &employees, EMP_MGR),
            Rex::call(
                RexOp::NotEq,
                vec![
                    Rex::field_of(m.row_type(), EMP_DEPTNO),
                    Rex::correl_field(outer_cor, dept.row_type(), DEPT_DEPTNO),
                ],
            ),
        ]),
    );
    let inner = RelNode::correlate(employees, managers, inner_cor, vec![EMP_MGR], JoinType::Inner);
    let outer = RelNode::correlate(dept, inner, outer_cor, vec![DEPT_DEPTNO], JoinType::Semi);
    let root = project(outer, &[DEPT_DEPTNO], &["deptno"]);

    let out = decorrelate_query(root.clone());
    assert!(!out.has_correlation(), "plan:\n{}", explain_rel(&out));
    assert_same_rows(&root, &out, vec![vec![int(20)]]);
}

#[test]
fn set_operation_above_correlate_is_rebuilt() {
    let with_rich = exists_rich_employee(JoinType::Semi);
    let all_depts = project(scan("dept"), &[DEPT_DEPTNO], &["deptno"]);
    let root = RelNode::set_op(SetOpKind::Union, true, vec![with_rich, all_depts]);

    let out = decorrelate_query(root.clone());
    assert!(!out.has_correlation(), "plan:\n{}", explain_rel(&out));
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![int(10)],
            vec![int(10)],
            vec![int(20)],
            vec![int(20)],
            vec![int(30)],
            vec![int(40)],
        ],
    );
}

#[test]
fn ordered_subquery_without_limit_is_decorrelated() {
    // Employees of each department, ordered by salary inside the subquery.
    let dept = scan("dept");
    let emp = scan("emp");
    let cor = CorrelationId::next();
    let filter = RelNode::filter(emp.clone(), correlated_eq(&emp, EMP_DEPTNO, cor, &dept, DEPT_DEPTNO));
    let ordered = RelNode::sort(
        filter,
        vec![SortKey {
            field: EMP_SAL,
            descending: true,
            nulls_first: false,
        }],
        None,
        None,
    );
    let correlate = RelNode::correlate(dept, ordered, cor, vec![DEPT_DEPTNO], JoinType::Inner);
    let root = project(correlate, &[DEPT_DEPTNO, 2 + EMP_ENAME], &["deptno", "ename"]);

    let out = decorrelate_query(root.clone());
    let plan = explain_rel(&out);
    assert!(!out.has_correlation(), "plan:\n{plan}");
    assert!(plan.contains("Sort keys=["), "plan:\n{plan}");
    assert_same_rows(
        &root,
        &out,
        vec![
            vec![int(10), text("KING")],
            vec![int(20), text("SMITH")],
            vec![int(20), text("JONES")],
            vec![int(20), text("FORD")],
            vec![int(30), text("ALLEN")],
            vec![int(30), text("WARD")],
        ],
    );
}

#[test]
fn limited_subquery_is_left_correlated() {
    // The highest paid employee of each department: FETCH applies per outer row.
    let dept = scan("dept");
    let emp = scan("emp");
    let cor = CorrelationId::next();
    let filter = RelNode::filter(emp.clone(), correlated_eq(&emp, EMP_DEPTNO, cor, &dept, DEPT_DEPTNO));
    let top = RelNode::sort(
        filter,
        vec![SortKey {
            field: EMP_SAL,
            descending: true,
            nulls_first: false,
        }],
        None,
        Some(1),
    );
    let correlate = RelNode::correlate(dept, top, cor, vec![DEPT_DEPTNO], JoinType::Left);
    let root = project(correlate, &[DEPT_DEPTNO, 2 + EMP_ENAME], &["deptno", "ename"]);

    let out = decorrelate_query(root.clone());
    assert!(Arc::ptr_eq(&out, &root));
    assert_eq!(
        sorted(eval(&out, &fixture_data())),
        vec![
            vec![int(10), text("KING")],
            vec![int(20), text("FORD")],
            vec![int(30), text("ALLEN")],
            vec![int(40), null()],
        ]
    );
}

#[test]
fn uncorrelated_tree_is_returned_as_is() {
    let emp = scan("emp");
    let dept = scan("dept");
    let cond = Rex::eq(
        Rex::field_of(emp.row_type(), EMP_DEPTNO),
        Rex::field_of(dept.row_type(), DEPT_DEPTNO).shift(emp.row_type().len()),
    );
    let root = RelNode::join(emp, dept, cond, JoinType::Inner);
    let out = decorrelate_query(root.clone());
    assert!(Arc::ptr_eq(&out, &root));
}
