//! Shared query-tree builders for unit tests.
//!
//! Everything here builds `int4` columns unless stated otherwise. Relations
//! named in [`rel`] do not have to exist in a catalog; tests that need
//! catalog facts register them on a `MemoryCatalog` first.

use crate::catalog::*;
use crate::dvm::aggregate;
use crate::dvm::expr::*;
use crate::dvm::query::*;

// ── Leaves ──────────────────────────────────────────────────────────────

pub fn var(varno: Index, attno: AttrNumber) -> Expr {
    Expr::Var(Var::new(varno, attno, INT4_OID))
}

pub fn var_typed(varno: Index, attno: AttrNumber, vartype: Oid) -> Expr {
    Expr::Var(Var::new(varno, attno, vartype))
}

/// A var referencing the query `levelsup` levels above.
pub fn outer_var(varno: Index, attno: AttrNumber, levelsup: u32) -> Expr {
    let mut v = Var::new(varno, attno, INT4_OID);
    v.varlevelsup = levelsup;
    Expr::Var(v)
}

pub fn int4(v: i32) -> Expr {
    Expr::Const(Const::int4(v))
}

// ── Operators and functions ─────────────────────────────────────────────

pub fn op_with(opno: Oid, a: Expr, b: Expr) -> Expr {
    Expr::OpExpr(Box::new(OpExpr {
        opno,
        opname: "=".into(),
        opresulttype: BOOL_OID,
        opcollid: INVALID_OID,
        args: vec![a, b],
        strict: true,
        volatility: Volatility::Immutable,
    }))
}

/// `a = b` on int4.
pub fn op_eq(a: Expr, b: Expr) -> Expr {
    op_with(memory::INT4EQ_OPERATOR, a, b)
}

/// `a > b` on int4.
pub fn op_gt(a: Expr, b: Expr) -> Expr {
    let mut e = op_with(memory::INT4GT_OPERATOR, a, b);
    if let Expr::OpExpr(op) = &mut e {
        op.opname = ">".into();
    }
    e
}

pub fn func(name: &str, args: Vec<Expr>, strict: bool) -> Expr {
    Expr::FuncExpr(Box::new(FuncExpr {
        funcid: 9000,
        funcname: name.into(),
        funcresulttype: INT4_OID,
        funccollid: INVALID_OID,
        args,
        strict,
        volatility: Volatility::Immutable,
    }))
}

pub fn volatile_func(name: &str) -> Expr {
    let mut e = func(name, vec![], true);
    if let Expr::FuncExpr(f) = &mut e {
        f.volatility = Volatility::Volatile;
    }
    e
}

pub fn coalesce(args: Vec<Expr>) -> Expr {
    Expr::CoalesceExpr(Box::new(CoalesceExpr {
        coalescetype: INT4_OID,
        coalescecollid: INVALID_OID,
        args,
    }))
}

pub fn and(args: Vec<Expr>) -> Expr {
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop: BoolExprType::And,
        args,
    }))
}

pub fn or(args: Vec<Expr>) -> Expr {
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop: BoolExprType::Or,
        args,
    }))
}

pub fn not(arg: Expr) -> Expr {
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop: BoolExprType::Not,
        args: vec![arg],
    }))
}

pub fn exists(subselect: Query) -> Expr {
    Expr::SubLink(Box::new(SubLink {
        sublink_type: SubLinkType::Exists,
        testexpr: None,
        subselect: Box::new(subselect),
    }))
}

// ── Aggregates ──────────────────────────────────────────────────────────

/// A call of an allow-listed aggregate; types come from the allow-list.
pub fn agg_call(fn_oid: Oid, args: Vec<Expr>) -> Expr {
    let entry = aggregate::lookup(fn_oid);
    let aggtype = entry.map(|e| e.result_type).unwrap_or(INT8_OID);
    let aggstar = entry.is_some_and(|e| e.star);
    let aggargtypes = args.iter().map(Expr::expr_type).collect();
    Expr::Aggref(Box::new(Aggref {
        aggfnoid: fn_oid,
        aggtype,
        aggcollid: INVALID_OID,
        args,
        aggargtypes,
        aggstar,
        aggdistinct: vec![],
        aggorder: vec![],
        aggfilter: None,
        agglevelsup: 0,
    }))
}

pub fn count_star() -> Expr {
    agg_call(2803, vec![])
}

pub fn count_any(arg: Expr) -> Expr {
    agg_call(2147, vec![arg])
}

pub fn sum_int4(arg: Expr) -> Expr {
    agg_call(2108, vec![arg])
}

pub fn avg_int4(arg: Expr) -> Expr {
    agg_call(2101, vec![arg])
}

pub fn max_int4(arg: Expr) -> Expr {
    agg_call(2116, vec![arg])
}

// ── Queries ─────────────────────────────────────────────────────────────

pub fn tle(expr: Expr, resno: AttrNumber, name: &str) -> TargetEntry {
    TargetEntry::new(expr, resno, name)
}

pub fn rel(relid: Oid, name: &str, cols: &[&str]) -> RangeTblEntry {
    RangeTblEntry::relation(relid, RelKind::Relation, name, cols)
}

pub fn sort_clause(tle_sort_group_ref: u32) -> SortGroupClause {
    SortGroupClause {
        tle_sort_group_ref,
        eqop: memory::INT4EQ_OPERATOR,
        sortop: memory::INT4LT_OPERATOR,
        nulls_first: false,
        hashable: true,
    }
}

/// `SELECT <tlist> FROM <rtes...>` as a plain cross join.
pub fn select_from(rtes: &[RangeTblEntry], target_list: Vec<TargetEntry>) -> Query {
    let has_aggs = target_list
        .iter()
        .any(|t| contain_aggs_of_level(&t.expr, 0));
    let has_sublinks = target_list.iter().any(|t| contain_sublinks(&t.expr));
    Query {
        rtable: rtes.to_vec(),
        jointree: FromExpr {
            fromlist: (1..=rtes.len()).map(JoinTreeNode::RangeTblRef).collect(),
            quals: None,
        },
        target_list,
        has_aggs,
        has_sublinks,
        ..Query::default()
    }
}

pub fn with_where(mut q: Query, quals: Expr) -> Query {
    q.has_sublinks |= contain_sublinks(&quals);
    q.jointree.quals = Some(quals);
    q
}

/// GROUP BY the target entries at `resnos`.
pub fn group_by(mut q: Query, resnos: &[AttrNumber]) -> Query {
    for &resno in resnos {
        let sgref = q.next_sortgroupref();
        let tle = &mut q.target_list[resno as usize - 1];
        tle.ressortgroupref = sgref;
        q.group_clause.push(sort_clause(sgref));
    }
    q
}

/// SELECT DISTINCT over every output column.
pub fn distinct(mut q: Query) -> Query {
    for i in 0..q.target_list.len() {
        if q.target_list[i].resjunk {
            continue;
        }
        if q.target_list[i].ressortgroupref == 0 {
            q.target_list[i].ressortgroupref = q.next_sortgroupref();
        }
        let sgref = q.target_list[i].ressortgroupref;
        q.distinct_clause.push(sort_clause(sgref));
    }
    q
}

/// Attach `WITH name AS (body)` and reference it from the FROM list.
pub fn with_cte(mut q: Query, name: &str, body: Query) -> Query {
    let colnames = body.output_columns().map(|t| t.name().to_string()).collect();
    q.cte_list.push(CommonTableExpr {
        ctename: name.into(),
        ctequery: Box::new(body),
        cterefcount: 1,
    });
    q.rtable.push(RangeTblEntry {
        kind: RteKind::Cte {
            ctename: name.into(),
            levels_up: 0,
        },
        eref: name.into(),
        colnames,
        lateral: false,
        in_from_cl: true,
    });
    q.jointree
        .fromlist
        .push(JoinTreeNode::RangeTblRef(q.rtable.len()));
    q
}

/// `SELECT t1.a, t1.k, t2.k FROM t1 LEFT JOIN t2 ON t1.k = t2.k`.
///
/// t1 is oid 10 with columns (a, k); t2 is oid 20 with columns (k, v).
/// The join is range-table entry 3 and exposes (a, k, k, v).
pub fn left_join_query() -> Query {
    let join_rte = RangeTblEntry {
        kind: RteKind::Join {
            jointype: JoinType::Left,
            alias_vars: vec![var(1, 1), var(1, 2), var(2, 1), var(2, 2)],
        },
        eref: "unnamed_join".into(),
        colnames: vec!["a".into(), "k".into(), "k".into(), "v".into()],
        lateral: false,
        in_from_cl: true,
    };
    Query {
        rtable: vec![rel(10, "t1", &["a", "k"]), rel(20, "t2", &["k", "v"]), join_rte],
        jointree: FromExpr {
            fromlist: vec![JoinTreeNode::Join(Box::new(JoinExpr {
                jointype: JoinType::Left,
                larg: JoinTreeNode::RangeTblRef(1),
                rarg: JoinTreeNode::RangeTblRef(2),
                quals: Some(op_eq(var(1, 2), var(2, 1))),
                rtindex: 3,
            }))],
            quals: None,
        },
        target_list: vec![
            tle(var(1, 1), 1, "a"),
            tle(var(1, 2), 2, "k1"),
            tle(var(2, 1), 3, "k2"),
        ],
        ..Query::default()
    }
}

/// Replace the ON condition of the first join in the FROM list.
pub fn set_join_quals(q: &mut Query, quals: Expr) {
    for node in &mut q.jointree.fromlist {
        if let JoinTreeNode::Join(j) = node {
            j.quals = Some(quals);
            return;
        }
    }
}

/// `SELECT ... FROM t WHERE EXISTS (SELECT x FROM s WHERE s.x = t.a)`.
///
/// With `projected`, the target list includes `t.a`; otherwise only `t.b`.
pub fn exists_query(projected: bool) -> Query {
    let sub = with_where(
        select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]),
        op_eq(var(1, 1), outer_var(1, 1, 1)),
    );
    let tlist = if projected {
        vec![tle(var(1, 1), 1, "a"), tle(var(1, 2), 2, "b")]
    } else {
        vec![tle(var(1, 2), 1, "b")]
    };
    with_where(select_from(&[rel(10, "t", &["a", "b"])], tlist), exists(sub))
}
