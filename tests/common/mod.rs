//! Shared fixtures and query builders for integration tests.
//!
//! Queries are built directly as analyzed trees, the way a host's parser
//! would hand them over. Every column is `int4` unless stated otherwise.

#![allow(dead_code)]

use pg_immv::api::{CreateTableAsOutcome, create_immv};
use pg_immv::catalog::memory::{INT4EQ_OPERATOR, INT4GT_OPERATOR, INT4LT_OPERATOR, MemoryCatalog};
use pg_immv::catalog::{BOOL_OID, INT4_OID, INT8_OID, INVALID_OID, Oid, RangeVar, RelKind};
use pg_immv::dest::{FixedResultExecutor, MemoryStorage};
use pg_immv::dvm::aggregate;
use pg_immv::dvm::expr::{
    Aggref, AttrNumber, BoolExpr, BoolExprType, Const, Expr, FuncExpr, Index, OpExpr, SubLink,
    SubLinkType, Var, Volatility,
};
use pg_immv::dvm::query::{
    FromExpr, JoinExpr, JoinTreeNode, JoinType, Query, RangeTblEntry, RteKind, SortGroupClause,
    TargetEntry,
};
use pg_immv::{ImmvConfig, ImmvError, Notice, Transaction};

/// Aggregate function OIDs used by the tests.
pub const COUNT_STAR: Oid = 2803;
pub const COUNT_ANY: Oid = 2147;
pub const SUM_INT4: Oid = 2108;
pub const AVG_INT4: Oid = 2101;
pub const MAX_INT4: Oid = 2116;

/// Route `tracing` output through the test harness. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fixture ────────────────────────────────────────────────────────────

/// A catalog plus storage that view creation runs against.
pub struct Fixture {
    pub catalog: MemoryCatalog,
    pub storage: MemoryStorage,
    pub config: ImmvConfig,
}

/// Result of creating a view through [`Fixture::create_immv`].
pub struct Created {
    pub outcome: CreateTableAsOutcome,
    pub notices: Vec<Notice>,
    pub executed: Vec<Query>,
}

impl Created {
    pub fn view_oid(&self) -> Oid {
        self.outcome
            .address
            .map(|a| a.object_id)
            .expect("view was created")
    }
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        Fixture {
            catalog: MemoryCatalog::new(),
            storage: MemoryStorage::new(),
            config: ImmvConfig::default(),
        }
    }

    pub fn table(&mut self, name: &str, cols: &[&str]) -> Oid {
        let cols: Vec<(&str, Oid)> = cols.iter().map(|c| (*c, INT4_OID)).collect();
        self.catalog.add_table(name, &cols)
    }

    /// Run `create_immv` with an executor whose result set is empty.
    pub fn create_immv(&mut self, name: &str, query: Query) -> Result<Created, ImmvError> {
        let mut txn = Transaction::new(&mut self.catalog, &self.config);
        let mut exec = FixedResultExecutor::new(Vec::new());
        let outcome = create_immv(
            &mut txn,
            &mut exec,
            &mut self.storage,
            RangeVar::new(None, name),
            query,
        )?;
        Ok(Created {
            outcome,
            notices: txn.take_notices(),
            executed: exec.executed().to_vec(),
        })
    }
}

// ── Expressions ────────────────────────────────────────────────────────

pub fn var(varno: Index, attno: AttrNumber) -> Expr {
    Expr::Var(Var::new(varno, attno, INT4_OID))
}

pub fn outer_var(varno: Index, attno: AttrNumber, levelsup: u32) -> Expr {
    let mut v = Var::new(varno, attno, INT4_OID);
    v.varlevelsup = levelsup;
    Expr::Var(v)
}

pub fn int4(v: i32) -> Expr {
    Expr::Const(Const::int4(v))
}

fn binary_op(opno: Oid, opname: &str, a: Expr, b: Expr) -> Expr {
    Expr::OpExpr(Box::new(OpExpr {
        opno,
        opname: opname.to_string(),
        opresulttype: BOOL_OID,
        opcollid: INVALID_OID,
        args: vec![a, b],
        strict: true,
        volatility: Volatility::Immutable,
    }))
}

pub fn op_eq(a: Expr, b: Expr) -> Expr {
    binary_op(INT4EQ_OPERATOR, "=", a, b)
}

pub fn op_gt(a: Expr, b: Expr) -> Expr {
    binary_op(INT4GT_OPERATOR, ">", a, b)
}

pub fn or(args: Vec<Expr>) -> Expr {
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop: BoolExprType::Or,
        args,
    }))
}

pub fn and(args: Vec<Expr>) -> Expr {
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop: BoolExprType::And,
        args,
    }))
}

pub fn func(name: &str, args: Vec<Expr>, volatility: Volatility) -> Expr {
    Expr::FuncExpr(Box::new(FuncExpr {
        funcid: 9000,
        funcname: name.to_string(),
        funcresulttype: INT4_OID,
        funccollid: INVALID_OID,
        args,
        strict: true,
        volatility,
    }))
}

pub fn exists(subselect: Query) -> Expr {
    Expr::SubLink(Box::new(SubLink {
        sublink_type: SubLinkType::Exists,
        testexpr: None,
        subselect: Box::new(subselect),
    }))
}

/// Call of an allow-listed aggregate; result type comes from the list.
pub fn agg(fn_oid: Oid, args: Vec<Expr>) -> Expr {
    let entry = aggregate::lookup(fn_oid);
    Expr::Aggref(Box::new(Aggref {
        aggfnoid: fn_oid,
        aggtype: entry.map_or(INT8_OID, |e| e.result_type),
        aggcollid: INVALID_OID,
        aggargtypes: args.iter().map(Expr::expr_type).collect(),
        args,
        aggstar: entry.is_some_and(|e| e.star),
        aggdistinct: vec![],
        aggorder: vec![],
        aggfilter: None,
        agglevelsup: 0,
    }))
}

// ── Queries ────────────────────────────────────────────────────────────

pub fn tle(expr: Expr, resno: AttrNumber, name: &str) -> TargetEntry {
    TargetEntry::new(expr, resno, name)
}

pub fn rel(relid: Oid, name: &str, cols: &[&str]) -> RangeTblEntry {
    RangeTblEntry::relation(relid, RelKind::Relation, name, cols)
}

pub fn sort_clause(tle_sort_group_ref: u32) -> SortGroupClause {
    SortGroupClause {
        tle_sort_group_ref,
        eqop: INT4EQ_OPERATOR,
        sortop: INT4LT_OPERATOR,
        nulls_first: false,
        hashable: true,
    }
}

/// `SELECT <tlist> FROM <rtes...>`.
pub fn select_from(rtes: Vec<RangeTblEntry>, target_list: Vec<TargetEntry>) -> Query {
    let has_aggs = target_list.iter().any(|t| t.expr.is_aggref());
    Query {
        jointree: FromExpr {
            fromlist: (1..=rtes.len()).map(JoinTreeNode::RangeTblRef).collect(),
            quals: None,
        },
        rtable: rtes,
        target_list,
        has_aggs,
        ..Query::default()
    }
}

pub fn with_where(mut q: Query, quals: Expr, has_sublinks: bool) -> Query {
    q.jointree.quals = Some(quals);
    q.has_sublinks |= has_sublinks;
    q
}

/// GROUP BY the target entries at `resnos`.
pub fn group_by(mut q: Query, resnos: &[AttrNumber]) -> Query {
    for &resno in resnos {
        let sgref = q.next_sortgroupref();
        q.target_list[resno as usize - 1].ressortgroupref = sgref;
        q.group_clause.push(sort_clause(sgref));
    }
    q
}

/// SELECT DISTINCT over every output column.
pub fn distinct(mut q: Query) -> Query {
    for i in 0..q.target_list.len() {
        let sgref = q.next_sortgroupref();
        q.target_list[i].ressortgroupref = sgref;
        q.distinct_clause.push(sort_clause(sgref));
    }
    q
}

/// `SELECT t1.a, t1.k, t2.k FROM t1 LEFT JOIN t2 ON t1.k = t2.k`, where
/// t1 has columns (a, k) and t2 has columns (k, v).
pub fn left_join(t1: Oid, t2: Oid) -> Query {
    let join_rte = RangeTblEntry {
        kind: RteKind::Join {
            jointype: JoinType::Left,
            alias_vars: vec![var(1, 1), var(1, 2), var(2, 1), var(2, 2)],
        },
        eref: "unnamed_join".to_string(),
        colnames: ["a", "k", "k", "v"].iter().map(|c| c.to_string()).collect(),
        lateral: false,
        in_from_cl: true,
    };
    Query {
        rtable: vec![rel(t1, "t1", &["a", "k"]), rel(t2, "t2", &["k", "v"]), join_rte],
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

/// Names of a query's target entries, in order.
pub fn names(q: &Query) -> Vec<String> {
    q.target_list.iter().map(|t| t.name().to_string()).collect()
}
