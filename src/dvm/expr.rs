//! Expression nodes and the tree utilities the analysis passes share.
//!
//! The node set is closed: everything the analyzer can put into a view
//! definition that matters to incremental maintenance has a variant here.
//! Function and operator nodes carry the strictness and volatility the
//! analyzer resolved, so no catalog lookup is needed to classify them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{BOOL_OID, INT4_OID, INVALID_OID, Oid};
use crate::dvm::query::{Query, RteKind, SortGroupClause};

/// Range-table index (1-based).
pub type Index = usize;

/// Attribute number. Negative values are system columns.
pub type AttrNumber = i16;

// ── Values ──────────────────────────────────────────────────────────────

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Numeric(String),
    Text(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

/// Function volatility class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Volatility {
    #[default]
    Immutable,
    Stable,
    Volatile,
}

// ── Nodes ───────────────────────────────────────────────────────────────

/// Column reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Var {
    pub varno: Index,
    pub varattno: AttrNumber,
    pub vartype: Oid,
    pub vartypmod: i32,
    pub varcollid: Oid,
    /// Number of query levels up the referenced range table lives.
    pub varlevelsup: u32,
}

impl Var {
    pub fn new(varno: Index, varattno: AttrNumber, vartype: Oid) -> Self {
        Var {
            varno,
            varattno,
            vartype,
            vartypmod: -1,
            varcollid: INVALID_OID,
            varlevelsup: 0,
        }
    }

    /// Same relation and attribute, ignoring type and level.
    pub fn same_column(&self, other: &Var) -> bool {
        self.varno == other.varno && self.varattno == other.varattno
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Const {
    pub consttype: Oid,
    pub consttypmod: i32,
    pub constcollid: Oid,
    pub value: Datum,
}

impl Const {
    pub fn int4(v: i32) -> Self {
        Const {
            consttype: INT4_OID,
            consttypmod: -1,
            constcollid: INVALID_OID,
            value: Datum::Int4(v),
        }
    }

    pub fn bool(v: bool) -> Self {
        Const {
            consttype: BOOL_OID,
            consttypmod: -1,
            constcollid: INVALID_OID,
            value: Datum::Bool(v),
        }
    }

    /// A typed NULL, used as a placeholder argument.
    pub fn null(consttype: Oid, constcollid: Oid) -> Self {
        Const {
            consttype,
            consttypmod: -1,
            constcollid,
            value: Datum::Null,
        }
    }
}

/// Aggregate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggref {
    pub aggfnoid: Oid,
    pub aggtype: Oid,
    pub aggcollid: Oid,
    pub args: Vec<Expr>,
    /// Declared input types of the aggregate.
    pub aggargtypes: Vec<Oid>,
    pub aggstar: bool,
    pub aggdistinct: Vec<SortGroupClause>,
    pub aggorder: Vec<SortGroupClause>,
    pub aggfilter: Option<Expr>,
    pub agglevelsup: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFunc {
    pub winfnoid: Oid,
    pub wintype: Oid,
    pub wincollid: Oid,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncExpr {
    pub funcid: Oid,
    pub funcname: String,
    pub funcresulttype: Oid,
    pub funccollid: Oid,
    pub args: Vec<Expr>,
    pub strict: bool,
    pub volatility: Volatility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpExpr {
    pub opno: Oid,
    pub opname: String,
    pub opresulttype: Oid,
    pub opcollid: Oid,
    pub args: Vec<Expr>,
    pub strict: bool,
    pub volatility: Volatility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolExprType {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolExpr {
    pub boolop: BoolExprType,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullTestType {
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullTest {
    pub arg: Expr,
    pub nulltesttype: NullTestType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseWhen {
    pub expr: Expr,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseExpr {
    pub casetype: Oid,
    pub casecollid: Oid,
    pub arg: Option<Expr>,
    pub args: Vec<CaseWhen>,
    pub defresult: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceExpr {
    pub coalescetype: Oid,
    pub coalescecollid: Oid,
    pub args: Vec<Expr>,
}

/// Binary-compatible type relabeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelabelType {
    pub arg: Expr,
    pub resulttype: Oid,
    pub resulttypmod: i32,
    pub resultcollid: Oid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubLinkType {
    Exists,
    All,
    Any,
    RowCompare,
    Expr,
    Array,
}

/// Subquery appearing inside an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLink {
    pub sublink_type: SubLinkType,
    pub testexpr: Option<Expr>,
    pub subselect: Box<Query>,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Var(Var),
    Const(Const),
    Aggref(Box<Aggref>),
    WindowFunc(Box<WindowFunc>),
    FuncExpr(Box<FuncExpr>),
    OpExpr(Box<OpExpr>),
    BoolExpr(Box<BoolExpr>),
    NullTest(Box<NullTest>),
    CaseExpr(Box<CaseExpr>),
    CoalesceExpr(Box<CoalesceExpr>),
    RelabelType(Box<RelabelType>),
    SubLink(Box<SubLink>),
}

impl Expr {
    /// Result type of the expression.
    pub fn expr_type(&self) -> Oid {
        match self {
            Expr::Var(v) => v.vartype,
            Expr::Const(c) => c.consttype,
            Expr::Aggref(a) => a.aggtype,
            Expr::WindowFunc(w) => w.wintype,
            Expr::FuncExpr(f) => f.funcresulttype,
            Expr::OpExpr(o) => o.opresulttype,
            Expr::BoolExpr(_) | Expr::NullTest(_) => BOOL_OID,
            Expr::CaseExpr(c) => c.casetype,
            Expr::CoalesceExpr(c) => c.coalescetype,
            Expr::RelabelType(r) => r.resulttype,
            Expr::SubLink(s) => match s.sublink_type {
                SubLinkType::Expr | SubLinkType::Array => s
                    .subselect
                    .output_columns()
                    .next()
                    .map(|tle| tle.expr.expr_type())
                    .unwrap_or(INVALID_OID),
                _ => BOOL_OID,
            },
        }
    }

    /// Type modifier of the result, or -1 when unknown.
    pub fn expr_typmod(&self) -> i32 {
        match self {
            Expr::Var(v) => v.vartypmod,
            Expr::Const(c) => c.consttypmod,
            Expr::RelabelType(r) => r.resulttypmod,
            _ => -1,
        }
    }

    /// Collation of the result, or `INVALID_OID` for non-collatable results.
    pub fn expr_collation(&self) -> Oid {
        match self {
            Expr::Var(v) => v.varcollid,
            Expr::Const(c) => c.constcollid,
            Expr::Aggref(a) => a.aggcollid,
            Expr::WindowFunc(w) => w.wincollid,
            Expr::FuncExpr(f) => f.funccollid,
            Expr::OpExpr(o) => o.opcollid,
            Expr::BoolExpr(_) | Expr::NullTest(_) => INVALID_OID,
            Expr::CaseExpr(c) => c.casecollid,
            Expr::CoalesceExpr(c) => c.coalescecollid,
            Expr::RelabelType(r) => r.resultcollid,
            Expr::SubLink(s) => match s.sublink_type {
                SubLinkType::Expr | SubLinkType::Array => s
                    .subselect
                    .output_columns()
                    .next()
                    .map(|tle| tle.expr.expr_collation())
                    .unwrap_or(INVALID_OID),
                _ => INVALID_OID,
            },
        }
    }

    /// Direct sub-expressions at the same query level. Sublink subqueries
    /// are not included; the sublink's test expression is.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Var(_) | Expr::Const(_) => Vec::new(),
            Expr::Aggref(a) => a.args.iter().chain(a.aggfilter.iter()).collect(),
            Expr::WindowFunc(w) => w.args.iter().collect(),
            Expr::FuncExpr(f) => f.args.iter().collect(),
            Expr::OpExpr(o) => o.args.iter().collect(),
            Expr::BoolExpr(b) => b.args.iter().collect(),
            Expr::NullTest(n) => vec![&n.arg],
            Expr::CaseExpr(c) => {
                let mut out: Vec<&Expr> = c.arg.iter().collect();
                for w in &c.args {
                    out.push(&w.expr);
                    out.push(&w.result);
                }
                out.extend(c.defresult.iter());
                out
            }
            Expr::CoalesceExpr(c) => c.args.iter().collect(),
            Expr::RelabelType(r) => vec![&r.arg],
            Expr::SubLink(s) => s.testexpr.iter().collect(),
        }
    }

    /// Mutable counterpart of [`Expr::children`].
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Var(_) | Expr::Const(_) => Vec::new(),
            Expr::Aggref(a) => a.args.iter_mut().chain(a.aggfilter.iter_mut()).collect(),
            Expr::WindowFunc(w) => w.args.iter_mut().collect(),
            Expr::FuncExpr(f) => f.args.iter_mut().collect(),
            Expr::OpExpr(o) => o.args.iter_mut().collect(),
            Expr::BoolExpr(b) => b.args.iter_mut().collect(),
            Expr::NullTest(n) => vec![&mut n.arg],
            Expr::CaseExpr(c) => {
                let CaseExpr {
                    arg,
                    args,
                    defresult,
                    ..
                } = c.as_mut();
                let mut out: Vec<&mut Expr> = arg.iter_mut().collect();
                for w in args.iter_mut() {
                    out.push(&mut w.expr);
                    out.push(&mut w.result);
                }
                out.extend(defresult.iter_mut());
                out
            }
            Expr::CoalesceExpr(c) => c.args.iter_mut().collect(),
            Expr::RelabelType(r) => vec![&mut r.arg],
            Expr::SubLink(s) => s.testexpr.iter_mut().collect(),
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Expr::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_aggref(&self) -> bool {
        matches!(self, Expr::Aggref(_))
    }
}

// ── Walkers ─────────────────────────────────────────────────────────────
//
// Both walkers visit nodes depth-first and stop as soon as the visitor
// returns `true`. `depth` counts query levels below the starting point.

/// Visit `expr` and everything below it, including sublink subqueries.
pub fn walk_expr(expr: &Expr, depth: u32, visit: &mut dyn FnMut(&Expr, u32) -> bool) -> bool {
    if visit(expr, depth) {
        return true;
    }
    for child in expr.children() {
        if walk_expr(child, depth, visit) {
            return true;
        }
    }
    if let Expr::SubLink(s) = expr {
        return walk_query(&s.subselect, depth + 1, visit);
    }
    false
}

/// Visit every expression of `query` and of all queries nested in it.
pub fn walk_query(query: &Query, depth: u32, visit: &mut dyn FnMut(&Expr, u32) -> bool) -> bool {
    for expr in query.level_exprs() {
        if walk_expr(expr, depth, visit) {
            return true;
        }
    }
    for sub in query.child_queries() {
        if walk_query(sub, depth + 1, visit) {
            return true;
        }
    }
    false
}

// ── Queries over expressions ────────────────────────────────────────────

/// Vars that belong to the query `levelsup` levels above `expr`'s level.
pub fn pull_vars_of_level(expr: &Expr, levelsup: u32) -> Vec<Var> {
    let mut out = Vec::new();
    walk_expr(expr, 0, &mut |node, depth| {
        if let Expr::Var(v) = node
            && v.varlevelsup == levelsup + depth
        {
            out.push(*v);
        }
        false
    });
    out
}

/// Like [`pull_vars_of_level`], starting from a whole query.
pub fn query_pull_vars_of_level(query: &Query, levelsup: u32) -> Vec<Var> {
    let mut out = Vec::new();
    walk_query(query, 0, &mut |node, depth| {
        if let Expr::Var(v) = node
            && v.varlevelsup == levelsup + depth
        {
            out.push(*v);
        }
        false
    });
    out
}

/// Range-table indexes referenced by level-0 vars of `expr`.
pub fn pull_varnos(expr: &Expr) -> BTreeSet<Index> {
    pull_vars_of_level(expr, 0)
        .into_iter()
        .map(|v| v.varno)
        .collect()
}

/// Whether `expr` contains an aggregate belonging to the query `levelsup`
/// levels above it.
pub fn contain_aggs_of_level(expr: &Expr, levelsup: u32) -> bool {
    walk_expr(expr, 0, &mut |node, depth| {
        matches!(node, Expr::Aggref(a) if a.agglevelsup == levelsup + depth)
    })
}

/// Whether `expr` contains any sublink.
pub fn contain_sublinks(expr: &Expr) -> bool {
    walk_expr(expr, 0, &mut |node, _| matches!(node, Expr::SubLink(_)))
}

fn is_mutable_node(node: &Expr) -> bool {
    match node {
        Expr::FuncExpr(f) => f.volatility != Volatility::Immutable,
        Expr::OpExpr(o) => o.volatility != Volatility::Immutable,
        _ => false,
    }
}

/// Whether any function or operator in the query, at any level, is not
/// immutable.
pub fn contain_mutable_functions(query: &Query) -> bool {
    walk_query(query, 0, &mut |node, _| is_mutable_node(node))
}

/// Whether `expr` can yield a non-null result from a null input.
///
/// Aggregates, window functions, sublinks, CASE, COALESCE, NULL tests,
/// AND/OR and non-strict functions or operators all qualify.
pub fn contain_nonstrict_functions(expr: &Expr) -> bool {
    let mut found = false;
    walk_expr(expr, 0, &mut |node, _| {
        found = match node {
            Expr::Aggref(_)
            | Expr::WindowFunc(_)
            | Expr::SubLink(_)
            | Expr::CaseExpr(_)
            | Expr::CoalesceExpr(_)
            | Expr::NullTest(_) => true,
            Expr::BoolExpr(b) => b.boolop != BoolExprType::Not,
            Expr::FuncExpr(f) => !f.strict,
            Expr::OpExpr(o) => !o.strict,
            _ => false,
        };
        found
    });
    found
}

/// Level-0 vars that must be non-null for `clause` to return true.
///
/// At the top level the clause is an implicit AND, so the sets of its
/// conjuncts are unioned. Below the top level only strict functions and
/// operators propagate non-nullability; OR (and AND below the top) keep only
/// the vars that are non-nullable in every arm.
pub fn find_nonnullable_vars(clause: &Expr) -> Vec<Var> {
    let mut out = nonnullable_walker(clause, true);
    out.sort();
    out.dedup();
    out
}

fn nonnullable_walker(node: &Expr, top_level: bool) -> Vec<Var> {
    match node {
        Expr::Var(v) if v.varlevelsup == 0 => vec![*v],
        Expr::FuncExpr(f) if f.strict => f
            .args
            .iter()
            .flat_map(|a| nonnullable_walker(a, false))
            .collect(),
        Expr::OpExpr(o) if o.strict => o
            .args
            .iter()
            .flat_map(|a| nonnullable_walker(a, false))
            .collect(),
        Expr::BoolExpr(b) => match b.boolop {
            BoolExprType::And if top_level => b
                .args
                .iter()
                .flat_map(|a| nonnullable_walker(a, true))
                .collect(),
            BoolExprType::And | BoolExprType::Or => {
                let mut arms = b.args.iter().map(|a| nonnullable_walker(a, top_level));
                let Some(first) = arms.next() else {
                    return Vec::new();
                };
                arms.fold(first, |acc, arm| {
                    acc.into_iter().filter(|v| arm.contains(v)).collect()
                })
            }
            BoolExprType::Not => b
                .args
                .iter()
                .flat_map(|a| nonnullable_walker(a, false))
                .collect(),
        },
        Expr::RelabelType(r) => nonnullable_walker(&r.arg, top_level),
        Expr::NullTest(n) if top_level && n.nulltesttype == NullTestType::IsNotNull => {
            nonnullable_walker(&n.arg, false)
        }
        _ => Vec::new(),
    }
}

/// Replace level-0 references to join outputs by the expressions the join
/// alias vars stand for, repeatedly, so the result only references base
/// range-table entries. Whole-row references are left alone.
pub fn flatten_join_alias_vars(query: &Query, expr: &Expr) -> Expr {
    let mut out = expr.clone();
    flatten_in_place(query, &mut out);
    out
}

fn flatten_in_place(query: &Query, expr: &mut Expr) {
    if let Expr::Var(v) = expr {
        if v.varlevelsup != 0 || v.varattno <= 0 {
            return;
        }
        let alias = match query.rte(v.varno).map(|rte| &rte.kind) {
            Some(RteKind::Join { alias_vars, .. }) => {
                alias_vars.get(v.varattno as usize - 1).cloned()
            }
            _ => None,
        };
        if let Some(replacement) = alias {
            *expr = replacement;
            flatten_in_place(query, expr);
        }
        return;
    }
    for child in expr.children_mut() {
        flatten_in_place(query, child);
    }
}
