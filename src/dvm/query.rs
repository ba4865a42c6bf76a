//! Analyzed query tree.
//!
//! A [`Query`] is what the host's parser/analyzer hands over for a view
//! definition: a range table, a join tree, a target list, and the optional
//! clauses of a single SELECT. Range-table indexes (`varno`, `rtindex`) are
//! 1-based positions into [`Query::rtable`]; target-list `resno` values are
//! the 1-based contiguous positions of the entries.
//!
//! Trees are plain owned values. Rewriting clones and returns a new tree;
//! nothing in this crate mutates a borrowed query.

use serde::{Deserialize, Serialize};

use crate::catalog::{Oid, RelKind};
use crate::dvm::expr::{AttrNumber, Expr, Index};

// ── Query ───────────────────────────────────────────────────────────────

/// Where a query came from.
///
/// Sub-queries produced by the EXISTS-to-LATERAL rewrite are marked so a
/// second restriction pass treats them as the EXISTS sublinks they replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOrigin {
    #[default]
    User,
    ExistsSubLink,
}

/// A single analyzed SELECT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub origin: QueryOrigin,
    pub rtable: Vec<RangeTblEntry>,
    pub jointree: FromExpr,
    pub target_list: Vec<TargetEntry>,
    pub group_clause: Vec<SortGroupClause>,
    pub grouping_sets: Vec<GroupingSet>,
    pub distinct_clause: Vec<SortGroupClause>,
    pub has_distinct_on: bool,
    pub sort_clause: Vec<SortGroupClause>,
    pub having_qual: Option<Expr>,
    pub limit_offset: Option<Expr>,
    pub limit_count: Option<Expr>,
    pub set_operations: Option<SetOperation>,
    pub row_marks: Vec<RowMark>,
    pub cte_list: Vec<CommonTableExpr>,
    pub has_recursive: bool,
    pub has_aggs: bool,
    pub has_window_funcs: bool,
    pub has_sublinks: bool,
}

impl Query {
    /// Fetch a range-table entry by its 1-based index.
    pub fn rte(&self, rtindex: Index) -> Option<&RangeTblEntry> {
        rtindex.checked_sub(1).and_then(|i| self.rtable.get(i))
    }

    /// The resno the next appended target entry must take.
    pub fn next_resno(&self) -> AttrNumber {
        self.target_list.len() as AttrNumber + 1
    }

    /// Target entry referenced by a GROUP BY / DISTINCT / ORDER BY item.
    pub fn sortgroupclause_tle(&self, clause: &SortGroupClause) -> Option<&TargetEntry> {
        self.target_list
            .iter()
            .find(|tle| tle.ressortgroupref == clause.tle_sort_group_ref)
    }

    /// Smallest sort/group reference not yet used by any target entry.
    pub fn next_sortgroupref(&self) -> u32 {
        self.target_list
            .iter()
            .map(|tle| tle.ressortgroupref)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Non-junk target entries, in output order.
    pub fn output_columns(&self) -> impl Iterator<Item = &TargetEntry> {
        self.target_list.iter().filter(|tle| !tle.resjunk)
    }

    /// Every expression owned directly by this query level: target list,
    /// join-tree quals, HAVING, LIMIT/OFFSET, join alias vars and function
    /// range-table expressions. Sub-queries are not included.
    pub fn level_exprs(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = self.target_list.iter().map(|tle| &tle.expr).collect();
        self.jointree.collect_quals(&mut out);
        out.extend(self.having_qual.iter());
        out.extend(self.limit_offset.iter());
        out.extend(self.limit_count.iter());
        for rte in &self.rtable {
            match &rte.kind {
                RteKind::Join { alias_vars, .. } => out.extend(alias_vars.iter()),
                RteKind::Function { exprs } => out.extend(exprs.iter()),
                RteKind::Values { rows } => out.extend(rows.iter().flatten()),
                _ => {}
            }
        }
        out
    }

    /// Sub-queries one level below this one: FROM-clause subqueries and
    /// CTE bodies. Sublink subqueries are reached through expressions.
    pub fn child_queries(&self) -> Vec<&Query> {
        let mut out: Vec<&Query> = self
            .rtable
            .iter()
            .filter_map(|rte| match &rte.kind {
                RteKind::Subquery { subquery } => Some(subquery.as_ref()),
                _ => None,
            })
            .collect();
        out.extend(self.cte_list.iter().map(|cte| cte.ctequery.as_ref()));
        out
    }
}

// ── Target list ─────────────────────────────────────────────────────────

/// Who produced a target entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnOrigin {
    #[default]
    User,
    /// Hidden bookkeeping column added by the rewriter.
    Bookkeeping,
}

/// One output expression of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub expr: Expr,
    pub resno: AttrNumber,
    pub resname: Option<String>,
    /// Nonzero when referenced by a GROUP BY / DISTINCT / ORDER BY item.
    pub ressortgroupref: u32,
    /// Junk entries are computed but not emitted.
    pub resjunk: bool,
    pub origin: ColumnOrigin,
}

impl TargetEntry {
    pub fn new(expr: Expr, resno: AttrNumber, resname: impl Into<String>) -> Self {
        TargetEntry {
            expr,
            resno,
            resname: Some(resname.into()),
            ressortgroupref: 0,
            resjunk: false,
            origin: ColumnOrigin::User,
        }
    }

    /// A bookkeeping column generated by the rewriter.
    pub fn bookkeeping(expr: Expr, resno: AttrNumber, resname: impl Into<String>) -> Self {
        TargetEntry {
            origin: ColumnOrigin::Bookkeeping,
            ..TargetEntry::new(expr, resno, resname)
        }
    }

    pub fn name(&self) -> &str {
        self.resname.as_deref().unwrap_or("?column?")
    }
}

/// A GROUP BY, DISTINCT or ORDER BY item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortGroupClause {
    pub tle_sort_group_ref: u32,
    pub eqop: Oid,
    pub sortop: Oid,
    pub nulls_first: bool,
    pub hashable: bool,
}

/// GROUPING SETS / ROLLUP / CUBE item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingSet {
    pub kind: GroupingSetKind,
    pub refs: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingSetKind {
    Simple,
    Rollup,
    Cube,
    Sets,
}

/// UNION / INTERSECT / EXCEPT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOperation {
    pub op: SetOpKind,
    pub all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

/// FOR UPDATE / FOR SHARE on a range-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMark {
    pub rti: Index,
    pub strength: LockStrength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStrength {
    KeyShare,
    Share,
    NoKeyUpdate,
    Update,
}

// ── Range table ─────────────────────────────────────────────────────────

/// One data source of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTblEntry {
    pub kind: RteKind,
    /// Reference name (alias or relation name).
    pub eref: String,
    /// Column names as seen through this entry.
    pub colnames: Vec<String>,
    pub lateral: bool,
    pub in_from_cl: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RteKind {
    Relation {
        relid: Oid,
        relkind: RelKind,
        tablesample: Option<TableSample>,
    },
    Subquery {
        subquery: Box<Query>,
    },
    Join {
        jointype: JoinType,
        /// Expansion of each join output column into its source expression.
        alias_vars: Vec<Expr>,
    },
    Function {
        exprs: Vec<Expr>,
    },
    Values {
        rows: Vec<Vec<Expr>>,
    },
    Cte {
        ctename: String,
        levels_up: u32,
    },
}

/// TABLESAMPLE clause of a relation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSample {
    pub tsmhandler: Oid,
    pub args: Vec<Expr>,
    pub repeatable: Option<Expr>,
}

impl RangeTblEntry {
    pub fn relation(relid: Oid, relkind: RelKind, name: &str, colnames: &[&str]) -> Self {
        RangeTblEntry {
            kind: RteKind::Relation {
                relid,
                relkind,
                tablesample: None,
            },
            eref: name.to_string(),
            colnames: colnames.iter().map(|c| c.to_string()).collect(),
            lateral: false,
            in_from_cl: true,
        }
    }

    pub fn subquery(subquery: Query, alias: &str, lateral: bool) -> Self {
        let colnames = subquery
            .output_columns()
            .map(|tle| tle.name().to_string())
            .collect();
        RangeTblEntry {
            kind: RteKind::Subquery {
                subquery: Box::new(subquery),
            },
            eref: alias.to_string(),
            colnames,
            lateral,
            in_from_cl: true,
        }
    }

    /// Relation OID when this is a plain relation entry.
    pub fn relid(&self) -> Option<Oid> {
        match &self.kind {
            RteKind::Relation { relid, .. } => Some(*relid),
            _ => None,
        }
    }

    pub fn relkind(&self) -> Option<RelKind> {
        match &self.kind {
            RteKind::Relation { relkind, .. } => Some(*relkind),
            _ => None,
        }
    }

    pub fn subquery_ref(&self) -> Option<&Query> {
        match &self.kind {
            RteKind::Subquery { subquery } => Some(subquery),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, RteKind::Relation { .. })
    }
}

// ── Join tree ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Full,
    Right,
    Semi,
    Anti,
}

impl JoinType {
    /// Joins that null-extend one side.
    pub fn is_outer(self) -> bool {
        matches!(
            self,
            JoinType::Left | JoinType::Full | JoinType::Right | JoinType::Anti
        )
    }
}

/// A node of the join tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinTreeNode {
    RangeTblRef(Index),
    Join(Box<JoinExpr>),
    From(Box<FromExpr>),
}

/// `larg JOIN rarg ON quals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinExpr {
    pub jointype: JoinType,
    pub larg: JoinTreeNode,
    pub rarg: JoinTreeNode,
    pub quals: Option<Expr>,
    /// Range-table index of the join's own entry.
    pub rtindex: Index,
}

/// FROM list plus WHERE clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FromExpr {
    pub fromlist: Vec<JoinTreeNode>,
    pub quals: Option<Expr>,
}

impl FromExpr {
    fn collect_quals<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        for node in &self.fromlist {
            node.collect_quals(out);
        }
        out.extend(self.quals.iter());
    }
}

impl JoinTreeNode {
    fn collect_quals<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            JoinTreeNode::RangeTblRef(_) => {}
            JoinTreeNode::Join(j) => {
                j.larg.collect_quals(out);
                j.rarg.collect_quals(out);
                out.extend(j.quals.iter());
            }
            JoinTreeNode::From(f) => f.collect_quals(out),
        }
    }

    /// Range-table indexes referenced by this subtree, left to right.
    /// Join nodes contribute their own index after their inputs.
    pub fn rtindexes(&self, out: &mut Vec<Index>) {
        match self {
            JoinTreeNode::RangeTblRef(i) => out.push(*i),
            JoinTreeNode::Join(j) => {
                j.larg.rtindexes(out);
                j.rarg.rtindexes(out);
                out.push(j.rtindex);
            }
            JoinTreeNode::From(f) => {
                for n in &f.fromlist {
                    n.rtindexes(out);
                }
            }
        }
    }
}

// ── CTEs ────────────────────────────────────────────────────────────────

/// `WITH name AS (query)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonTableExpr {
    pub ctename: String,
    pub ctequery: Box<Query>,
    /// Number of range-table entries referencing this CTE.
    pub cterefcount: u32,
}
