//! Rewrite a view definition into the query that is actually materialized.
//!
//! The rewritten query carries the hidden bookkeeping columns the delta
//! engine needs:
//!
//! - `__ivm_exists_count_<n>__` for every EXISTS sublink, which is turned
//!   into a LATERAL subquery counting its matches;
//! - `__ivm_count_<name>_` next to every aggregate other than `count`;
//! - `__ivm_sum_<name>_` next to every `avg`;
//! - `__ivm_count__`, the number of source rows behind each output row,
//!   whenever the view aggregates or is DISTINCT.
//!
//! DISTINCT is also expressed as GROUP BY over the output columns so the
//! grouped and distinct cases share one maintenance path.
//!
//! The input is never modified: [`rewrite_query_for_immv`] clones it and
//! returns the augmented copy.

use tracing::debug;

use crate::catalog::{BOOL_OID, INT4_OID, INT8_OID, INT84GT_OPERATOR, INVALID_OID, Oid};
use crate::config::{ImmvConfig, truncate_identifier};
use crate::dvm::aggregate::{self, AggKind, AggregateEntry};
use crate::dvm::expr::{
    Aggref, AttrNumber, BoolExpr, BoolExprType, Const, Expr, OpExpr, SubLinkType, Var, Volatility,
    contain_sublinks,
};
use crate::dvm::query::{
    JoinTreeNode, Query, QueryOrigin, RangeTblEntry, RteKind, SortGroupClause, TargetEntry,
};
use crate::error::{ImmvError, UnsupportedConstruct};

/// Row-count column appended to aggregating and DISTINCT views.
pub const IVM_COUNT_COLUMN: &str = "__ivm_count__";

const EXISTS_SUBQUERY_PREFIX: &str = "__ivm_exists_subquery_";
const EXISTS_COUNT_PREFIX: &str = "__ivm_exists_count_";

/// Alias of the `n`th LATERAL subquery produced from an EXISTS sublink.
pub fn exists_subquery_alias(n: usize) -> String {
    format!("{EXISTS_SUBQUERY_PREFIX}{n}__")
}

/// Count column projected by the `n`th EXISTS rewrite.
pub fn exists_count_column(n: usize) -> String {
    format!("{EXISTS_COUNT_PREFIX}{n}__")
}

/// Build `<prefix>_<name>_`, shortening `name` to fit `max_len` bytes.
pub fn companion_column_name(prefix: &str, name: &str, max_len: usize) -> String {
    let fixed = prefix.len() + 2;
    let room = max_len.saturating_sub(fixed);
    format!("{prefix}_{}_", truncate_identifier(name, room))
}

/// Rewrite `query` for incremental maintenance.
///
/// `col_names` are the explicit column names of the view, if any; they
/// override target-entry names when naming companion columns.
pub fn rewrite_query_for_immv(
    query: &Query,
    col_names: &[String],
    config: &ImmvConfig,
) -> Result<Query, ImmvError> {
    let mut rewritten = query.clone();

    if rewritten.has_sublinks {
        rewrite_exists_sublinks(&mut rewritten)?;
        expose_exists_counts(&mut rewritten);
    }

    if !rewritten.group_clause.is_empty() {
        for clause in &rewritten.group_clause {
            let Some(tle) = rewritten.sortgroupclause_tle(clause) else {
                return Err(ImmvError::InternalInvariantViolation(format!(
                    "GROUP BY reference {} has no target entry",
                    clause.tle_sort_group_ref
                )));
            };
            if tle.resjunk {
                return Err(UnsupportedConstruct::GroupByNotInSelectList.into());
            }
        }
    } else if !rewritten.has_aggs && !rewritten.distinct_clause.is_empty() {
        rewritten.group_clause = distinct_as_group_clause(&rewritten)?;
    }

    if rewritten.has_aggs {
        let max_len = config.max_identifier_len();
        let mut companions = Vec::new();
        let mut next_resno = rewritten.next_resno();
        for tle in &rewritten.target_list {
            let Expr::Aggref(aggref) = &tle.expr else {
                continue;
            };
            let name = (tle.resno as usize)
                .checked_sub(1)
                .and_then(|i| col_names.get(i))
                .map(String::as_str)
                .unwrap_or_else(|| tle.name());
            for column in companion_columns(aggref, name, max_len, next_resno)? {
                next_resno += 1;
                companions.push(column);
            }
        }
        rewritten.target_list.extend(companions);
    }

    if !rewritten.group_clause.is_empty()
        || !rewritten.distinct_clause.is_empty()
        || rewritten.has_aggs
    {
        let resno = rewritten.next_resno();
        let count = companion_aggref(AggKind::Count, &[], Vec::new())?;
        rewritten
            .target_list
            .push(TargetEntry::bookkeeping(count, resno, IVM_COUNT_COLUMN));
        rewritten.has_aggs = true;
    }

    debug!(
        columns = rewritten.target_list.len(),
        added = rewritten.target_list.len() - query.target_list.len(),
        "rewrote view definition"
    );
    Ok(rewritten)
}

// ── DISTINCT ────────────────────────────────────────────────────────────

fn distinct_as_group_clause(query: &Query) -> Result<Vec<SortGroupClause>, ImmvError> {
    query
        .output_columns()
        .map(|tle| {
            query
                .distinct_clause
                .iter()
                .find(|c| tle.ressortgroupref != 0 && c.tle_sort_group_ref == tle.ressortgroupref)
                .cloned()
                .ok_or_else(|| {
                    ImmvError::InternalInvariantViolation(format!(
                        "DISTINCT does not cover output column \"{}\"",
                        tle.name()
                    ))
                })
        })
        .collect()
}

// ── Aggregates ──────────────────────────────────────────────────────────

/// Companion columns for one aggregate target entry, numbered from `resno`.
fn companion_columns(
    aggref: &Aggref,
    name: &str,
    max_len: usize,
    mut resno: AttrNumber,
) -> Result<Vec<TargetEntry>, ImmvError> {
    let Some(entry) = aggregate::lookup(aggref.aggfnoid) else {
        return Err(ImmvError::InternalInvariantViolation(format!(
            "aggregate {} passed the restriction check but is not supported",
            aggref.aggfnoid
        )));
    };

    let mut out = Vec::new();
    if entry.kind != AggKind::Count {
        let count = companion_aggref(AggKind::Count, &[INT4_OID], aggref.args.clone())?;
        out.push(TargetEntry::bookkeeping(
            count,
            resno,
            companion_column_name("__ivm_count", name, max_len),
        ));
        resno += 1;
    }
    if entry.kind == AggKind::Avg {
        let sum = companion_aggref(AggKind::Sum, &aggref.aggargtypes, aggref.args.clone())?;
        out.push(TargetEntry::bookkeeping(
            sum,
            resno,
            companion_column_name("__ivm_sum", name, max_len),
        ));
    }
    Ok(out)
}

/// Resolve `kind` over placeholder arguments of `arg_types`, then give the
/// resulting call the real `args`.
fn companion_aggref(kind: AggKind, arg_types: &[Oid], args: Vec<Expr>) -> Result<Expr, ImmvError> {
    let Some(entry) = aggregate::resolve(kind, arg_types) else {
        return Err(ImmvError::InternalInvariantViolation(format!(
            "no {} aggregate accepts {arg_types:?}",
            kind.name()
        )));
    };
    let mut call = placeholder_call(entry, arg_types);
    call.args = args;
    call.aggargtypes = call.args.iter().map(Expr::expr_type).collect();
    Ok(Expr::Aggref(Box::new(call)))
}

fn placeholder_call(entry: &AggregateEntry, arg_types: &[Oid]) -> Aggref {
    let args = arg_types
        .iter()
        .map(|&t| {
            if t == INT4_OID {
                Expr::Const(Const::int4(1))
            } else {
                Expr::Const(Const::null(t, INVALID_OID))
            }
        })
        .collect();
    Aggref {
        aggfnoid: entry.fn_oid,
        aggtype: entry.result_type,
        aggcollid: INVALID_OID,
        args,
        aggargtypes: arg_types.to_vec(),
        aggstar: entry.star,
        aggdistinct: Vec::new(),
        aggorder: Vec::new(),
        aggfilter: None,
        agglevelsup: 0,
    }
}

// ── EXISTS → LATERAL ────────────────────────────────────────────────────

/// Replace every EXISTS sublink in the WHERE clause by a LATERAL subquery.
fn rewrite_exists_sublinks(query: &mut Query) -> Result<(), ImmvError> {
    if query.target_list.iter().any(|t| contain_sublinks(&t.expr))
        || query.jointree.fromlist.iter().any(jointree_has_sublink)
    {
        return Err(UnsupportedConstruct::ExistsOutsideWhereConjunction.into());
    }

    let mut laterals = Vec::new();
    if let Some(quals) = query.jointree.quals.take() {
        query.jointree.quals = match quals {
            Expr::SubLink(sublink) if sublink.sublink_type == SubLinkType::Exists => {
                laterals.push(*sublink.subselect);
                None
            }
            other => Some(rewrite_conjunction(other, &mut laterals, true)?),
        };
    }

    for (n, subselect) in laterals.into_iter().enumerate() {
        let lateral = exists_to_lateral(subselect, n);
        query
            .rtable
            .push(RangeTblEntry::subquery(lateral, &exists_subquery_alias(n), true));
        query
            .jointree
            .fromlist
            .push(JoinTreeNode::RangeTblRef(query.rtable.len()));
    }
    let remaining = query.level_exprs().into_iter().any(contain_sublinks);
    query.has_sublinks = remaining;
    Ok(())
}

fn jointree_has_sublink(node: &JoinTreeNode) -> bool {
    match node {
        JoinTreeNode::RangeTblRef(_) => false,
        JoinTreeNode::Join(j) => {
            jointree_has_sublink(&j.larg)
                || jointree_has_sublink(&j.rarg)
                || j.quals.as_ref().is_some_and(contain_sublinks)
        }
        JoinTreeNode::From(f) => {
            f.fromlist.iter().any(jointree_has_sublink)
                || f.quals.as_ref().is_some_and(contain_sublinks)
        }
    }
}

/// Pull EXISTS sublinks out of an AND tree, leaving `true` in their place.
fn rewrite_conjunction(
    expr: Expr,
    laterals: &mut Vec<Query>,
    under_and: bool,
) -> Result<Expr, ImmvError> {
    match expr {
        Expr::SubLink(sublink) if under_and && sublink.sublink_type == SubLinkType::Exists => {
            laterals.push(*sublink.subselect);
            Ok(Expr::Const(Const::bool(true)))
        }
        Expr::BoolExpr(b) if b.boolop == BoolExprType::And => {
            let args = b
                .args
                .into_iter()
                .map(|arg| rewrite_conjunction(arg, laterals, true))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::BoolExpr(Box::new(BoolExpr {
                boolop: BoolExprType::And,
                args,
            })))
        }
        Expr::BoolExpr(b) => {
            if b.args.iter().any(contain_sublinks) {
                return Err(UnsupportedConstruct::ExistsUnderOrNot.into());
            }
            Ok(Expr::BoolExpr(b))
        }
        other if contain_sublinks(&other) => {
            Err(UnsupportedConstruct::ExistsOutsideWhereConjunction.into())
        }
        other => Ok(other),
    }
}

/// `EXISTS (sub)` as `LATERAL (SELECT count(*) FROM ... HAVING count(*) > 0)`.
fn exists_to_lateral(mut sub: Query, n: usize) -> Query {
    let count_star = Aggref {
        aggfnoid: 2803,
        aggtype: INT8_OID,
        aggcollid: INVALID_OID,
        args: Vec::new(),
        aggargtypes: Vec::new(),
        aggstar: true,
        aggdistinct: Vec::new(),
        aggorder: Vec::new(),
        aggfilter: None,
        agglevelsup: 0,
    };
    let count = Expr::Aggref(Box::new(count_star));

    sub.origin = QueryOrigin::ExistsSubLink;
    sub.target_list = vec![TargetEntry::bookkeeping(
        count.clone(),
        1,
        exists_count_column(n),
    )];
    // grouping would turn one match into one row per group
    sub.group_clause.clear();
    sub.distinct_clause.clear();
    sub.having_qual = Some(Expr::OpExpr(Box::new(OpExpr {
        opno: INT84GT_OPERATOR,
        opname: ">".into(),
        opresulttype: BOOL_OID,
        opcollid: INVALID_OID,
        args: vec![count, Expr::Const(Const::int4(0))],
        strict: true,
        volatility: Volatility::Immutable,
    })));
    sub.has_aggs = true;
    sub
}

/// Project the count column of every EXISTS rewrite in the outer query.
fn expose_exists_counts(query: &mut Query) {
    let mut added = Vec::new();
    let mut resno = query.next_resno();
    for (i, rte) in query.rtable.iter().enumerate() {
        let RteKind::Subquery { subquery } = &rte.kind else {
            continue;
        };
        if !rte.lateral || subquery.origin != QueryOrigin::ExistsSubLink {
            continue;
        }
        let Some(count) = subquery
            .target_list
            .iter()
            .find(|t| t.name().starts_with(EXISTS_COUNT_PREFIX))
        else {
            continue;
        };
        let var = Var::new(i + 1, count.resno, INT8_OID);
        added.push(TargetEntry::bookkeeping(
            Expr::Var(var),
            resno,
            count.name().to_string(),
        ));
        resno += 1;
    }
    query.target_list.extend(added);
}
