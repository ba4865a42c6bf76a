//! Restriction checks for incrementally maintainable view definitions.
//!
//! [`check_ivm_restriction`] walks a query depth-first, including every
//! FROM-clause subquery, CTE and EXISTS sublink, and fails on the first
//! construct the maintenance protocol cannot handle. The order of the checks
//! is significant: when a query violates several rules, the diagnostic
//! reported is the one for the first rule in walk order.
//!
//! # Walk order per query level
//!
//! 1. Query-level clauses (HAVING, ORDER BY, LIMIT, ...).
//! 2. System columns anywhere in the query.
//! 3. Nested-query rules (DISTINCT, aggregates below the top level).
//! 4. Range table, entry by entry; FROM subqueries recurse here.
//! 5. Target list, then join tree, then HAVING, then CTE bodies.
//! 6. At the top level only: EXISTS correlation vars and outer-join rules.
//!
//! Queries produced by the EXISTS-to-LATERAL rewrite are recognised by
//! their origin marker and checked as the EXISTS sublinks they replaced, so
//! the rewriter's output passes the same checks as its input.

use tracing::debug;

use crate::catalog::{Catalog, RelKind};
use crate::config::ImmvConfig;
use crate::dvm::aggregate;
use crate::dvm::equijoin::is_equijoin_condition;
use crate::dvm::expr::{
    Aggref, Expr, SubLink, SubLinkType, Var, contain_aggs_of_level, contain_mutable_functions,
    contain_nonstrict_functions, find_nonnullable_vars, flatten_join_alias_vars,
    pull_vars_of_level, query_pull_vars_of_level,
};
use crate::dvm::query::{
    ColumnOrigin, CommonTableExpr, FromExpr, JoinExpr, JoinTreeNode, Query, QueryOrigin,
    RangeTblEntry, RteKind, TargetEntry,
};
use crate::error::{ImmvError, UnsupportedConstruct, is_ivm_name};

/// State accumulated during one restriction pass.
///
/// Owned by a single call of [`check_ivm_restriction`] and threaded through
/// the recursion by `&mut`.
#[derive(Debug, Default)]
pub struct RestrictionContext {
    /// An aggregate has been seen at the current level.
    pub has_agg: bool,
    /// An outer join has been seen.
    pub has_outerjoin: bool,
    /// A FROM-clause subquery has been seen.
    pub has_subquery: bool,
    /// The walk is inside an EXISTS subquery.
    pub in_exists_subquery: bool,
    /// Quals of every outer join seen, in walk order.
    pub join_quals: Vec<Option<Expr>>,
    /// Upper-level vars referenced from inside EXISTS subqueries.
    pub exists_qual_vars: Vec<Var>,
    /// Current subquery nesting depth; 0 is the view query itself.
    pub sublevels_up: usize,
    stack_depth: usize,
}

/// Reject queries that reference non-immutable functions anywhere.
///
/// Callers run this before [`check_ivm_restriction`].
pub fn check_mutability(query: &Query) -> Result<(), ImmvError> {
    if contain_mutable_functions(query) {
        return Err(UnsupportedConstruct::MutableFunction.into());
    }
    Ok(())
}

/// Check that `query` can be maintained incrementally.
pub fn check_ivm_restriction(
    catalog: &dyn Catalog,
    config: &ImmvConfig,
    query: &Query,
) -> Result<(), ImmvError> {
    let checker = Checker {
        catalog,
        max_depth: config.max_tree_depth,
    };
    let mut ctx = RestrictionContext::default();
    checker.check_query(query, &mut ctx)?;
    debug!(
        has_agg = ctx.has_agg,
        has_outerjoin = ctx.has_outerjoin,
        has_subquery = ctx.has_subquery,
        "view definition passed restriction checks"
    );
    Ok(())
}

fn unsupported(construct: UnsupportedConstruct) -> ImmvError {
    ImmvError::Unsupported(construct)
}

struct Checker<'a> {
    catalog: &'a dyn Catalog,
    max_depth: usize,
}

impl Checker<'_> {
    /// Run `f` one level deeper in the walk, bounded by the depth limit.
    fn descend(
        &self,
        ctx: &mut RestrictionContext,
        f: impl FnOnce(&Self, &mut RestrictionContext) -> Result<(), ImmvError>,
    ) -> Result<(), ImmvError> {
        ctx.stack_depth += 1;
        if ctx.stack_depth > self.max_depth {
            return Err(ImmvError::RecursionLimit(self.max_depth));
        }
        f(self, ctx)?;
        ctx.stack_depth -= 1;
        Ok(())
    }

    // ── Query ───────────────────────────────────────────────────────────

    fn check_query(&self, qry: &Query, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        self.descend(ctx, |this, ctx| this.check_query_inner(qry, ctx))
    }

    fn check_query_inner(&self, qry: &Query, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        let rewritten_exists = qry.origin == QueryOrigin::ExistsSubLink;

        if qry.having_qual.is_some() && !rewritten_exists {
            return Err(unsupported(UnsupportedConstruct::Having));
        }
        if !qry.sort_clause.is_empty() {
            return Err(unsupported(UnsupportedConstruct::OrderBy));
        }
        if qry.limit_offset.is_some() || qry.limit_count.is_some() {
            return Err(unsupported(UnsupportedConstruct::LimitOffset));
        }
        if qry.has_distinct_on {
            return Err(unsupported(UnsupportedConstruct::DistinctOn));
        }
        if qry.has_window_funcs {
            return Err(unsupported(UnsupportedConstruct::WindowFunctions));
        }
        if !qry.grouping_sets.is_empty() {
            return Err(unsupported(UnsupportedConstruct::GroupingSets));
        }
        if qry.set_operations.is_some() {
            return Err(unsupported(UnsupportedConstruct::SetOperations));
        }
        if qry.target_list.is_empty() {
            return Err(unsupported(UnsupportedConstruct::EmptyTargetList));
        }
        if !qry.row_marks.is_empty() {
            return Err(unsupported(UnsupportedConstruct::RowMarks));
        }
        if qry.has_recursive {
            return Err(unsupported(UnsupportedConstruct::RecursiveCte));
        }

        if query_pull_vars_of_level(qry, 0)
            .iter()
            .any(|v| v.varattno < 0)
        {
            return Err(unsupported(UnsupportedConstruct::SystemColumn));
        }

        if ctx.sublevels_up > 0 && !qry.distinct_clause.is_empty() {
            return Err(unsupported(UnsupportedConstruct::NestedDistinct));
        }
        if !rewritten_exists {
            if ctx.sublevels_up > 0 && qry.has_aggs {
                return Err(unsupported(UnsupportedConstruct::NestedAggregate));
            }
            ctx.has_agg |= qry.has_aggs;
        }

        for rte in &qry.rtable {
            self.check_range_table_entry(rte, ctx)?;
        }

        for tle in &qry.target_list {
            self.check_target_entry(tle, ctx)?;
        }
        self.check_from_expr(&qry.jointree, ctx)?;
        if let Some(having) = &qry.having_qual {
            self.check_expr(having, ctx)?;
        }
        for cte in &qry.cte_list {
            self.check_cte(cte, ctx)?;
        }

        if ctx.sublevels_up == 0 {
            self.check_exists_vars(qry, ctx)?;
            if ctx.has_outerjoin {
                self.check_outer_join_query(qry, ctx)?;
            }
        }
        Ok(())
    }

    fn check_range_table_entry(
        &self,
        rte: &RangeTblEntry,
        ctx: &mut RestrictionContext,
    ) -> Result<(), ImmvError> {
        match &rte.kind {
            RteKind::Relation {
                relid,
                relkind,
                tablesample,
            } => {
                if tablesample.is_some() {
                    return Err(unsupported(UnsupportedConstruct::TableSample));
                }
                match relkind {
                    RelKind::PartitionedTable => {
                        return Err(unsupported(UnsupportedConstruct::PartitionedTable));
                    }
                    RelKind::Relation => {
                        if self.catalog.has_superclass(*relid)? {
                            return Err(unsupported(UnsupportedConstruct::Partition));
                        }
                        if self.catalog.has_inheritance_children(*relid)? {
                            return Err(unsupported(UnsupportedConstruct::InheritanceParent));
                        }
                    }
                    RelKind::ForeignTable => {
                        return Err(unsupported(UnsupportedConstruct::ForeignTable));
                    }
                    RelKind::View | RelKind::MatView => {
                        return Err(unsupported(UnsupportedConstruct::ViewSource));
                    }
                    RelKind::Other => {}
                }
            }
            RteKind::Values { .. } => return Err(unsupported(UnsupportedConstruct::Values)),
            RteKind::Subquery { subquery } if subquery.origin == QueryOrigin::ExistsSubLink => {
                self.check_exists_subquery(subquery, ctx)?;
                ctx.has_subquery = true;
            }
            RteKind::Subquery { subquery } => {
                if ctx.has_outerjoin {
                    return Err(unsupported(UnsupportedConstruct::SubqueryWithOuterJoin));
                }
                ctx.has_subquery = true;
                ctx.sublevels_up += 1;
                self.check_query(subquery, ctx)?;
                ctx.sublevels_up -= 1;
            }
            RteKind::Join { .. } | RteKind::Function { .. } | RteKind::Cte { .. } => {}
        }
        Ok(())
    }

    // ── Target list, join tree, CTEs ────────────────────────────────────

    fn check_target_entry(
        &self,
        tle: &TargetEntry,
        ctx: &mut RestrictionContext,
    ) -> Result<(), ImmvError> {
        if tle.origin == ColumnOrigin::User
            && let Some(name) = tle.resname.as_deref()
            && is_ivm_name(name)
        {
            return Err(ImmvError::ReservedColumnName(name.to_string()));
        }
        if ctx.has_agg && !tle.expr.is_aggref() && contain_aggs_of_level(&tle.expr, 0) {
            return Err(unsupported(UnsupportedConstruct::AggregateInExpression));
        }
        if matches!(tle.expr, Expr::SubLink(_)) {
            return Err(unsupported(UnsupportedConstruct::SubqueryInTargetList));
        }
        self.check_expr(&tle.expr, ctx)
    }

    fn check_from_expr(&self, from: &FromExpr, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        for node in &from.fromlist {
            self.check_jointree_node(node, ctx)?;
        }
        if let Some(quals) = &from.quals {
            self.check_expr(quals, ctx)?;
        }
        Ok(())
    }

    fn check_jointree_node(
        &self,
        node: &JoinTreeNode,
        ctx: &mut RestrictionContext,
    ) -> Result<(), ImmvError> {
        self.descend(ctx, |this, ctx| match node {
            JoinTreeNode::RangeTblRef(_) => Ok(()),
            JoinTreeNode::Join(join) => this.check_join_expr(join, ctx),
            JoinTreeNode::From(from) => this.check_from_expr(from, ctx),
        })
    }

    fn check_join_expr(&self, join: &JoinExpr, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        if join.jointype.is_outer() {
            if ctx.has_subquery {
                return Err(unsupported(UnsupportedConstruct::SubqueryWithOuterJoin));
            }
            if ctx.has_agg {
                return Err(unsupported(UnsupportedConstruct::AggregateWithOuterJoin));
            }
            ctx.has_outerjoin = true;
            ctx.join_quals.push(join.quals.clone());
        }
        self.check_jointree_node(&join.larg, ctx)?;
        self.check_jointree_node(&join.rarg, ctx)?;
        if let Some(quals) = &join.quals {
            self.check_expr(quals, ctx)?;
        }
        Ok(())
    }

    fn check_cte(&self, cte: &CommonTableExpr, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        if is_ivm_name(&cte.ctename) {
            return Err(ImmvError::ReservedCteName(cte.ctename.clone()));
        }
        ctx.sublevels_up += 1;
        self.check_query(&cte.ctequery, ctx)?;
        ctx.sublevels_up -= 1;
        Ok(())
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn check_expr(&self, expr: &Expr, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        self.descend(ctx, |this, ctx| this.check_expr_inner(expr, ctx))
    }

    fn check_expr_inner(&self, expr: &Expr, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        match expr {
            Expr::Var(var) => {
                if var.varlevelsup > 0 && ctx.in_exists_subquery {
                    ctx.exists_qual_vars.push(*var);
                }
                Ok(())
            }
            Expr::SubLink(sublink) => self.check_sublink(sublink, ctx),
            Expr::Aggref(aggref) => self.check_aggref(aggref),
            _ => {
                for child in expr.children() {
                    self.check_expr(child, ctx)?;
                }
                Ok(())
            }
        }
    }

    fn check_sublink(&self, sublink: &SubLink, ctx: &mut RestrictionContext) -> Result<(), ImmvError> {
        if sublink.sublink_type != SubLinkType::Exists {
            return Err(unsupported(UnsupportedConstruct::NonExistsSubLink));
        }
        self.check_exists_subquery(&sublink.subselect, ctx)
    }

    /// Rules shared by EXISTS sublinks and their LATERAL rewrites.
    fn check_exists_subquery(
        &self,
        subselect: &Query,
        ctx: &mut RestrictionContext,
    ) -> Result<(), ImmvError> {
        if ctx.sublevels_up > 0 {
            return Err(unsupported(UnsupportedConstruct::NestedSubquery));
        }
        if ctx.has_outerjoin {
            return Err(unsupported(UnsupportedConstruct::ExistsWithOuterJoin));
        }
        ctx.in_exists_subquery = true;
        ctx.sublevels_up += 1;
        self.check_query(subselect, ctx)?;
        ctx.sublevels_up -= 1;
        ctx.in_exists_subquery = false;
        Ok(())
    }

    fn check_aggref(&self, aggref: &Aggref) -> Result<(), ImmvError> {
        if aggref.aggfilter.is_some() {
            return Err(unsupported(UnsupportedConstruct::AggregateFilter));
        }
        if !aggref.aggdistinct.is_empty() {
            return Err(unsupported(UnsupportedConstruct::AggregateDistinct));
        }
        if !aggref.aggorder.is_empty() {
            return Err(unsupported(UnsupportedConstruct::AggregateOrder));
        }
        if !aggregate::is_supported(aggref.aggfnoid) {
            let name = self.catalog.format_procedure(aggref.aggfnoid);
            return Err(unsupported(UnsupportedConstruct::Aggregate(name)));
        }
        Ok(())
    }

    // ── Top-level checks ────────────────────────────────────────────────

    /// Every upper-level var referenced inside EXISTS must be projected.
    fn check_exists_vars(&self, qry: &Query, ctx: &RestrictionContext) -> Result<(), ImmvError> {
        for var in &ctx.exists_qual_vars {
            let found = qry
                .target_list
                .iter()
                .filter_map(|tle| tle.expr.as_var())
                .any(|v| v.same_column(var));
            if !found {
                return Err(unsupported(UnsupportedConstruct::ExistsVarNotInTargetList));
            }
        }
        Ok(())
    }

    fn check_outer_join_query(
        &self,
        qry: &Query,
        ctx: &RestrictionContext,
    ) -> Result<(), ImmvError> {
        let mut qual_vars: Vec<Var> = Vec::new();
        let mut nonnullable_vars: Vec<Var> = Vec::new();
        for qual in &ctx.join_quals {
            let Some(qual) = qual else {
                return Err(unsupported(UnsupportedConstruct::NonEquijoinCondition));
            };
            if !is_equijoin_condition(self.catalog, qual)? {
                return Err(unsupported(UnsupportedConstruct::NonEquijoinCondition));
            }
            let flattened = flatten_join_alias_vars(qry, qual);
            qual_vars.extend(pull_vars_of_level(&flattened, 0));
            nonnullable_vars.extend(find_nonnullable_vars(&flattened));
        }

        let projected: Vec<Var> = qry
            .target_list
            .iter()
            .filter(|tle| matches!(tle.expr, Expr::Var(_)))
            .filter_map(|tle| match flatten_join_alias_vars(qry, &tle.expr) {
                Expr::Var(v) => Some(v),
                _ => None,
            })
            .collect();
        for var in &qual_vars {
            if !projected.iter().any(|p| p.same_column(var)) {
                return Err(unsupported(UnsupportedConstruct::JoinVarNotInTargetList));
            }
        }

        if let Some(where_quals) = &qry.jointree.quals {
            let where_vars = pull_vars_of_level(&flatten_join_alias_vars(qry, where_quals), 0);
            if where_vars
                .iter()
                .any(|v| !nonnullable_vars.iter().any(|n| n.same_column(v)))
            {
                return Err(unsupported(UnsupportedConstruct::NonNullRejectingWhere));
            }
        }

        if qry
            .target_list
            .iter()
            .any(|tle| contain_nonstrict_functions(&tle.expr))
        {
            return Err(unsupported(UnsupportedConstruct::NonStrictTargetList));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::{INT4_OID, OperatorJoinInfo};
    use crate::dvm::expr::{NullTest, NullTestType};
    use crate::dvm::query::*;
    use crate::dvm::test_helpers::*;

    fn check(q: &Query) -> Result<(), ImmvError> {
        let cat = MemoryCatalog::new();
        check_ivm_restriction(&cat, &ImmvConfig::default(), q)
    }

    fn assert_unsupported(q: &Query, expected: UnsupportedConstruct) {
        match check(q) {
            Err(ImmvError::Unsupported(c)) => assert_eq!(c, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }

    fn simple() -> Query {
        select_from(
            &[rel(10, "t", &["a", "b"])],
            vec![tle(var(1, 1), 1, "a"), tle(var(1, 2), 2, "b")],
        )
    }

    // ── Accepted shapes ─────────────────────────────────────────────────

    #[test]
    fn test_simple_select_accepted() {
        assert!(check(&simple()).is_ok());
    }

    #[test]
    fn test_group_by_count_accepted() {
        let q = group_by(
            select_from(
                &[rel(10, "t", &["a"])],
                vec![tle(var(1, 1), 1, "a"), tle(count_star(), 2, "count")],
            ),
            &[1],
        );
        assert!(check(&q).is_ok());
    }

    #[test]
    fn test_left_join_accepted() {
        assert!(check(&left_join_query()).is_ok());
    }

    #[test]
    fn test_exists_with_projected_correlation_accepted() {
        let q = exists_query(true);
        assert!(check(&q).is_ok());
    }

    #[test]
    fn test_inner_join_subquery_accepted() {
        let sub = select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]);
        let q = select_from(
            &[
                rel(10, "t", &["a"]),
                RangeTblEntry::subquery(sub, "sq", false),
            ],
            vec![tle(var(1, 1), 1, "a"), tle(var(2, 1), 2, "x")],
        );
        assert!(check(&q).is_ok());
    }

    // ── Query-level clauses ─────────────────────────────────────────────

    #[test]
    fn test_having_rejected() {
        let mut q = group_by(
            select_from(
                &[rel(10, "t", &["a"])],
                vec![tle(var(1, 1), 1, "a"), tle(count_star(), 2, "count")],
            ),
            &[1],
        );
        q.having_qual = Some(op_gt(count_star(), int4(1)));
        assert_unsupported(&q, UnsupportedConstruct::Having);
    }

    #[test]
    fn test_clause_order_having_before_order_by() {
        let mut q = simple();
        q.having_qual = Some(op_gt(count_star(), int4(1)));
        q.sort_clause = vec![sort_clause(1)];
        assert_unsupported(&q, UnsupportedConstruct::Having);
    }

    #[test]
    fn test_order_by_rejected() {
        let mut q = simple();
        q.sort_clause = vec![sort_clause(1)];
        assert_unsupported(&q, UnsupportedConstruct::OrderBy);
    }

    #[test]
    fn test_limit_rejected() {
        let mut q = simple();
        q.limit_count = Some(int4(10));
        assert_unsupported(&q, UnsupportedConstruct::LimitOffset);
    }

    #[test]
    fn test_distinct_on_rejected() {
        let mut q = simple();
        q.has_distinct_on = true;
        assert_unsupported(&q, UnsupportedConstruct::DistinctOn);
    }

    #[test]
    fn test_window_functions_rejected() {
        let mut q = simple();
        q.has_window_funcs = true;
        assert_unsupported(&q, UnsupportedConstruct::WindowFunctions);
    }

    #[test]
    fn test_grouping_sets_rejected() {
        let mut q = simple();
        q.grouping_sets = vec![GroupingSet {
            kind: GroupingSetKind::Rollup,
            refs: vec![1],
        }];
        assert_unsupported(&q, UnsupportedConstruct::GroupingSets);
    }

    #[test]
    fn test_set_operations_rejected() {
        let mut q = simple();
        q.set_operations = Some(SetOperation {
            op: SetOpKind::Union,
            all: true,
        });
        assert_unsupported(&q, UnsupportedConstruct::SetOperations);
    }

    #[test]
    fn test_empty_target_list_rejected() {
        let q = select_from(&[rel(10, "t", &["a"])], vec![]);
        assert_unsupported(&q, UnsupportedConstruct::EmptyTargetList);
    }

    #[test]
    fn test_row_marks_rejected() {
        let mut q = simple();
        q.row_marks = vec![RowMark {
            rti: 1,
            strength: LockStrength::Update,
        }];
        assert_unsupported(&q, UnsupportedConstruct::RowMarks);
    }

    #[test]
    fn test_recursive_cte_rejected() {
        let mut q = simple();
        q.has_recursive = true;
        assert_unsupported(&q, UnsupportedConstruct::RecursiveCte);
    }

    #[test]
    fn test_system_column_rejected() {
        let q = select_from(&[rel(10, "t", &["a"])], vec![tle(var(1, -1), 1, "ctid")]);
        assert_unsupported(&q, UnsupportedConstruct::SystemColumn);
    }

    #[test]
    fn test_system_column_in_where_rejected() {
        let q = with_where(simple(), op_eq(var(1, -3), int4(1)));
        assert_unsupported(&q, UnsupportedConstruct::SystemColumn);
    }

    // ── Range-table sources ─────────────────────────────────────────────

    #[test]
    fn test_tablesample_rejected() {
        let mut q = simple();
        if let RteKind::Relation { tablesample, .. } = &mut q.rtable[0].kind {
            *tablesample = Some(TableSample {
                tsmhandler: 3313,
                args: vec![int4(10)],
                repeatable: None,
            });
        }
        assert_unsupported(&q, UnsupportedConstruct::TableSample);
    }

    #[test]
    fn test_relkind_sources_rejected() {
        for (kind, expected) in [
            (RelKind::PartitionedTable, UnsupportedConstruct::PartitionedTable),
            (RelKind::ForeignTable, UnsupportedConstruct::ForeignTable),
            (RelKind::View, UnsupportedConstruct::ViewSource),
            (RelKind::MatView, UnsupportedConstruct::ViewSource),
        ] {
            let mut q = simple();
            if let RteKind::Relation { relkind, .. } = &mut q.rtable[0].kind {
                *relkind = kind;
            }
            assert_unsupported(&q, expected);
        }
    }

    #[test]
    fn test_partition_and_inheritance_parent_rejected() {
        let mut cat = MemoryCatalog::new();
        let parent = cat.add_table("p", &[("a", INT4_OID)]);
        let child = cat.add_table("c", &[("a", INT4_OID)]);
        cat.set_parent(child, parent);

        let q = select_from(&[rel(child, "c", &["a"])], vec![tle(var(1, 1), 1, "a")]);
        let err = check_ivm_restriction(&cat, &ImmvConfig::default(), &q).unwrap_err();
        assert!(matches!(
            err,
            ImmvError::Unsupported(UnsupportedConstruct::Partition)
        ));

        let q = select_from(&[rel(parent, "p", &["a"])], vec![tle(var(1, 1), 1, "a")]);
        let err = check_ivm_restriction(&cat, &ImmvConfig::default(), &q).unwrap_err();
        assert!(matches!(
            err,
            ImmvError::Unsupported(UnsupportedConstruct::InheritanceParent)
        ));
    }

    #[test]
    fn test_values_rejected() {
        let mut q = simple();
        q.rtable.push(RangeTblEntry {
            kind: RteKind::Values {
                rows: vec![vec![int4(1)]],
            },
            eref: "*VALUES*".into(),
            colnames: vec!["column1".into()],
            lateral: false,
            in_from_cl: true,
        });
        assert_unsupported(&q, UnsupportedConstruct::Values);
    }

    // ── Nesting ─────────────────────────────────────────────────────────

    #[test]
    fn test_nested_distinct_rejected() {
        let sub = distinct(select_from(
            &[rel(20, "s", &["x"])],
            vec![tle(var(1, 1), 1, "x")],
        ));
        let q = select_from(
            &[RangeTblEntry::subquery(sub, "sq", false)],
            vec![tle(var(1, 1), 1, "x")],
        );
        assert_unsupported(&q, UnsupportedConstruct::NestedDistinct);
    }

    #[test]
    fn test_nested_aggregate_rejected() {
        let sub = select_from(&[rel(20, "s", &["x"])], vec![tle(count_star(), 1, "c")]);
        let q = select_from(
            &[RangeTblEntry::subquery(sub, "sq", false)],
            vec![tle(var(1, 1), 1, "c")],
        );
        assert_unsupported(&q, UnsupportedConstruct::NestedAggregate);
    }

    #[test]
    fn test_aggregate_in_cte_rejected() {
        let cte_body = select_from(&[rel(20, "s", &["x"])], vec![tle(count_star(), 1, "c")]);
        let q = with_cte(simple(), "w", cte_body);
        assert_unsupported(&q, UnsupportedConstruct::NestedAggregate);
    }

    #[test]
    fn test_reserved_cte_name_rejected() {
        let cte_body = select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]);
        let q = with_cte(simple(), "__ivm_w", cte_body);
        assert!(matches!(
            check(&q),
            Err(ImmvError::ReservedCteName(name)) if name == "__ivm_w"
        ));
    }

    // ── Target list ─────────────────────────────────────────────────────

    #[test]
    fn test_reserved_column_name_rejected() {
        let q = select_from(&[rel(10, "t", &["a"])], vec![tle(var(1, 1), 1, "__ivm_a")]);
        let err = check(&q).unwrap_err();
        assert!(err.is_naming_conflict());
        assert_eq!(
            err.to_string(),
            "column name __ivm_a is not supported on incrementally maintainable materialized view"
        );
    }

    #[test]
    fn test_bookkeeping_column_name_allowed() {
        let mut q = simple();
        q.target_list
            .push(TargetEntry::bookkeeping(var(1, 1), 3, "__ivm_x__"));
        assert!(check(&q).is_ok());
    }

    #[test]
    fn test_expression_wrapping_aggregate_rejected() {
        let q = group_by(
            select_from(
                &[rel(10, "t", &["a"])],
                vec![
                    tle(var(1, 1), 1, "a"),
                    tle(func("abs", vec![sum_int4(var(1, 1))], true), 2, "s"),
                ],
            ),
            &[1],
        );
        assert_unsupported(&q, UnsupportedConstruct::AggregateInExpression);
    }

    #[test]
    fn test_sublink_in_target_list_rejected() {
        let sub = select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]);
        let mut q = simple();
        q.target_list.push(tle(exists(sub), 3, "e"));
        q.has_sublinks = true;
        assert_unsupported(&q, UnsupportedConstruct::SubqueryInTargetList);
    }

    // ── Aggregates ──────────────────────────────────────────────────────

    fn agg_query(aggref: Aggref) -> Query {
        group_by(
            select_from(
                &[rel(10, "t", &["a"])],
                vec![tle(var(1, 1), 1, "a"), tle(Expr::Aggref(Box::new(aggref)), 2, "x")],
            ),
            &[1],
        )
    }

    fn sum_aggref() -> Aggref {
        match sum_int4(var(1, 1)) {
            Expr::Aggref(a) => *a,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_aggregate_filter_rejected() {
        let mut a = sum_aggref();
        a.aggfilter = Some(op_gt(var(1, 1), int4(0)));
        assert_unsupported(&agg_query(a), UnsupportedConstruct::AggregateFilter);
    }

    #[test]
    fn test_aggregate_distinct_rejected() {
        let mut a = sum_aggref();
        a.aggdistinct = vec![sort_clause(1)];
        assert_unsupported(&agg_query(a), UnsupportedConstruct::AggregateDistinct);
    }

    #[test]
    fn test_aggregate_order_rejected() {
        let mut a = sum_aggref();
        a.aggorder = vec![sort_clause(1)];
        assert_unsupported(&agg_query(a), UnsupportedConstruct::AggregateOrder);
    }

    #[test]
    fn test_unlisted_aggregate_rejected_with_signature() {
        let mut a = sum_aggref();
        a.aggfnoid = 2517; // bool_and
        let mut cat = MemoryCatalog::new();
        cat.set_proc_name(2517, "bool_and(boolean)");
        let err = check_ivm_restriction(&cat, &ImmvConfig::default(), &agg_query(a)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "aggregate function bool_and(boolean) is not supported on incrementally maintainable materialized view"
        );
    }

    // ── Sublinks ────────────────────────────────────────────────────────

    #[test]
    fn test_non_exists_sublink_rejected() {
        let sub = select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]);
        let mut link = exists(sub);
        if let Expr::SubLink(s) = &mut link {
            s.sublink_type = SubLinkType::Any;
            s.testexpr = Some(var(1, 1));
        }
        let q = with_where(simple(), link);
        assert_unsupported(&q, UnsupportedConstruct::NonExistsSubLink);
    }

    #[test]
    fn test_exists_var_not_projected_rejected() {
        let q = exists_query(false);
        assert_unsupported(&q, UnsupportedConstruct::ExistsVarNotInTargetList);
    }

    #[test]
    fn test_nested_exists_rejected() {
        let innermost = select_from(&[rel(30, "u", &["y"])], vec![tle(var(1, 1), 1, "y")]);
        let middle = with_where(
            select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]),
            exists(innermost),
        );
        let q = with_where(simple(), exists(middle));
        assert_unsupported(&q, UnsupportedConstruct::NestedSubquery);
    }

    #[test]
    fn test_exists_in_from_subquery_rejected() {
        let inner = select_from(&[rel(30, "u", &["y"])], vec![tle(var(1, 1), 1, "y")]);
        let sub = with_where(
            select_from(&[rel(20, "s", &["x"])], vec![tle(var(1, 1), 1, "x")]),
            exists(inner),
        );
        let q = select_from(
            &[RangeTblEntry::subquery(sub, "sq", false)],
            vec![tle(var(1, 1), 1, "x")],
        );
        assert_unsupported(&q, UnsupportedConstruct::NestedSubquery);
    }

    #[test]
    fn test_exists_with_outer_join_rejected() {
        let sub = select_from(&[rel(30, "u", &["y"])], vec![tle(var(1, 1), 1, "y")]);
        let q = with_where(left_join_query(), exists(sub));
        assert_unsupported(&q, UnsupportedConstruct::ExistsWithOuterJoin);
    }

    // ── Outer joins ─────────────────────────────────────────────────────

    #[test]
    fn test_outer_join_with_aggregate_rejected() {
        let mut q = left_join_query();
        q.target_list.push(tle(count_star(), 4, "c"));
        q.has_aggs = true;
        assert_unsupported(&q, UnsupportedConstruct::AggregateWithOuterJoin);
    }

    #[test]
    fn test_outer_join_after_subquery_rejected() {
        let mut q = left_join_query();
        let sub = select_from(&[rel(30, "u", &["y"])], vec![tle(var(1, 1), 1, "y")]);
        q.rtable.push(RangeTblEntry::subquery(sub, "sq", false));
        q.jointree.fromlist.push(JoinTreeNode::RangeTblRef(4));
        assert_unsupported(&q, UnsupportedConstruct::SubqueryWithOuterJoin);
    }

    #[test]
    fn test_outer_join_non_equijoin_rejected() {
        let mut q = left_join_query();
        set_join_quals(&mut q, op_gt(var(1, 2), var(2, 1)));
        assert_unsupported(&q, UnsupportedConstruct::NonEquijoinCondition);
    }

    #[test]
    fn test_outer_join_conjunctive_quals_rejected() {
        let mut q = left_join_query();
        set_join_quals(
            &mut q,
            and(vec![op_eq(var(1, 2), var(2, 1)), op_eq(var(1, 1), var(2, 2))]),
        );
        assert_unsupported(&q, UnsupportedConstruct::NonEquijoinCondition);
    }

    #[test]
    fn test_outer_join_hashjoinable_only_accepted() {
        let mut cat = MemoryCatalog::new();
        cat.set_operator(
            7001,
            OperatorJoinInfo {
                mergejoinable: false,
                has_mergejoin_opfamilies: false,
                hashjoinable: true,
            },
        );
        let mut q = left_join_query();
        set_join_quals(&mut q, op_with(7001, var(1, 2), var(2, 1)));
        assert!(check_ivm_restriction(&cat, &ImmvConfig::default(), &q).is_ok());
    }

    #[test]
    fn test_outer_join_var_missing_from_target_list_rejected() {
        let mut q = left_join_query();
        // drop t2.k from the projection
        q.target_list.truncate(2);
        assert_unsupported(&q, UnsupportedConstruct::JoinVarNotInTargetList);
    }

    #[test]
    fn test_outer_join_var_projected_through_join_alias_accepted() {
        let mut q = left_join_query();
        // project the join's alias var for t2.k (alias column 3)
        q.target_list[2].expr = var(3, 3);
        assert!(check(&q).is_ok());
    }

    #[test]
    fn test_outer_join_where_outside_nonnullable_set_rejected() {
        let q = with_where(left_join_query(), op_gt(var(2, 2), int4(5)));
        assert_unsupported(&q, UnsupportedConstruct::NonNullRejectingWhere);
    }

    #[test]
    fn test_outer_join_where_on_join_key_accepted() {
        let q = with_where(left_join_query(), op_gt(var(2, 1), int4(5)));
        assert!(check(&q).is_ok());
    }

    #[test]
    fn test_outer_join_nonstrict_target_rejected() {
        let mut q = left_join_query();
        q.target_list
            .push(tle(coalesce(vec![var(2, 2), int4(0)]), 4, "v"));
        assert_unsupported(&q, UnsupportedConstruct::NonStrictTargetList);
    }

    #[test]
    fn test_outer_join_null_test_in_target_rejected() {
        let mut q = left_join_query();
        q.target_list.push(tle(
            Expr::NullTest(Box::new(NullTest {
                arg: var(2, 2),
                nulltesttype: NullTestType::IsNull,
            })),
            4,
            "missing",
        ));
        assert_unsupported(&q, UnsupportedConstruct::NonStrictTargetList);
    }

    // ── Mutability and limits ───────────────────────────────────────────

    #[test]
    fn test_check_mutability() {
        assert!(check_mutability(&simple()).is_ok());
        let q = with_where(simple(), op_gt(var(1, 1), volatile_func("random")));
        assert!(matches!(
            check_mutability(&q),
            Err(ImmvError::Unsupported(UnsupportedConstruct::MutableFunction))
        ));
    }

    #[test]
    fn test_recursion_limit() {
        let mut expr = var(1, 1);
        for _ in 0..40 {
            expr = func("abs", vec![expr], true);
        }
        let q = select_from(&[rel(10, "t", &["a"])], vec![tle(expr, 1, "a")]);
        let cat = MemoryCatalog::new();
        let config = ImmvConfig {
            max_tree_depth: 16,
            ..ImmvConfig::default()
        };
        assert!(matches!(
            check_ivm_restriction(&cat, &config, &q),
            Err(ImmvError::RecursionLimit(16))
        ));
        assert!(check_ivm_restriction(&cat, &ImmvConfig::default(), &q).is_ok());
    }
}
