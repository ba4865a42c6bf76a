//! Error types for pg_immv.
//!
//! All errors raised while defining an incrementally maintainable
//! materialized view are represented by [`ImmvError`]. Errors propagate via
//! `Result<T, ImmvError>`; the host converts them into its own error reports
//! using [`ImmvError::sqlstate`] and [`ImmvError::hint`].
//!
//! # Error Classification
//!
//! - **User** — the view definition uses a construct incremental
//!   maintenance cannot handle, or collides with a reserved name.
//! - **Schema** — the column list cannot be built (too many names, no
//!   derivable collation).
//! - **System** — a collaborator (catalog, executor, storage) failed.
//! - **Internal** — an invariant of the creation pipeline was violated.
//!
//! Nothing in this crate retries. Every failure aborts view creation and
//! the enclosing transaction undoes any catalog changes made so far.

use std::fmt;

/// Prefix reserved for bookkeeping columns and internal identifiers.
pub const IVM_NAME_PREFIX: &str = "__ivm_";

/// Returns true when `name` collides with the reserved bookkeeping prefix.
pub fn is_ivm_name(name: &str) -> bool {
    name.starts_with(IVM_NAME_PREFIX)
}

/// A query construct that incremental maintenance cannot support.
///
/// Each variant renders to the exact diagnostic text reported to the user;
/// the variants reported as "this query is not allowed" carry a hint that
/// names the offending shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedConstruct {
    // ── Query-level clauses ──────────────────────────────────────────────
    #[error("HAVING clause is not supported on incrementally maintainable materialized view")]
    Having,

    #[error("ORDER BY clause is not supported on incrementally maintainable materialized view")]
    OrderBy,

    #[error("LIMIT/OFFSET clause is not supported on incrementally maintainable materialized view")]
    LimitOffset,

    #[error("DISTINCT ON is not supported on incrementally maintainable materialized view")]
    DistinctOn,

    #[error("window functions are not supported on incrementally maintainable materialized view")]
    WindowFunctions,

    #[error(
        "GROUPING SETS, ROLLUP, or CUBE clauses is not supported on incrementally maintainable materialized view"
    )]
    GroupingSets,

    #[error(
        "UNION/INTERSECT/EXCEPT statements are not supported on incrementally maintainable materialized view"
    )]
    SetOperations,

    #[error("empty target list is not supported on incrementally maintainable materialized view")]
    EmptyTargetList,

    #[error("FOR UPDATE/SHARE clause is not supported on incrementally maintainable materialized view")]
    RowMarks,

    #[error("recursive CTE is not supported on incrementally maintainable materialized view")]
    RecursiveCte,

    #[error("system column is not supported on incrementally maintainable materialized view")]
    SystemColumn,

    // ── Nesting ──────────────────────────────────────────────────────────
    #[error(
        "DISTINCT clause in nested query are not supported on incrementally maintainable materialized view"
    )]
    NestedDistinct,

    #[error(
        "aggregate functions in nested query are not supported on incrementally maintainable materialized view"
    )]
    NestedAggregate,

    #[error("nested subquery is not supported on incrementally maintainable materialized view")]
    NestedSubquery,

    // ── Range-table sources ──────────────────────────────────────────────
    #[error("TABLESAMPLE clause is not supported on incrementally maintainable materialized view")]
    TableSample,

    #[error("partitioned table is not supported on incrementally maintainable materialized view")]
    PartitionedTable,

    #[error("partitions is not supported on incrementally maintainable materialized view")]
    Partition,

    #[error("inheritance parent is not supported on incrementally maintainable materialized view")]
    InheritanceParent,

    #[error("foreign table is not supported on incrementally maintainable materialized view")]
    ForeignTable,

    #[error(
        "VIEW or MATERIALIZED VIEW is not supported on incrementally maintainable materialized view"
    )]
    ViewSource,

    #[error("VALUES is not supported on incrementally maintainable materialized view")]
    Values,

    // ── Aggregates ───────────────────────────────────────────────────────
    #[error(
        "expression containing an aggregate in it is not supported on incrementally maintainable materialized view"
    )]
    AggregateInExpression,

    #[error(
        "aggregate function with FILTER clause is not supported on incrementally maintainable materialized view"
    )]
    AggregateFilter,

    #[error(
        "aggregate function with DISTINCT arguments is not supported on incrementally maintainable materialized view"
    )]
    AggregateDistinct,

    #[error(
        "aggregate function with ORDER clause is not supported on incrementally maintainable materialized view"
    )]
    AggregateOrder,

    /// The aggregate is not on the allow-list; carries its display signature.
    #[error("aggregate function {0} is not supported on incrementally maintainable materialized view")]
    Aggregate(String),

    #[error(
        "GROUP BY expression not appearing in select list is not supported on incrementally maintainable materialized view"
    )]
    GroupByNotInSelectList,

    #[error("mutable function is not supported on incrementally maintainable materialized view")]
    MutableFunction,

    // ── Query shapes (generic message + hint) ────────────────────────────
    #[error("this query is not allowed on incrementally maintainable materialized view")]
    SubqueryWithOuterJoin,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    AggregateWithOuterJoin,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    SubqueryInTargetList,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    NonExistsSubLink,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    ExistsWithOuterJoin,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    ExistsVarNotInTargetList,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    NonEquijoinCondition,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    JoinVarNotInTargetList,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    NonNullRejectingWhere,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    NonStrictTargetList,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    ExistsUnderOrNot,

    #[error("this query is not allowed on incrementally maintainable materialized view")]
    ExistsOutsideWhereConjunction,
}

impl UnsupportedConstruct {
    /// Hint text accompanying the diagnostic, when there is one.
    pub fn hint(&self) -> Option<&'static str> {
        use UnsupportedConstruct::*;
        match self {
            MutableFunction => Some("functions must be marked IMMUTABLE"),
            SubqueryWithOuterJoin => Some("subquery or CTE is not supported with outer join"),
            AggregateWithOuterJoin => Some("aggregate is not supported with outer join"),
            SubqueryInTargetList => Some("subquery is not supported in targetlist"),
            NonExistsSubLink => {
                Some("subquery in WHERE clause only supports subquery with EXISTS clause")
            }
            ExistsWithOuterJoin => Some("subquery with outer join is not supported"),
            ExistsVarNotInTargetList => {
                Some("targetlist must contain vars that are referred to in EXISTS subquery")
            }
            NonEquijoinCondition => Some("Only simple equijoin is supported with outer join"),
            JoinVarNotInTargetList => {
                Some("targetlist must contain vars in the join condition with outer join")
            }
            NonNullRejectingWhere => {
                Some("WHERE cannot contain non null-rejecting predicates with outer join")
            }
            NonStrictTargetList => {
                Some("targetlist cannot contain non strict functions with outer join")
            }
            ExistsUnderOrNot => {
                Some("OR or NOT conditions and EXISTS condition are not used together")
            }
            ExistsOutsideWhereConjunction => {
                Some("EXISTS is only supported at the top level of WHERE or inside AND")
            }
            _ => None,
        }
    }
}

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum ImmvError {
    // ── User errors ──────────────────────────────────────────────────────
    /// The view definition uses a construct incremental maintenance cannot handle.
    #[error(transparent)]
    Unsupported(#[from] UnsupportedConstruct),

    /// A user column name collides with the reserved bookkeeping prefix.
    #[error("column name {0} is not supported on incrementally maintainable materialized view")]
    ReservedColumnName(String),

    /// A CTE name collides with the reserved bookkeeping prefix.
    #[error("CTE name {0} is not supported on incrementally maintainable materialized view")]
    ReservedCteName(String),

    /// The target relation already exists and IF NOT EXISTS was not given.
    #[error("relation \"{0}\" already exists")]
    DuplicateRelation(String),

    /// Row-level security would apply to the newly created relation.
    #[error("policies not yet implemented for this command")]
    RowSecurityNotSupported,

    /// The query tree nests deeper than the configured limit.
    #[error("query tree nesting exceeds the limit of {0} levels")]
    RecursionLimit(usize),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Schema errors ────────────────────────────────────────────────────
    /// More explicit column names than output columns.
    #[error("too many column names were specified")]
    TooManyColumnNames,

    /// A collatable column has no derivable collation.
    #[error("no collation was derived for column \"{column}\" with collatable type {type_name}")]
    IndeterminateCollation { column: String, type_name: String },

    // ── System errors ────────────────────────────────────────────────────
    /// A catalog lookup or DDL call failed.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The executor or table storage failed.
    #[error("executor error: {0}")]
    Executor(String),

    // ── Internal errors ──────────────────────────────────────────────────
    /// An invariant of the creation pipeline was violated. Indicates a bug.
    #[error("{0}")]
    InternalInvariantViolation(String),
}

/// Classification of error kind for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmvErrorKind {
    User,
    Schema,
    System,
    Internal,
}

impl fmt::Display for ImmvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImmvErrorKind::User => write!(f, "USER"),
            ImmvErrorKind::Schema => write!(f, "SCHEMA"),
            ImmvErrorKind::System => write!(f, "SYSTEM"),
            ImmvErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl ImmvError {
    /// Classify the error.
    pub fn kind(&self) -> ImmvErrorKind {
        match self {
            ImmvError::Unsupported(_)
            | ImmvError::ReservedColumnName(_)
            | ImmvError::ReservedCteName(_)
            | ImmvError::DuplicateRelation(_)
            | ImmvError::RowSecurityNotSupported
            | ImmvError::RecursionLimit(_)
            | ImmvError::InvalidConfig(_) => ImmvErrorKind::User,

            ImmvError::TooManyColumnNames | ImmvError::IndeterminateCollation { .. } => {
                ImmvErrorKind::Schema
            }

            ImmvError::Catalog(_) | ImmvError::Executor(_) => ImmvErrorKind::System,

            ImmvError::InternalInvariantViolation(_) => ImmvErrorKind::Internal,
        }
    }

    /// Whether this is a reserved-prefix collision.
    pub fn is_naming_conflict(&self) -> bool {
        matches!(
            self,
            ImmvError::ReservedColumnName(_) | ImmvError::ReservedCteName(_)
        )
    }

    /// Hint text for the host's error report.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ImmvError::Unsupported(construct) => construct.hint(),
            ImmvError::IndeterminateCollation { .. } => {
                Some("Use the COLLATE clause to set the collation explicitly.")
            }
            _ => None,
        }
    }

    /// Five-character SQLSTATE the host should report.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ImmvError::Unsupported(_)
            | ImmvError::ReservedColumnName(_)
            | ImmvError::ReservedCteName(_)
            | ImmvError::RowSecurityNotSupported => "0A000",
            ImmvError::DuplicateRelation(_) => "42P07",
            ImmvError::TooManyColumnNames => "42601",
            ImmvError::IndeterminateCollation { .. } => "42P22",
            ImmvError::RecursionLimit(_) => "54001",
            ImmvError::InvalidConfig(_) => "22023",
            ImmvError::Catalog(_) | ImmvError::Executor(_) => "58000",
            ImmvError::InternalInvariantViolation(_) => "XX000",
        }
    }
}
