//! View-definition analysis for incremental view maintenance.
//!
//! Everything here is pure: functions take an analyzed [`Query`] plus, where
//! needed, read-only catalog access, and either reject the query or return
//! a new tree. Nothing in this module writes to the catalog.
//!
//! # Theoretical Basis
//!
//! - **Gupta & Mumick (1995)**: "Maintenance of Materialized Views: Problems,
//!   Techniques, and Applications." IEEE Data Engineering Bulletin, 18(2).
//!   The counting algorithm of section 4 is why aggregating and DISTINCT
//!   views carry a hidden row count per output row.
//!
//! - **Larson & Zhou (2007)**: "Efficient Maintenance of Materialized
//!   Outer-Join Views." ICDE 2007. Motivates the restriction of outer joins
//!   to simple equijoins with projected join columns and strict target
//!   expressions.
//!
//! # Submodules
//! - `query`, `expr` — Query tree and expression utilities
//! - `aggregate` — Aggregates that support incremental maintenance
//! - `equijoin` — Equijoin classification of outer-join conditions
//! - `restriction` — Rejects unsupported view definitions
//! - `rewrite` — Adds bookkeeping columns to the view definition
//! - `pkey` — Primary-key propagation to the view's output columns
//!
//! # Usage
//! ```ignore
//! use crate::dvm::analyze_view_definition;
//!
//! let rewritten = analyze_view_definition(catalog, &config, &query, &col_names)?;
//! ```

pub mod aggregate;
pub mod equijoin;
pub mod expr;
pub mod pkey;
pub mod query;
pub mod restriction;
pub mod rewrite;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use expr::{AttrNumber, Expr, Index, Var};
pub use pkey::{AttnoSet, get_primary_key_attnos_from_query};
pub use query::{Query, TargetEntry};
pub use restriction::{check_ivm_restriction, check_mutability};
pub use rewrite::{IVM_COUNT_COLUMN, rewrite_query_for_immv};

use tracing::debug;

use crate::catalog::Catalog;
use crate::config::ImmvConfig;
use crate::error::ImmvError;

/// Validate a view definition and produce the query to materialize.
///
/// Runs the mutability precondition, the restriction checker and the
/// rewriter, in that order.
pub fn analyze_view_definition(
    catalog: &dyn Catalog,
    config: &ImmvConfig,
    query: &Query,
    col_names: &[String],
) -> Result<Query, ImmvError> {
    check_mutability(query)?;
    check_ivm_restriction(catalog, config, query)?;
    let rewritten = rewrite_query_for_immv(query, col_names, config)?;
    debug!(
        user_columns = query.target_list.len(),
        columns = rewritten.target_list.len(),
        "view definition analyzed"
    );
    Ok(rewritten)
}
