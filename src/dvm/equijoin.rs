//! Equijoin classification for outer-join conditions.

use crate::catalog::Catalog;
use crate::dvm::expr::{Expr, pull_varnos};
use crate::error::ImmvError;

/// Whether `clause` is a simple equijoin: a binary operator whose two
/// arguments each reference exactly one range-table entry, different
/// entries on each side, and whose operator is merge-joinable (with at
/// least one mergejoin operator family) or hash-joinable for the left
/// argument's type.
pub fn is_equijoin_condition(catalog: &dyn Catalog, clause: &Expr) -> Result<bool, ImmvError> {
    let Expr::OpExpr(op) = clause else {
        return Ok(false);
    };
    let [left, right] = op.args.as_slice() else {
        return Ok(false);
    };

    let left_varnos = pull_varnos(left);
    let right_varnos = pull_varnos(right);
    if left_varnos.len() != 1 || right_varnos.len() != 1 || left_varnos == right_varnos {
        return Ok(false);
    }

    let info = catalog.operator_join_info(op.opno, left.expr_type())?;
    Ok((info.mergejoinable && info.has_mergejoin_opfamilies) || info.hashjoinable)
}
