//! Primary-key propagation through a view definition.
//!
//! A view's rows are uniquely identified when every base relation in its
//! FROM clause contributes all of its primary-key columns to the target
//! list. [`get_primary_key_attnos_from_query`] works out which output
//! columns those are, recursing into FROM subqueries and inlined CTEs; the
//! index provisioner builds the view's unique index from the result.

use std::collections::BTreeSet;

use crate::catalog::{Catalog, Oid};
use crate::dvm::expr::{AttrNumber, Expr, flatten_join_alias_vars};
use crate::dvm::query::{CommonTableExpr, Query, RteKind};
use crate::error::ImmvError;

/// Lowest system attribute number minus one. Attribute sets store members
/// offset by this value so system columns fit in a non-negative range.
pub const FIRST_LOW_INVALID_HEAP_ATTRIBUTE_NUMBER: AttrNumber = -7;

/// A set of attribute numbers, stored offset by
/// [`FIRST_LOW_INVALID_HEAP_ATTRIBUTE_NUMBER`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttnoSet {
    members: BTreeSet<u32>,
}

impl AttnoSet {
    fn offset(attno: AttrNumber) -> u32 {
        (i32::from(attno) - i32::from(FIRST_LOW_INVALID_HEAP_ATTRIBUTE_NUMBER)) as u32
    }

    pub fn insert(&mut self, attno: AttrNumber) {
        self.members.insert(Self::offset(attno));
    }

    pub fn remove(&mut self, attno: AttrNumber) -> bool {
        self.members.remove(&Self::offset(attno))
    }

    pub fn contains(&self, attno: AttrNumber) -> bool {
        self.members.contains(&Self::offset(attno))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Raw offset members, ascending.
    pub fn members(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().copied()
    }

    /// Attribute numbers, ascending.
    pub fn attnos(&self) -> impl Iterator<Item = AttrNumber> + '_ {
        self.members
            .iter()
            .map(|&m| (m as i32 + i32::from(FIRST_LOW_INVALID_HEAP_ATTRIBUTE_NUMBER)) as AttrNumber)
    }
}

impl FromIterator<AttrNumber> for AttnoSet {
    fn from_iter<I: IntoIterator<Item = AttrNumber>>(iter: I) -> Self {
        let mut set = AttnoSet::default();
        for attno in iter {
            set.insert(attno);
        }
        set
    }
}

/// Output columns (1-based target-list positions) that carry the primary
/// keys of every base relation in the FROM clause.
///
/// Returns `None` when any relation lacks a usable primary key, when a
/// subquery cannot propagate its own keys, or when some key column is not
/// projected. The OIDs of the primary-key constraints consulted are
/// appended to `constraints`.
///
/// With `is_create` false the query is in its stored form, whose first two
/// range-table entries are placeholders and are skipped.
pub fn get_primary_key_attnos_from_query(
    catalog: &dyn Catalog,
    query: &Query,
    constraints: &mut Vec<Oid>,
    is_create: bool,
) -> Result<Option<AttnoSet>, ImmvError> {
    let query = inline_ctes(query, &[]);
    let first_rtindex = if is_create { 1 } else { 3 };

    let mut key_sets: Vec<Option<AttnoSet>> = Vec::with_capacity(query.rtable.len());
    for (i, rte) in query.rtable.iter().enumerate() {
        if i + 1 < first_rtindex {
            key_sets.push(None);
            continue;
        }
        let keys = match &rte.kind {
            RteKind::Subquery { subquery } => {
                match get_primary_key_attnos_from_query(catalog, subquery, constraints, true)? {
                    Some(keys) => Some(keys),
                    None => return Ok(None),
                }
            }
            RteKind::Relation { relid, .. } => match catalog.primary_key(*relid)? {
                Some(pk) if !pk.deferrable => {
                    constraints.push(pk.constraint_oid);
                    Some(pk.attnums.iter().copied().collect())
                }
                _ => return Ok(None),
            },
            _ => None,
        };
        key_sets.push(keys);
    }

    let mut keys = AttnoSet::default();
    for (i, tle) in query.target_list.iter().enumerate() {
        if !matches!(tle.expr, Expr::Var(_)) {
            continue;
        }
        let Expr::Var(var) = flatten_join_alias_vars(&query, &tle.expr) else {
            continue;
        };
        if var.varlevelsup != 0 {
            continue;
        }
        if let Some(Some(rel_keys)) = var.varno.checked_sub(1).and_then(|j| key_sets.get_mut(j))
            && rel_keys.remove(var.varattno)
        {
            keys.insert((i + 1) as AttrNumber);
        }
    }

    let mut rels_in_from = Vec::new();
    for node in &query.jointree.fromlist {
        node.rtindexes(&mut rels_in_from);
    }
    for rtindex in rels_in_from {
        let Some(rte) = query.rte(rtindex) else {
            continue;
        };
        if matches!(rte.kind, RteKind::Function { .. }) {
            // a set-returning source has no key at all
            return Ok(None);
        }
        if let Some(Some(remaining)) = key_sets.get(rtindex - 1)
            && !remaining.is_empty()
        {
            return Ok(None);
        }
    }

    Ok((!keys.is_empty()).then_some(keys))
}

/// Replace references to CTEs by the CTE bodies, at every query level.
///
/// `outer` holds the CTE lists of the enclosing levels, innermost last.
fn inline_ctes(query: &Query, outer: &[&[CommonTableExpr]]) -> Query {
    let mut scopes: Vec<&[CommonTableExpr]> = outer.to_vec();
    scopes.push(&query.cte_list);

    let mut out = query.clone();
    for rte in &mut out.rtable {
        let replacement = match &rte.kind {
            RteKind::Cte { ctename, levels_up } => {
                let Some(level) = scopes.len().checked_sub(1 + *levels_up as usize) else {
                    continue;
                };
                scopes[level]
                    .iter()
                    .find(|cte| &cte.ctename == ctename && cte.cterefcount > 0)
                    .map(|cte| inline_ctes(&cte.ctequery, &scopes[..=level]))
            }
            RteKind::Subquery { subquery } => Some(inline_ctes(subquery, &scopes)),
            _ => None,
        };
        if let Some(subquery) = replacement {
            rte.kind = RteKind::Subquery {
                subquery: Box::new(subquery),
            };
        }
    }
    out
}
