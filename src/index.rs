//! Automatic unique index on a new view.
//!
//! Row-level maintenance looks rows of the view up by key, so a view
//! benefits from a unique index on whatever identifies its rows:
//!
//! 1. the GROUP BY columns of a grouped view,
//! 2. every output column of a DISTINCT view,
//! 3. the propagated primary keys of the base relations otherwise.
//!
//! When none of these apply the view is created without an index and the
//! client is told so. This is never an error.
//!
//! NULLs are treated as not distinct in the index so that a NULL group
//! cannot appear twice when two writers insert it concurrently.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{DependencyType, IndexInfo, ObjectAddress, Oid, RelationInfo};
use crate::config::truncate_identifier;
use crate::dvm::pkey::get_primary_key_attnos_from_query;
use crate::dvm::query::Query;
use crate::error::ImmvError;
use crate::txn::{Notice, Transaction};

/// An index to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub relid: Oid,
    pub unique: bool,
    pub nulls_not_distinct: bool,
    /// Key columns, in index order.
    pub columns: Vec<String>,
    pub access_method: String,
    pub tablespace: Option<String>,
}

impl IndexDescriptor {
    /// Whether `existing` already serves as this index: same access method
    /// and same plain key columns in the same order, without a predicate.
    pub fn is_compatible_with(&self, existing: &IndexInfo) -> bool {
        existing.access_method == self.access_method
            && !existing.has_predicate
            && existing.columns.len() == self.columns.len()
            && existing
                .columns
                .iter()
                .zip(&self.columns)
                .all(|(have, want)| have.as_deref() == Some(want.as_str()))
    }
}

/// Name of the automatic index of view `view_name`.
pub fn index_name_for(view_name: &str, max_len: usize) -> String {
    truncate_identifier(&format!("{view_name}_index"), max_len)
}

/// Create the automatic unique index on view `view_oid`.
///
/// `query` is the view definition as the user wrote it. Returns the address
/// of the new index, or `None` when no index was created because automatic
/// indexing is off, no key could be derived, or an equivalent index exists.
pub fn create_index_on_immv(
    txn: &mut Transaction<'_>,
    query: &Query,
    view_oid: Oid,
    is_create: bool,
) -> Result<Option<ObjectAddress>, ImmvError> {
    let config = txn.config();
    if !config.auto_index {
        debug!(view = view_oid, "automatic index disabled");
        return Ok(None);
    }
    let view = txn.catalog().relation(view_oid)?;

    let mut constraints = Vec::new();
    let Some(columns) = key_columns(txn, query, &view, &mut constraints, is_create)? else {
        warn!(view = %view.name, "no key for automatic index");
        txn.notice(
            Notice::new(format!(
                "could not create an index on materialized view \"{}\" automatically",
                view.name
            ))
            .with_detail(
                "This target list does not have all the primary key columns, \
                 or this view does not contain GROUP BY or DISTINCT clause.",
            )
            .with_hint("Create an index on the materialized view for efficient incremental maintenance."),
        );
        return Ok(None);
    };

    let index = IndexDescriptor {
        name: index_name_for(&view.name, config.max_identifier_len()),
        relid: view_oid,
        unique: true,
        nulls_not_distinct: true,
        columns,
        access_method: config.index_access_method.clone(),
        tablespace: view.tablespace.clone(),
    };

    let existing = txn.catalog().relation_indexes(view_oid)?;
    if let Some(found) = existing.iter().find(|idx| index.is_compatible_with(idx)) {
        debug!(view = %view.name, index = %found.name, "compatible index exists");
        return Ok(None);
    }

    let address = txn.catalog_mut().define_index(&index)?;
    txn.notice(Notice::new(format!(
        "created index \"{}\" on materialized view \"{}\"",
        index.name, view.name
    )));

    for constraint in constraints {
        txn.catalog_mut().record_dependency(
            address,
            ObjectAddress::constraint(constraint),
            DependencyType::Normal,
        )?;
    }
    Ok(Some(address))
}

/// Names of the view columns to index, in priority order of the sources
/// described in the module docs.
fn key_columns(
    txn: &Transaction<'_>,
    query: &Query,
    view: &RelationInfo,
    constraints: &mut Vec<Oid>,
    is_create: bool,
) -> Result<Option<Vec<String>>, ImmvError> {
    let column_name = |resno| {
        view.attname(resno).map(str::to_string).ok_or_else(|| {
            ImmvError::InternalInvariantViolation(format!(
                "view \"{}\" has no column {resno}",
                view.name
            ))
        })
    };

    if !query.group_clause.is_empty() {
        let mut columns = Vec::with_capacity(query.group_clause.len());
        for clause in &query.group_clause {
            let tle = query.sortgroupclause_tle(clause).ok_or_else(|| {
                ImmvError::InternalInvariantViolation(format!(
                    "GROUP BY item {} has no target entry",
                    clause.tle_sort_group_ref
                ))
            })?;
            columns.push(column_name(tle.resno)?);
        }
        return Ok(Some(columns));
    }

    if !query.distinct_clause.is_empty() {
        let columns = query
            .output_columns()
            .map(|tle| column_name(tle.resno))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Some(columns));
    }

    let Some(keys) =
        get_primary_key_attnos_from_query(txn.catalog(), query, constraints, is_create)?
    else {
        return Ok(None);
    };
    let columns = query
        .target_list
        .iter()
        .filter(|tle| keys.contains(tle.resno))
        .map(|tle| column_name(tle.resno))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(columns))
}
