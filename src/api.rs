//! Entry points for creating tables and materialized views from a query.
//!
//! [`exec_create_table_as`] handles `CREATE TABLE AS` and
//! `CREATE MATERIALIZED VIEW`, including the incrementally maintainable
//! flavour. [`create_immv`] is the shorthand for the latter.
//!
//! For an incrementally maintainable view the sequence is:
//!
//! 1. validate and rewrite the definition (see [`crate::dvm`]),
//! 2. create the relation and store the rewritten definition,
//! 3. run the rewritten query into the new relation,
//! 4. mark the view incremental, create its unique index and install the
//!    change triggers on its base tables.
//!
//! Every step runs in the caller's transaction; on error the host rolls
//! the whole sequence back.

use tracing::{debug, info};

use crate::catalog::{
    Catalog, ColumnDef, CreateStmt, DefElem, INVALID_OID, ObjectAddress, OnCommitAction, Oid,
    RangeVar, RelKind,
};
use crate::cdc::{TriggerInstall, create_ivm_triggers_on_base_tables};
use crate::dest::{Executor, IntoRelDestReceiver, TableStorage};
use crate::dvm::analyze_view_definition;
use crate::dvm::query::Query;
use crate::error::ImmvError;
use crate::index::create_index_on_immv;
use crate::txn::{Notice, Transaction};

/// Reloption namespace whose options go to the TOAST table.
const TOAST_NAMESPACE: &str = "toast";

/// Target of CREATE TABLE AS / CREATE MATERIALIZED VIEW.
#[derive(Debug, Clone, PartialEq)]
pub struct IntoClause {
    pub rel: RangeVar,
    /// Explicit column names. May be shorter than the target list.
    pub col_names: Vec<String>,
    pub access_method: Option<String>,
    pub options: Vec<DefElem>,
    pub on_commit: OnCommitAction,
    pub tablespace: Option<String>,
    /// View definition; present exactly for materialized views.
    pub view_query: Option<Query>,
    /// WITH NO DATA.
    pub skip_data: bool,
    /// INCREMENTAL.
    pub ivm: bool,
}

impl IntoClause {
    pub fn new(rel: RangeVar) -> Self {
        IntoClause {
            rel,
            col_names: Vec::new(),
            access_method: None,
            options: Vec::new(),
            on_commit: OnCommitAction::Noop,
            tablespace: None,
            view_query: None,
            skip_data: false,
            ivm: false,
        }
    }

    pub fn is_matview(&self) -> bool {
        self.view_query.is_some()
    }
}

/// `CREATE [MATERIALIZED VIEW | TABLE] [IF NOT EXISTS] ... AS query`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableAsStmt {
    pub query: Query,
    pub into: IntoClause,
    pub if_not_exists: bool,
}

/// What a CREATE TABLE AS produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTableAsOutcome {
    /// The new relation; `None` when IF NOT EXISTS skipped creation.
    pub address: Option<ObjectAddress>,
    /// Rows loaded; `None` for WITH NO DATA.
    pub rows_processed: Option<u64>,
    /// Automatic index of an incremental view, if one was created.
    pub index: Option<ObjectAddress>,
    /// Change triggers of an incremental view.
    pub triggers: Option<TriggerInstall>,
}

/// Create an incrementally maintainable materialized view named `rel` over
/// `query` and populate it.
pub fn create_immv(
    txn: &mut Transaction<'_>,
    executor: &mut dyn Executor,
    storage: &mut dyn TableStorage,
    rel: RangeVar,
    query: Query,
) -> Result<CreateTableAsOutcome, ImmvError> {
    let mut into = IntoClause::new(rel);
    into.view_query = Some(query.clone());
    into.ivm = true;
    let stmt = CreateTableAsStmt {
        query,
        into,
        if_not_exists: false,
    };
    exec_create_table_as(txn, executor, storage, &stmt)
}

/// Execute a CREATE TABLE AS or CREATE MATERIALIZED VIEW statement.
pub fn exec_create_table_as(
    txn: &mut Transaction<'_>,
    executor: &mut dyn Executor,
    storage: &mut dyn TableStorage,
    stmt: &CreateTableAsStmt,
) -> Result<CreateTableAsOutcome, ImmvError> {
    if create_table_as_rel_exists(txn, stmt)? {
        return Ok(CreateTableAsOutcome::default());
    }

    let is_matview = stmt.into.is_matview();
    let is_immv = is_matview && stmt.into.ivm;
    let mut into = stmt.into.clone();
    let mut query = stmt.query.clone();

    // ── Incremental view definition ────────────────────────────────
    // The rewritten query is both what gets stored as the view
    // definition and what gets executed.
    if is_immv {
        query = analyze_view_definition(txn.catalog(), txn.config(), &stmt.query, &into.col_names)?;
        into.view_query = Some(query.clone());
    }

    let (address, rows_processed) = if into.skip_data {
        let columns = build_column_defs(
            txn.catalog(),
            query.output_columns().map(|tle| {
                (
                    tle.name(),
                    tle.expr.expr_type(),
                    tle.expr.expr_typmod(),
                    tle.expr.expr_collation(),
                )
            }),
            &into.col_names,
        )?;
        (create_into_relation(txn, columns, &into)?, None)
    } else {
        let mut rewritten = executor.rewrite(&query)?;
        if rewritten.len() != 1 {
            return Err(ImmvError::InternalInvariantViolation(format!(
                "unexpected rewrite result for {}",
                if is_matview {
                    "CREATE MATERIALIZED VIEW"
                } else {
                    "CREATE TABLE AS SELECT"
                }
            )));
        }
        let planned = rewritten.remove(0);
        let mut dest = IntoRelDestReceiver::new(&into, storage);
        let processed = executor.execute(txn, &planned, &mut dest)?;
        let address = dest.address().ok_or_else(|| {
            ImmvError::InternalInvariantViolation(
                "executor finished without starting the receiver".to_string(),
            )
        })?;
        (address, Some(processed))
    };

    let mut outcome = CreateTableAsOutcome {
        address: Some(address),
        rows_processed,
        index: None,
        triggers: None,
    };

    // ── Incremental maintenance setup ──────────────────────────────
    if is_immv {
        let view_oid = address.object_id;
        txn.catalog_mut().set_matview_ivm(view_oid, true)?;
        if !into.skip_data {
            let user_query = stmt.into.view_query.as_ref().unwrap_or(&stmt.query);
            outcome.index = create_index_on_immv(txn, user_query, view_oid, true)?;
            outcome.triggers = Some(create_ivm_triggers_on_base_tables(
                txn, &query, view_oid, true,
            )?);
        }
    }

    info!(
        relation = %into.rel.name,
        matview = is_matview,
        incremental = is_immv,
        rows = ?outcome.rows_processed,
        "relation created from query"
    );
    Ok(outcome)
}

/// Whether the target already exists. Errors unless IF NOT EXISTS was
/// given, in which case the skip is reported as a notice.
pub fn create_table_as_rel_exists(
    txn: &mut Transaction<'_>,
    stmt: &CreateTableAsStmt,
) -> Result<bool, ImmvError> {
    if txn.catalog().relation_oid(&stmt.into.rel)?.is_none() {
        return Ok(false);
    }
    if !stmt.if_not_exists {
        return Err(ImmvError::DuplicateRelation(stmt.into.rel.name.clone()));
    }
    txn.notice(Notice::new(format!(
        "relation \"{}\" already exists, skipping",
        stmt.into.rel.name
    )));
    Ok(true)
}

/// Column definitions for a new relation.
///
/// `columns` yields `(name, type, typmod, collation)` per output column.
/// Explicit names replace the derived ones in order; fewer names than
/// columns is fine, more is an error.
pub(crate) fn build_column_defs<'c>(
    catalog: &dyn Catalog,
    columns: impl Iterator<Item = (&'c str, Oid, i32, Oid)>,
    col_names: &[String],
) -> Result<Vec<ColumnDef>, ImmvError> {
    let mut names = col_names.iter();
    let mut defs = Vec::new();
    for (derived, type_oid, typmod, collation) in columns {
        let name = names.next().map_or(derived, String::as_str);
        if collation == INVALID_OID && catalog.type_is_collatable(type_oid) {
            return Err(ImmvError::IndeterminateCollation {
                column: name.to_string(),
                type_name: catalog.format_type(type_oid),
            });
        }
        defs.push(ColumnDef {
            name: name.to_string(),
            type_oid,
            typmod,
            collation,
        });
    }
    if names.next().is_some() {
        return Err(ImmvError::TooManyColumnNames);
    }
    Ok(defs)
}

/// Create the relation described by `into` with `columns`, its TOAST
/// table and, for a materialized view, its stored definition.
pub(crate) fn create_into_relation(
    txn: &mut Transaction<'_>,
    columns: Vec<ColumnDef>,
    into: &IntoClause,
) -> Result<ObjectAddress, ImmvError> {
    let create = CreateStmt {
        relation: into.rel.clone(),
        relkind: if into.is_matview() {
            RelKind::MatView
        } else {
            RelKind::Relation
        },
        columns,
        options: into.options.clone(),
        on_commit: into.on_commit,
        tablespace: into.tablespace.clone(),
        access_method: into.access_method.clone(),
        ivm: into.ivm,
    };
    let address = txn.catalog_mut().define_relation(&create)?;
    txn.advance();

    let toast_options: Vec<DefElem> = into
        .options
        .iter()
        .filter(|opt| opt.namespace.as_deref() == Some(TOAST_NAMESPACE))
        .cloned()
        .collect();
    txn.catalog_mut()
        .create_toast_table(address.object_id, &toast_options)?;

    if let Some(view_query) = &into.view_query {
        txn.catalog_mut()
            .store_view_query(address.object_id, view_query)?;
        txn.advance();
    }
    debug!(relid = address.object_id, name = %into.rel.name, "relation defined");
    Ok(address)
}
