//! Executor seam and the receiver that loads a query result into a new
//! relation.
//!
//! The host runs the query. It hands the output shape to
//! [`DestReceiver::startup`], then every row to [`DestReceiver::receive`],
//! then calls [`DestReceiver::shutdown`]. [`IntoRelDestReceiver`] creates
//! the target relation on startup, so the relation's columns always match
//! what the executor actually produces.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::api::{IntoClause, build_column_defs, create_into_relation};
use crate::catalog::{ObjectAddress, Oid};
use crate::dvm::expr::Datum;
use crate::dvm::query::{Query, TargetEntry};
use crate::error::ImmvError;
use crate::txn::Transaction;

/// One output row.
pub type Row = Vec<Datum>;

// ── Tuple descriptor ────────────────────────────────────────────────────

/// One column of an executor result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Oid,
}

impl ResultColumn {
    /// Describe the output of a target entry.
    pub fn from_target_entry(tle: &TargetEntry) -> Self {
        ResultColumn {
            name: tle.name().to_string(),
            type_oid: tle.expr.expr_type(),
            typmod: tle.expr.expr_typmod(),
            collation: tle.expr.expr_collation(),
        }
    }
}

/// Shape of an executor result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleDesc {
    pub columns: Vec<ResultColumn>,
}

impl TupleDesc {
    /// The non-junk output columns of `query`.
    pub fn for_query(query: &Query) -> Self {
        TupleDesc {
            columns: query
                .output_columns()
                .map(ResultColumn::from_target_entry)
                .collect(),
        }
    }

    pub fn natts(&self) -> usize {
        self.columns.len()
    }
}

// ── Collaborator traits ─────────────────────────────────────────────────

/// Consumer of an executor result.
pub trait DestReceiver {
    fn startup(&mut self, txn: &mut Transaction<'_>, desc: &TupleDesc) -> Result<(), ImmvError>;
    fn receive(&mut self, row: Row) -> Result<(), ImmvError>;
    fn shutdown(&mut self) -> Result<(), ImmvError>;
}

/// The host's rule rewriter, planner and executor.
pub trait Executor {
    /// Apply rewrite rules. A SELECT must come back as exactly one query.
    fn rewrite(&self, query: &Query) -> Result<Vec<Query>, ImmvError>;

    /// Run `query`, streaming its result into `dest`. Returns the number of
    /// rows processed.
    fn execute(
        &mut self,
        txn: &mut Transaction<'_>,
        query: &Query,
        dest: &mut dyn DestReceiver,
    ) -> Result<u64, ImmvError>;
}

/// Table storage with a bulk-insert path.
pub trait TableStorage {
    fn begin_bulk_insert(&mut self, relid: Oid) -> Result<(), ImmvError>;
    fn insert(&mut self, relid: Oid, row: Row) -> Result<(), ImmvError>;
    fn finish_bulk_insert(&mut self, relid: Oid) -> Result<(), ImmvError>;
}

// ── Into-relation receiver ──────────────────────────────────────────────

/// Creates the target of CREATE TABLE AS / CREATE MATERIALIZED VIEW and
/// fills it.
pub struct IntoRelDestReceiver<'a> {
    into: &'a IntoClause,
    storage: &'a mut dyn TableStorage,
    address: Option<ObjectAddress>,
    bulk_open: bool,
    inserted: u64,
}

impl<'a> IntoRelDestReceiver<'a> {
    pub fn new(into: &'a IntoClause, storage: &'a mut dyn TableStorage) -> Self {
        IntoRelDestReceiver {
            into,
            storage,
            address: None,
            bulk_open: false,
            inserted: 0,
        }
    }

    /// Address of the relation created at startup.
    pub fn address(&self) -> Option<ObjectAddress> {
        self.address
    }

    /// Rows written to storage so far.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }
}

impl DestReceiver for IntoRelDestReceiver<'_> {
    fn startup(&mut self, txn: &mut Transaction<'_>, desc: &TupleDesc) -> Result<(), ImmvError> {
        let columns = build_column_defs(
            txn.catalog(),
            desc.columns
                .iter()
                .map(|c| (c.name.as_str(), c.type_oid, c.typmod, c.collation)),
            &self.into.col_names,
        )?;
        let address = create_into_relation(txn, columns, self.into)?;
        let relid = address.object_id;

        if txn.catalog().row_security_enabled(relid)? {
            return Err(ImmvError::RowSecurityNotSupported);
        }
        if self.into.is_matview() && !self.into.skip_data {
            txn.catalog_mut().set_matview_populated(relid, true)?;
        }
        if !self.into.skip_data {
            self.storage.begin_bulk_insert(relid)?;
            self.bulk_open = true;
        }
        debug!(relid, columns = desc.natts(), "into-relation receiver started");
        self.address = Some(address);
        Ok(())
    }

    fn receive(&mut self, row: Row) -> Result<(), ImmvError> {
        if self.into.skip_data {
            return Ok(());
        }
        let Some(address) = self.address else {
            return Err(ImmvError::InternalInvariantViolation(
                "row received before receiver startup".to_string(),
            ));
        };
        self.storage.insert(address.object_id, row)?;
        self.inserted += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ImmvError> {
        if self.bulk_open
            && let Some(address) = self.address
        {
            self.storage.finish_bulk_insert(address.object_id)?;
            self.bulk_open = false;
        }
        debug!(rows = self.inserted, "into-relation receiver finished");
        Ok(())
    }
}

// ── In-memory implementations ───────────────────────────────────────────

/// Rows per relation, kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: BTreeMap<Oid, Vec<Row>>,
    open: BTreeSet<Oid>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, relid: Oid) -> &[Row] {
        self.tables.get(&relid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a bulk insert into `relid` is still in progress.
    pub fn is_open(&self, relid: Oid) -> bool {
        self.open.contains(&relid)
    }
}

impl TableStorage for MemoryStorage {
    fn begin_bulk_insert(&mut self, relid: Oid) -> Result<(), ImmvError> {
        if !self.open.insert(relid) {
            return Err(ImmvError::Executor(format!(
                "bulk insert into relation {relid} already in progress"
            )));
        }
        self.tables.entry(relid).or_default();
        Ok(())
    }

    fn insert(&mut self, relid: Oid, row: Row) -> Result<(), ImmvError> {
        if !self.open.contains(&relid) {
            return Err(ImmvError::Executor(format!(
                "no bulk insert open for relation {relid}"
            )));
        }
        trace!(relid, width = row.len(), "insert");
        self.tables.entry(relid).or_default().push(row);
        Ok(())
    }

    fn finish_bulk_insert(&mut self, relid: Oid) -> Result<(), ImmvError> {
        if !self.open.remove(&relid) {
            return Err(ImmvError::Executor(format!(
                "no bulk insert open for relation {relid}"
            )));
        }
        Ok(())
    }
}

/// An executor that returns a fixed result set for any query.
///
/// Rule rewriting is the identity unless a different output is configured.
#[derive(Debug, Default)]
pub struct FixedResultExecutor {
    rows: Vec<Row>,
    rewrite_output: Option<Vec<Query>>,
    executed: Vec<Query>,
}

impl FixedResultExecutor {
    pub fn new(rows: Vec<Row>) -> Self {
        FixedResultExecutor {
            rows,
            ..Self::default()
        }
    }

    /// Make [`Executor::rewrite`] return `queries` regardless of input.
    pub fn with_rewrite_output(mut self, queries: Vec<Query>) -> Self {
        self.rewrite_output = Some(queries);
        self
    }

    /// Queries run so far.
    pub fn executed(&self) -> &[Query] {
        &self.executed
    }
}

impl Executor for FixedResultExecutor {
    fn rewrite(&self, query: &Query) -> Result<Vec<Query>, ImmvError> {
        Ok(self
            .rewrite_output
            .clone()
            .unwrap_or_else(|| vec![query.clone()]))
    }

    fn execute(
        &mut self,
        txn: &mut Transaction<'_>,
        query: &Query,
        dest: &mut dyn DestReceiver,
    ) -> Result<u64, ImmvError> {
        let desc = TupleDesc::for_query(query);
        for row in &self.rows {
            if row.len() != desc.natts() {
                return Err(ImmvError::Executor(format!(
                    "result row has {} columns, query produces {}",
                    row.len(),
                    desc.natts()
                )));
            }
        }
        self.executed.push(query.clone());
        dest.startup(txn, &desc)?;
        for row in &self.rows {
            dest.receive(row.clone())?;
        }
        dest.shutdown()?;
        Ok(self.rows.len() as u64)
    }
}
