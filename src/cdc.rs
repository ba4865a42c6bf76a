//! Change capture triggers on the base tables of a view.
//!
//! Every base relation a view reads gets six statement-level triggers:
//! BEFORE and AFTER for each of INSERT, DELETE and UPDATE. The BEFORE
//! triggers call `IVM_immediate_before`, which takes the view lock; the
//! AFTER triggers call `IVM_immediate_maintenance` with the statement's
//! transition tables and apply the delta to the view.
//!
//! # Lock mode
//!
//! A view over a single plain table can be maintained under a lock that
//! lets concurrent writers proceed. A view over several relations (or over
//! a subquery) needs the exclusive mode, otherwise two transactions
//! changing different base tables could each compute a delta against a
//! stale picture of the other table. The mode is chosen once, at creation,
//! and passed to every trigger as an argument.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{DependencyType, ObjectAddress, Oid};
use crate::dvm::query::{JoinTreeNode, Query, RteKind};
use crate::error::ImmvError;
use crate::txn::Transaction;

/// Base name of every maintenance trigger.
pub const IVM_TRIGGER_PREFIX: &str = "IVM_trigger";
/// Schema holding the maintenance functions.
pub const IVM_FUNCTION_SCHEMA: &str = "pg_catalog";
/// Function called by BEFORE triggers.
pub const IVM_BEFORE_FUNCTION: &str = "IVM_immediate_before";
/// Function called by AFTER triggers.
pub const IVM_MAINTENANCE_FUNCTION: &str = "IVM_immediate_maintenance";
/// Transition table with the rows a statement inserted or updated to.
pub const NEW_TRANSITION_TABLE: &str = "__ivm_newtable";
/// Transition table with the rows a statement deleted or updated from.
pub const OLD_TRANSITION_TABLE: &str = "__ivm_oldtable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTiming {
    Before,
    After,
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerTiming::Before => write!(f, "before"),
            TriggerTiming::After => write!(f, "after"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Insert,
    Delete,
    Update,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Insert => write!(f, "ins"),
            TriggerEvent::Delete => write!(f, "del"),
            TriggerEvent::Update => write!(f, "upd"),
        }
    }
}

/// `REFERENCING OLD TABLE AS ... NEW TABLE AS ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTables {
    pub old_table: Option<String>,
    pub new_table: Option<String>,
}

/// A trigger to create on a base relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    pub name: String,
    pub relid: Oid,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub function_schema: String,
    pub function_name: String,
    /// `[view_oid, lock_flag]`; the flag is `"t"` for the exclusive mode.
    pub args: Vec<String>,
    pub row_level: bool,
    /// Internal triggers have their OID appended to the name by the catalog.
    pub is_internal: bool,
    pub transitions: TransitionTables,
}

impl TriggerDescriptor {
    /// Build the maintenance trigger for one (event, timing) pair.
    pub fn ivm(
        relid: Oid,
        view_oid: Oid,
        event: TriggerEvent,
        timing: TriggerTiming,
        exclusive_lock: bool,
    ) -> Self {
        let function_name = match timing {
            TriggerTiming::Before => IVM_BEFORE_FUNCTION,
            TriggerTiming::After => IVM_MAINTENANCE_FUNCTION,
        };
        let mut transitions = TransitionTables::default();
        if timing == TriggerTiming::After {
            if matches!(event, TriggerEvent::Insert | TriggerEvent::Update) {
                transitions.new_table = Some(NEW_TRANSITION_TABLE.to_string());
            }
            if matches!(event, TriggerEvent::Delete | TriggerEvent::Update) {
                transitions.old_table = Some(OLD_TRANSITION_TABLE.to_string());
            }
        }
        TriggerDescriptor {
            name: format!("{IVM_TRIGGER_PREFIX}_{event}_{timing}"),
            relid,
            timing,
            event,
            function_schema: IVM_FUNCTION_SCHEMA.to_string(),
            function_name: function_name.to_string(),
            args: vec![
                view_oid.to_string(),
                if exclusive_lock { "t" } else { "f" }.to_string(),
            ],
            row_level: false,
            is_internal: true,
            transitions,
        }
    }
}

/// Outcome of trigger installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerInstall {
    pub exclusive_lock: bool,
    /// Base relations that received triggers, in installation order.
    pub base_relations: Vec<Oid>,
}

const TRIGGER_ORDER: [(TriggerEvent, TriggerTiming); 6] = [
    (TriggerEvent::Insert, TriggerTiming::Before),
    (TriggerEvent::Delete, TriggerTiming::Before),
    (TriggerEvent::Update, TriggerTiming::Before),
    (TriggerEvent::Insert, TriggerTiming::After),
    (TriggerEvent::Delete, TriggerTiming::After),
    (TriggerEvent::Update, TriggerTiming::After),
];

/// Install the maintenance triggers for `view_oid` on every base relation
/// of `query`.
///
/// With `is_create` false the query is in its stored form and its first two
/// range-table entries are placeholders that do not count for the lock
/// decision.
pub fn create_ivm_triggers_on_base_tables(
    txn: &mut Transaction<'_>,
    query: &Query,
    view_oid: Oid,
    is_create: bool,
) -> Result<TriggerInstall, ImmvError> {
    let first_rtindex = if is_create { 1 } else { 3 };
    let Some(first) = query.rte(first_rtindex) else {
        return Ok(TriggerInstall {
            exclusive_lock: false,
            base_relations: Vec::new(),
        });
    };
    let exclusive_lock = query.rtable.len() > first_rtindex || !first.is_relation();

    let mut base_relations = Vec::new();
    install_for_query(txn, query, view_oid, exclusive_lock, &mut base_relations)?;
    debug!(
        view = view_oid,
        exclusive_lock,
        relations = base_relations.len(),
        "installed maintenance triggers"
    );
    Ok(TriggerInstall {
        exclusive_lock,
        base_relations,
    })
}

fn install_for_query(
    txn: &mut Transaction<'_>,
    query: &Query,
    view_oid: Oid,
    exclusive_lock: bool,
    seen: &mut Vec<Oid>,
) -> Result<(), ImmvError> {
    for node in &query.jointree.fromlist {
        install_for_node(txn, query, node, view_oid, exclusive_lock, seen)?;
    }
    for cte in &query.cte_list {
        install_for_query(txn, &cte.ctequery, view_oid, exclusive_lock, seen)?;
    }
    Ok(())
}

fn install_for_node(
    txn: &mut Transaction<'_>,
    query: &Query,
    node: &JoinTreeNode,
    view_oid: Oid,
    exclusive_lock: bool,
    seen: &mut Vec<Oid>,
) -> Result<(), ImmvError> {
    match node {
        JoinTreeNode::RangeTblRef(rtindex) => {
            let Some(rte) = query.rte(*rtindex) else {
                return Err(ImmvError::InternalInvariantViolation(format!(
                    "join tree references missing range-table entry {rtindex}"
                )));
            };
            match &rte.kind {
                RteKind::Relation { relid, .. } if !seen.contains(relid) => {
                    for (event, timing) in TRIGGER_ORDER {
                        create_ivm_trigger(txn, *relid, view_oid, event, timing, exclusive_lock)?;
                    }
                    seen.push(*relid);
                }
                RteKind::Subquery { subquery } => {
                    install_for_query(txn, subquery, view_oid, exclusive_lock, seen)?;
                }
                _ => {}
            }
        }
        JoinTreeNode::Join(join) => {
            install_for_node(txn, query, &join.larg, view_oid, exclusive_lock, seen)?;
            install_for_node(txn, query, &join.rarg, view_oid, exclusive_lock, seen)?;
        }
        JoinTreeNode::From(from) => {
            for child in &from.fromlist {
                install_for_node(txn, query, child, view_oid, exclusive_lock, seen)?;
            }
        }
    }
    Ok(())
}

fn create_ivm_trigger(
    txn: &mut Transaction<'_>,
    relid: Oid,
    view_oid: Oid,
    event: TriggerEvent,
    timing: TriggerTiming,
    exclusive_lock: bool,
) -> Result<(), ImmvError> {
    let trigger = TriggerDescriptor::ivm(relid, view_oid, event, timing, exclusive_lock);
    let address = txn.catalog_mut().create_trigger(&trigger)?;
    txn.catalog_mut().record_dependency(
        address,
        ObjectAddress::relation(view_oid),
        DependencyType::Auto,
    )?;
    txn.advance();
    Ok(())
}
