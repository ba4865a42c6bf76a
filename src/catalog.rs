//! Catalog access and DDL.
//!
//! The host database owns relations, constraints, indexes and triggers.
//! This module defines the [`Catalog`] trait through which view creation
//! looks them up and changes them, plus the descriptor types those calls
//! exchange. [`memory::MemoryCatalog`] is an in-process implementation.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::cdc::TriggerDescriptor;
use crate::dvm::expr::AttrNumber;
use crate::dvm::query::Query;
use crate::error::ImmvError;
use crate::index::IndexDescriptor;

/// Object identifier.
pub type Oid = u32;

/// Command sequence number within a transaction.
pub type CommandId = u32;

pub const INVALID_OID: Oid = 0;

// ── Well-known type OIDs ────────────────────────────────────────────────

pub const BOOL_OID: Oid = 16;
pub const INT8_OID: Oid = 20;
pub const INT2_OID: Oid = 21;
pub const INT4_OID: Oid = 23;
pub const TEXT_OID: Oid = 25;
pub const OID_OID: Oid = 26;
pub const TID_OID: Oid = 27;
pub const FLOAT4_OID: Oid = 700;
pub const FLOAT8_OID: Oid = 701;
pub const MONEY_OID: Oid = 790;
pub const INET_OID: Oid = 869;
pub const BPCHAR_OID: Oid = 1042;
pub const DATE_OID: Oid = 1082;
pub const TIME_OID: Oid = 1083;
pub const TIMESTAMP_OID: Oid = 1114;
pub const TIMESTAMPTZ_OID: Oid = 1184;
pub const INTERVAL_OID: Oid = 1186;
pub const TIMETZ_OID: Oid = 1266;
pub const NUMERIC_OID: Oid = 1700;
pub const ANY_OID: Oid = 2276;
pub const ANYARRAY_OID: Oid = 2277;
pub const PG_LSN_OID: Oid = 3220;
pub const ANYENUM_OID: Oid = 3500;

/// Default collation.
pub const DEFAULT_COLLATION_OID: Oid = 100;

/// `int8 > int4`.
pub const INT84GT_OPERATOR: Oid = 419;

// ── Relations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelKind {
    Relation,
    PartitionedTable,
    ForeignTable,
    View,
    MatView,
    Other,
}

/// Catalog class of an object address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectClass {
    Relation,
    Constraint,
    Trigger,
}

/// Identifies a catalog object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectAddress {
    pub class: ObjectClass,
    pub object_id: Oid,
    pub sub_id: i32,
}

impl ObjectAddress {
    pub fn relation(oid: Oid) -> Self {
        ObjectAddress {
            class: ObjectClass::Relation,
            object_id: oid,
            sub_id: 0,
        }
    }

    pub fn constraint(oid: Oid) -> Self {
        ObjectAddress {
            class: ObjectClass::Constraint,
            object_id: oid,
            sub_id: 0,
        }
    }

    pub fn trigger(oid: Oid) -> Self {
        ObjectAddress {
            class: ObjectClass::Trigger,
            object_id: oid,
            sub_id: 0,
        }
    }
}

/// How a dependent object reacts when what it depends on is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyType {
    /// Dropping the referenced object requires CASCADE.
    Normal,
    /// The dependent object is dropped silently with the referenced one.
    Auto,
}

/// One column of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Oid,
}

/// Snapshot of a relation's catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub oid: Oid,
    pub namespace: String,
    pub name: String,
    pub kind: RelKind,
    pub tablespace: Option<String>,
    pub columns: Vec<AttributeInfo>,
    pub row_security: bool,
    pub populated: bool,
    pub is_ivm: bool,
}

impl RelationInfo {
    /// Column name at a 1-based attribute number.
    pub fn attname(&self, attno: AttrNumber) -> Option<&str> {
        usize::try_from(attno)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.columns.get(i))
            .map(|c| c.name.as_str())
    }
}

/// Primary-key constraint of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub constraint_oid: Oid,
    pub attnums: Vec<AttrNumber>,
    pub deferrable: bool,
}

/// Join properties of an operator for a given input type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorJoinInfo {
    pub mergejoinable: bool,
    pub has_mergejoin_opfamilies: bool,
    pub hashjoinable: bool,
}

/// An existing index, as far as compatibility checks need it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub oid: Oid,
    pub name: String,
    pub access_method: String,
    /// Key columns; `None` marks an expression column.
    pub columns: Vec<Option<String>>,
    pub has_predicate: bool,
    pub unique: bool,
    pub nulls_not_distinct: bool,
}

// ── DDL descriptors ─────────────────────────────────────────────────────

/// Possibly schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeVar {
    pub schema: Option<String>,
    pub name: String,
}

impl RangeVar {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        RangeVar {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub type_oid: Oid,
    pub typmod: i32,
    pub collation: Oid,
}

/// A storage option such as `fillfactor=70` or `toast.autovacuum_enabled=false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefElem {
    pub namespace: Option<String>,
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnCommitAction {
    #[default]
    Noop,
    PreserveRows,
    DeleteRows,
    Drop,
}

/// Everything needed to define a new relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStmt {
    pub relation: RangeVar,
    pub relkind: RelKind,
    pub columns: Vec<ColumnDef>,
    pub options: Vec<DefElem>,
    pub on_commit: OnCommitAction,
    pub tablespace: Option<String>,
    pub access_method: Option<String>,
    pub ivm: bool,
}

// ── Catalog trait ───────────────────────────────────────────────────────

/// Catalog lookups and DDL performed during view creation.
///
/// Implementations must make a change visible to later lookups no later
/// than the next [`Catalog::command_counter_increment`].
pub trait Catalog {
    // Lookups

    /// Resolve a relation name in the creation namespace.
    fn relation_oid(&self, rel: &RangeVar) -> Result<Option<Oid>, ImmvError>;

    fn relation(&self, relid: Oid) -> Result<RelationInfo, ImmvError>;

    /// Whether the relation is a child in an inheritance or partition tree.
    fn has_superclass(&self, relid: Oid) -> Result<bool, ImmvError>;

    /// Whether other relations inherit from this one.
    fn has_inheritance_children(&self, relid: Oid) -> Result<bool, ImmvError>;

    fn primary_key(&self, relid: Oid) -> Result<Option<PrimaryKey>, ImmvError>;

    fn operator_join_info(&self, opno: Oid, input_type: Oid) -> Result<OperatorJoinInfo, ImmvError>;

    fn type_is_collatable(&self, type_oid: Oid) -> bool;

    /// Display name of a type, e.g. `text`.
    fn format_type(&self, type_oid: Oid) -> String;

    /// Display signature of a function, e.g. `string_agg(text,text)`.
    fn format_procedure(&self, func_oid: Oid) -> String;

    fn relation_indexes(&self, relid: Oid) -> Result<Vec<IndexInfo>, ImmvError>;

    /// Whether row-level security would be enforced on the relation.
    fn row_security_enabled(&self, relid: Oid) -> Result<bool, ImmvError>;

    // DDL

    fn define_relation(&mut self, stmt: &CreateStmt) -> Result<ObjectAddress, ImmvError>;

    /// Create the TOAST table of a new relation, if it needs one.
    fn create_toast_table(&mut self, relid: Oid, options: &[DefElem]) -> Result<(), ImmvError>;

    /// Store the defining query of a materialized view.
    fn store_view_query(&mut self, relid: Oid, query: &Query) -> Result<(), ImmvError>;

    fn set_matview_populated(&mut self, relid: Oid, populated: bool) -> Result<(), ImmvError>;

    fn set_matview_ivm(&mut self, relid: Oid, ivm: bool) -> Result<(), ImmvError>;

    fn define_index(&mut self, index: &IndexDescriptor) -> Result<ObjectAddress, ImmvError>;

    fn create_trigger(&mut self, trigger: &TriggerDescriptor) -> Result<ObjectAddress, ImmvError>;

    fn record_dependency(
        &mut self,
        depender: ObjectAddress,
        referenced: ObjectAddress,
        kind: DependencyType,
    ) -> Result<(), ImmvError>;

    /// Make changes so far visible; `cid` is the new command id.
    fn command_counter_increment(&mut self, cid: CommandId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_address_constructors() {
        assert_eq!(ObjectAddress::relation(5).class, ObjectClass::Relation);
        assert_eq!(ObjectAddress::constraint(5).class, ObjectClass::Constraint);
        assert_eq!(ObjectAddress::trigger(5).sub_id, 0);
    }

    #[test]
    fn test_attname_bounds() {
        let rel = RelationInfo {
            oid: 1,
            namespace: "public".into(),
            name: "v".into(),
            kind: RelKind::MatView,
            tablespace: None,
            columns: vec![AttributeInfo {
                name: "a".into(),
                type_oid: INT4_OID,
                typmod: -1,
                collation: INVALID_OID,
            }],
            row_security: false,
            populated: false,
            is_ivm: false,
        };
        assert_eq!(rel.attname(1), Some("a"));
        assert_eq!(rel.attname(0), None);
        assert_eq!(rel.attname(2), None);
        assert_eq!(rel.attname(-1), None);
    }
}
