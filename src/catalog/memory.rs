//! In-process catalog.
//!
//! [`MemoryCatalog`] keeps relations, keys, indexes, triggers and
//! dependency edges in plain collections and logs every DDL call together
//! with the command id current at the time. It is what the crate's own
//! tests run against, and it lets a host exercise the creation pipeline
//! without a database server.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use crate::catalog::*;
use crate::cdc::TriggerDescriptor;
use crate::dvm::aggregate;
use crate::dvm::expr::AttrNumber;
use crate::dvm::query::Query;
use crate::error::ImmvError;
use crate::index::IndexDescriptor;

/// First OID handed out to objects created through the catalog.
const FIRST_USER_OID: Oid = 16384;

/// `int4 = int4`.
pub const INT4EQ_OPERATOR: Oid = 96;
/// `int4 < int4`.
pub const INT4LT_OPERATOR: Oid = 97;
/// `text = text`.
pub const TEXTEQ_OPERATOR: Oid = 98;
/// `int8 = int8`.
pub const INT8EQ_OPERATOR: Oid = 410;
/// `int4 > int4`.
pub const INT4GT_OPERATOR: Oid = 521;

/// A catalog change, as logged by [`MemoryCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlEvent {
    DefineRelation { oid: Oid, name: String },
    CreateToastTable { relid: Oid, options: Vec<DefElem> },
    StoreViewQuery { relid: Oid },
    SetPopulated { relid: Oid, populated: bool },
    SetIvm { relid: Oid, ivm: bool },
    DefineIndex { oid: Oid, name: String },
    CreateTrigger { oid: Oid, relid: Oid, name: String },
    RecordDependency {
        depender: ObjectAddress,
        referenced: ObjectAddress,
        kind: DependencyType,
    },
}

/// A trigger as stored by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTrigger {
    pub oid: Oid,
    /// Final name; internal triggers get their OID appended.
    pub name: String,
    pub descriptor: TriggerDescriptor,
}

/// A dependency edge as stored by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub depender: ObjectAddress,
    pub referenced: ObjectAddress,
    pub kind: DependencyType,
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    next_oid: Oid,
    command_id: CommandId,
    relations: BTreeMap<Oid, RelationInfo>,
    parents: HashMap<Oid, Oid>,
    primary_keys: HashMap<Oid, PrimaryKey>,
    indexes: HashMap<Oid, Vec<IndexInfo>>,
    toast_tables: BTreeMap<Oid, Vec<DefElem>>,
    view_queries: HashMap<Oid, String>,
    triggers: Vec<StoredTrigger>,
    dependencies: Vec<Dependency>,
    operators: HashMap<Oid, OperatorJoinInfo>,
    type_names: HashMap<Oid, String>,
    collatable_types: BTreeSet<Oid>,
    proc_names: HashMap<Oid, String>,
    row_security_on_create: bool,
    events: Vec<(CommandId, DdlEvent)>,
}

impl MemoryCatalog {
    /// An empty catalog preloaded with the built-in types, the common
    /// equality operators and the supported aggregates.
    pub fn new() -> Self {
        let mut catalog = MemoryCatalog {
            next_oid: FIRST_USER_OID,
            ..MemoryCatalog::default()
        };
        for (oid, name) in [
            (BOOL_OID, "boolean"),
            (INT8_OID, "bigint"),
            (INT2_OID, "smallint"),
            (INT4_OID, "integer"),
            (TEXT_OID, "text"),
            (OID_OID, "oid"),
            (TID_OID, "tid"),
            (FLOAT4_OID, "real"),
            (FLOAT8_OID, "double precision"),
            (MONEY_OID, "money"),
            (INET_OID, "inet"),
            (BPCHAR_OID, "character"),
            (DATE_OID, "date"),
            (TIME_OID, "time without time zone"),
            (TIMESTAMP_OID, "timestamp without time zone"),
            (TIMESTAMPTZ_OID, "timestamp with time zone"),
            (INTERVAL_OID, "interval"),
            (TIMETZ_OID, "time with time zone"),
            (NUMERIC_OID, "numeric"),
            (ANY_OID, "\"any\""),
            (ANYARRAY_OID, "anyarray"),
            (PG_LSN_OID, "pg_lsn"),
            (ANYENUM_OID, "anyenum"),
        ] {
            catalog.type_names.insert(oid, name.to_string());
        }
        catalog.collatable_types.extend([TEXT_OID, BPCHAR_OID]);

        let equality = OperatorJoinInfo {
            mergejoinable: true,
            has_mergejoin_opfamilies: true,
            hashjoinable: true,
        };
        for opno in [INT4EQ_OPERATOR, TEXTEQ_OPERATOR, INT8EQ_OPERATOR] {
            catalog.operators.insert(opno, equality);
        }
        for opno in [INT4LT_OPERATOR, INT4GT_OPERATOR, INT84GT_OPERATOR] {
            catalog.operators.insert(opno, OperatorJoinInfo::default());
        }

        for entry in aggregate::SUPPORTED_AGGREGATES {
            let signature = if entry.star {
                format!("{}(*)", entry.kind.name())
            } else {
                let input = catalog.format_type(entry.input_type);
                format!("{}({input})", entry.kind.name())
            };
            catalog.proc_names.insert(entry.fn_oid, signature);
        }
        catalog
    }

    fn alloc_oid(&mut self) -> Oid {
        let oid = self.next_oid;
        self.next_oid += 1;
        oid
    }

    fn log(&mut self, event: DdlEvent) {
        trace!(command_id = self.command_id, ?event, "catalog change");
        self.events.push((self.command_id, event));
    }

    fn name_taken(&self, namespace: &str, name: &str) -> bool {
        self.relations
            .values()
            .any(|r| r.namespace == namespace && r.name == name)
            || self
                .relations
                .values()
                .filter(|r| r.namespace == namespace)
                .flat_map(|r| self.indexes.get(&r.oid).into_iter().flatten())
                .any(|idx| idx.name == name)
    }

    // ── Setup ───────────────────────────────────────────────────────────

    /// Add a relation of the given kind in `public`. Returns its OID.
    pub fn add_relation(&mut self, name: &str, kind: RelKind, columns: &[(&str, Oid)]) -> Oid {
        let oid = self.alloc_oid();
        let columns = columns
            .iter()
            .map(|(col, type_oid)| AttributeInfo {
                name: col.to_string(),
                type_oid: *type_oid,
                typmod: -1,
                collation: if self.collatable_types.contains(type_oid) {
                    DEFAULT_COLLATION_OID
                } else {
                    INVALID_OID
                },
            })
            .collect();
        self.relations.insert(
            oid,
            RelationInfo {
                oid,
                namespace: "public".to_string(),
                name: name.to_string(),
                kind,
                tablespace: None,
                columns,
                row_security: false,
                populated: true,
                is_ivm: false,
            },
        );
        oid
    }

    /// Add an ordinary table. Returns its OID.
    pub fn add_table(&mut self, name: &str, columns: &[(&str, Oid)]) -> Oid {
        self.add_relation(name, RelKind::Relation, columns)
    }

    /// Give `relid` a primary key on `attnums`. Returns the constraint OID.
    pub fn set_primary_key(&mut self, relid: Oid, attnums: &[AttrNumber], deferrable: bool) -> Oid {
        let constraint_oid = self.alloc_oid();
        self.primary_keys.insert(
            relid,
            PrimaryKey {
                constraint_oid,
                attnums: attnums.to_vec(),
                deferrable,
            },
        );
        constraint_oid
    }

    /// Make `child` inherit from `parent`.
    pub fn set_parent(&mut self, child: Oid, parent: Oid) {
        self.parents.insert(child, parent);
    }

    pub fn set_operator(&mut self, opno: Oid, info: OperatorJoinInfo) {
        self.operators.insert(opno, info);
    }

    pub fn set_proc_name(&mut self, func_oid: Oid, signature: &str) {
        self.proc_names.insert(func_oid, signature.to_string());
    }

    /// Enforce row-level security on relations created from now on.
    pub fn set_row_security_on_create(&mut self, enabled: bool) {
        self.row_security_on_create = enabled;
    }

    /// Register an existing index on `relid`.
    pub fn add_index(&mut self, relid: Oid, mut index: IndexInfo) -> Oid {
        let oid = self.alloc_oid();
        index.oid = oid;
        self.indexes.entry(relid).or_default().push(index);
        oid
    }

    // ── Inspection ──────────────────────────────────────────────────────

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// Every DDL call so far, paired with the command id it ran under.
    pub fn events(&self) -> &[(CommandId, DdlEvent)] {
        &self.events
    }

    pub fn relation_by_name(&self, name: &str) -> Option<&RelationInfo> {
        self.relations.values().find(|r| r.name == name)
    }

    pub fn indexes_on(&self, relid: Oid) -> &[IndexInfo] {
        self.indexes.get(&relid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn triggers(&self) -> &[StoredTrigger] {
        &self.triggers
    }

    pub fn triggers_on(&self, relid: Oid) -> Vec<&StoredTrigger> {
        self.triggers
            .iter()
            .filter(|t| t.descriptor.relid == relid)
            .collect()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn toast_options(&self, relid: Oid) -> Option<&[DefElem]> {
        self.toast_tables.get(&relid).map(Vec::as_slice)
    }

    /// The stored definition of a materialized view, decoded.
    pub fn view_query(&self, relid: Oid) -> Option<Query> {
        self.view_queries
            .get(&relid)
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

impl Catalog for MemoryCatalog {
    fn relation_oid(&self, rel: &RangeVar) -> Result<Option<Oid>, ImmvError> {
        let namespace = rel.schema.as_deref().unwrap_or("public");
        Ok(self
            .relations
            .values()
            .find(|r| r.namespace == namespace && r.name == rel.name)
            .map(|r| r.oid))
    }

    fn relation(&self, relid: Oid) -> Result<RelationInfo, ImmvError> {
        self.relations
            .get(&relid)
            .cloned()
            .ok_or_else(|| ImmvError::Catalog(format!("relation with OID {relid} does not exist")))
    }

    fn has_superclass(&self, relid: Oid) -> Result<bool, ImmvError> {
        Ok(self.parents.contains_key(&relid))
    }

    fn has_inheritance_children(&self, relid: Oid) -> Result<bool, ImmvError> {
        Ok(self.parents.values().any(|p| *p == relid))
    }

    fn primary_key(&self, relid: Oid) -> Result<Option<PrimaryKey>, ImmvError> {
        Ok(self.primary_keys.get(&relid).cloned())
    }

    fn operator_join_info(&self, opno: Oid, _input_type: Oid) -> Result<OperatorJoinInfo, ImmvError> {
        Ok(self.operators.get(&opno).copied().unwrap_or_default())
    }

    fn type_is_collatable(&self, type_oid: Oid) -> bool {
        self.collatable_types.contains(&type_oid)
    }

    fn format_type(&self, type_oid: Oid) -> String {
        self.type_names
            .get(&type_oid)
            .cloned()
            .unwrap_or_else(|| "???".to_string())
    }

    fn format_procedure(&self, func_oid: Oid) -> String {
        self.proc_names
            .get(&func_oid)
            .cloned()
            .unwrap_or_else(|| func_oid.to_string())
    }

    fn relation_indexes(&self, relid: Oid) -> Result<Vec<IndexInfo>, ImmvError> {
        Ok(self.indexes_on(relid).to_vec())
    }

    fn row_security_enabled(&self, relid: Oid) -> Result<bool, ImmvError> {
        Ok(self.relation(relid)?.row_security)
    }

    fn define_relation(&mut self, stmt: &CreateStmt) -> Result<ObjectAddress, ImmvError> {
        let namespace = stmt.relation.schema.as_deref().unwrap_or("public");
        if self.name_taken(namespace, &stmt.relation.name) {
            return Err(ImmvError::DuplicateRelation(stmt.relation.name.clone()));
        }
        let oid = self.alloc_oid();
        self.relations.insert(
            oid,
            RelationInfo {
                oid,
                namespace: namespace.to_string(),
                name: stmt.relation.name.clone(),
                kind: stmt.relkind,
                tablespace: stmt.tablespace.clone(),
                columns: stmt
                    .columns
                    .iter()
                    .map(|c| AttributeInfo {
                        name: c.name.clone(),
                        type_oid: c.type_oid,
                        typmod: c.typmod,
                        collation: c.collation,
                    })
                    .collect(),
                row_security: self.row_security_on_create,
                populated: stmt.relkind != RelKind::MatView,
                is_ivm: false,
            },
        );
        self.log(DdlEvent::DefineRelation {
            oid,
            name: stmt.relation.name.clone(),
        });
        Ok(ObjectAddress::relation(oid))
    }

    fn create_toast_table(&mut self, relid: Oid, options: &[DefElem]) -> Result<(), ImmvError> {
        self.relation(relid)?;
        self.toast_tables.insert(relid, options.to_vec());
        self.log(DdlEvent::CreateToastTable {
            relid,
            options: options.to_vec(),
        });
        Ok(())
    }

    fn store_view_query(&mut self, relid: Oid, query: &Query) -> Result<(), ImmvError> {
        self.relation(relid)?;
        let json = serde_json::to_string(query)
            .map_err(|e| ImmvError::Catalog(format!("could not store view query: {e}")))?;
        self.view_queries.insert(relid, json);
        self.log(DdlEvent::StoreViewQuery { relid });
        Ok(())
    }

    fn set_matview_populated(&mut self, relid: Oid, populated: bool) -> Result<(), ImmvError> {
        let rel = self
            .relations
            .get_mut(&relid)
            .ok_or_else(|| ImmvError::Catalog(format!("relation with OID {relid} does not exist")))?;
        rel.populated = populated;
        self.log(DdlEvent::SetPopulated { relid, populated });
        Ok(())
    }

    fn set_matview_ivm(&mut self, relid: Oid, ivm: bool) -> Result<(), ImmvError> {
        let rel = self
            .relations
            .get_mut(&relid)
            .ok_or_else(|| ImmvError::Catalog(format!("relation with OID {relid} does not exist")))?;
        rel.is_ivm = ivm;
        self.log(DdlEvent::SetIvm { relid, ivm });
        Ok(())
    }

    fn define_index(&mut self, index: &IndexDescriptor) -> Result<ObjectAddress, ImmvError> {
        let rel = self.relation(index.relid)?;
        if self.name_taken(&rel.namespace, &index.name) {
            return Err(ImmvError::Catalog(format!(
                "relation \"{}\" already exists",
                index.name
            )));
        }
        for column in &index.columns {
            if !rel.columns.iter().any(|c| &c.name == column) {
                return Err(ImmvError::Catalog(format!(
                    "column \"{column}\" does not exist"
                )));
            }
        }
        let oid = self.add_index(
            index.relid,
            IndexInfo {
                oid: INVALID_OID,
                name: index.name.clone(),
                access_method: index.access_method.clone(),
                columns: index.columns.iter().cloned().map(Some).collect(),
                has_predicate: false,
                unique: index.unique,
                nulls_not_distinct: index.nulls_not_distinct,
            },
        );
        self.log(DdlEvent::DefineIndex {
            oid,
            name: index.name.clone(),
        });
        Ok(ObjectAddress::relation(oid))
    }

    fn create_trigger(&mut self, trigger: &TriggerDescriptor) -> Result<ObjectAddress, ImmvError> {
        let rel = self.relation(trigger.relid)?;
        let oid = self.alloc_oid();
        let name = if trigger.is_internal {
            format!("{}_{oid}", trigger.name)
        } else {
            trigger.name.clone()
        };
        if self
            .triggers
            .iter()
            .any(|t| t.descriptor.relid == trigger.relid && t.name == name)
        {
            return Err(ImmvError::Catalog(format!(
                "trigger \"{name}\" for relation \"{}\" already exists",
                rel.name
            )));
        }
        self.triggers.push(StoredTrigger {
            oid,
            name: name.clone(),
            descriptor: trigger.clone(),
        });
        self.log(DdlEvent::CreateTrigger {
            oid,
            relid: trigger.relid,
            name,
        });
        Ok(ObjectAddress::trigger(oid))
    }

    fn record_dependency(
        &mut self,
        depender: ObjectAddress,
        referenced: ObjectAddress,
        kind: DependencyType,
    ) -> Result<(), ImmvError> {
        self.dependencies.push(Dependency {
            depender,
            referenced,
            kind,
        });
        self.log(DdlEvent::RecordDependency {
            depender,
            referenced,
            kind,
        });
        Ok(())
    }

    fn command_counter_increment(&mut self, cid: CommandId) {
        self.command_id = cid;
    }
}
