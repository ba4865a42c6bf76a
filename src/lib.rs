//! pg_immv — Incrementally maintainable materialized views.
//!
//! The crate decides whether a view definition can be maintained
//! incrementally, rewrites it so the stored rows carry the state that
//! maintenance needs, and provisions the unique index and base-table
//! triggers through which maintenance later runs.
//!
//! The host database is reached only through traits: [`catalog::Catalog`]
//! for lookups and DDL, [`dest::Executor`] and [`dest::TableStorage`] for
//! running the definition and loading its result. In-memory
//! implementations of these ship with the crate.
//!
//! # Theoretical Basis
//!
//! - **Gupta & Mumick (1995)**: "Maintenance of Materialized Views: Problems,
//!   Techniques, and Applications", IEEE Data Engineering Bulletin.
//! - **Larson & Zhou (2007)**: "Efficient Maintenance of Materialized
//!   Outer-Join Views", ICDE 2007.

pub mod api;
pub mod catalog;
pub mod cdc;
pub mod config;
pub mod dest;
pub mod dvm;
pub mod error;
pub mod index;
pub mod txn;

pub use api::{CreateTableAsOutcome, CreateTableAsStmt, IntoClause, create_immv, exec_create_table_as};
pub use config::ImmvConfig;
pub use error::{ImmvError, ImmvErrorKind, UnsupportedConstruct};
pub use txn::{Notice, Transaction};
