//! HandReceipt append-only, hash-chained ledger.
//!
//! Every accountable action on a piece of property (creation, transfer,
//! status change, verification, maintenance, correction, document exchange,
//! DA2062 import/export, component attach/detach) is recorded as one
//! immutable entry. Relational backends link each entry to its predecessor
//! with a SHA-256 hash so that any later modification is detectable:
//!
//! - [`ChainedLedger`] over [`EntryStore`] implementations for SQLite and
//!   PostgreSQL
//! - `ImmudbLedgerService`, delegating integrity to immudb
//! - [`InMemoryLedgerService`] for tests
//!
//! All of them implement [`LedgerService`]; [`open_ledger`] picks one from
//! [`LedgerConfig`] at start-up.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod chain;
pub mod config;
pub mod domain;
mod error;
pub mod event;
pub mod hash;
#[cfg(feature = "immudb")]
pub mod immudb;
pub mod memory;
mod model;
pub mod projection;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
mod sql;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod store;
mod traits;

pub use chain::{AppendMode, ChainSettings, ChainedLedger, DEFAULT_HISTORY_LIMIT};
pub use config::{open_ledger, BackendConfig, LedgerConfig, LoggingConfig};
pub use domain::{CustomEvent, Da2062Import, ImportMethod, MaintenanceRecord, Property, Transfer};
pub use error::{LedgerError, LedgerResult};
pub use event::LedgerEvent;
pub use hash::{calculate_hash, GENESIS_HASH};
pub use memory::InMemoryLedgerService;
pub use model::{
    ChainReport, CorrectionEvent, EntryDraft, GeneralLedgerEvent, HistoryRecord, LedgerEntry,
    NewLedgerEntry,
};
pub use store::EntryStore;
pub use traits::LedgerService;
