//! # jabbrev-db — persistent catalog of journal abbreviations
//!
//! Stores bibliographic journal records (display-name variants, ISO 4 and
//! CODEN abbreviations, ISSNs) with fast lookup by name, safe reconciliation
//! of records arriving from multiple untrusted producers, and forward-only
//! schema evolution.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  Journal values   ┌──────────────┐
//! │ producers    │ ────────────────► │ JournalList  │
//! │ (sources)    │   add/update/     │ (facade)     │
//! └──────────────┘   merge           └──────┬───────┘
//!                                           │ codec + merge engine
//! ┌──────────────┐   get / query            ▼
//! │ consumers    │ ◄──────────────── ┌──────────────┐
//! │ (CLI, bib)   │                   │ JournalDB    │
//! └──────────────┘   DbEvent channel │ (RocksDB)    │
//!                                    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`journal`] — the record model, static field table, query predicates
//! - [`codec`] — MessagePack codec with set and record extension types
//! - [`merge`] — three-way reconciliation that never silently drops data
//! - [`storage`] — the object store and the collection facade
//! - [`events`] — typed lifecycle notifications
//! - [`source`] — producer boundary trait and cooperative cancellation
//!
//! ## Concurrency
//!
//! The engine is internally thread-safe and ID allocation is race-free by
//! construction (atomic counter plus a commutative engine merge in the same
//! batch as the record write). The facade adds no isolation beyond a single
//! atomic batch: when `update`/`merge` read the previous record themselves,
//! that read can race with concurrent writers of the same ID. Callers that
//! need strict consistency supply the batch and perform the read inside
//! their own critical section.

pub mod codec;
pub mod events;
pub mod journal;
pub mod merge;
pub mod source;
pub mod storage;

pub use codec::{CodecError, DbValue};
pub use events::{DbEvent, EventReceiver, EventSender};
pub use journal::{FieldKind, FieldSpec, Journal, JournalId, Query};
pub use merge::{merge_journals, merge_values, MergeConflict};
pub use source::{CancelToken, JournalSource, SourceError};
pub use storage::{sanitize_name, DbConfig, DbError, JournalDB, JournalList, WriteBatch};
