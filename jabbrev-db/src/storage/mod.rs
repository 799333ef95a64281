//! Persistent storage layer: the object store and its collection facade.
//!
//! ```text
//! ┌──────────────┐   borrows   ┌──────────────────────────────────┐
//! │ JournalList  │ ──────────► │ JournalDB (RocksDB)              │
//! │ (facade)     │             │                                  │
//! └──────────────┘             │ CF "metadata"      version + ctr │
//!                              │ CF "journals"      id → record   │
//!                              │ CF "journal_names" name → id     │
//!                              └──────────────────────────────────┘
//! ```
//!
//! The store exclusively owns the engine handle and the on-disk layout;
//! the facade composes codec, record model, and merge engine on top of it.

pub mod db;
pub mod journals;

pub use db::{DbConfig, DbError, JournalDB};
pub use journals::{sanitize_name, JournalList};

// Callers composing multi-step transactions stage into the engine's batch
// type directly.
pub use rocksdb::WriteBatch;
