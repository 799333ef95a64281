//! RocksDB-backed journal catalog store.
//!
//! Column families:
//! - `metadata`      — schema version + ID allocation counter (merge operator)
//! - `journals`      — primary table, encoded ID → encoded record
//! - `journal_names` — secondary index, encoded sanitized name → encoded ID
//!
//! Lifecycle:
//! ```text
//! Closed ──open()──► Opening ──┬───────────────► Open ──close()──► Closed
//!                              │ stored < latest   ▲
//!                              └──► Migrating ─────┘
//! ```
//!
//! A fresh store seeds `schema.version` with the crate version and the
//! counter with zero. A pre-existing store whose version is behind (or when
//! migration is forced) runs the cumulative per-record upgrade steps before
//! the handle is handed out; a store from the future aborts the open.
//! Migration assumes exclusive access; that is a caller obligation, not an
//! enforced lock.

use std::cmp::Ordering as CmpOrdering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MergeOperands, MultiThreaded,
    Options, WriteBatch, WriteOptions,
};
use semver::Version;
use thiserror::Error;

use crate::codec::{self, CodecError, DbValue};
use crate::events::{DbEvent, EventReceiver, EventSender};
use crate::journal::{Journal, JournalId};
use crate::merge::MergeConflict;
use crate::storage::journals::JournalList;

pub(crate) type Engine = DBWithThreadMode<MultiThreaded>;

pub(crate) const CF_METADATA: &str = "metadata";
pub(crate) const CF_JOURNALS: &str = "journals";
pub(crate) const CF_NAME_INDEX: &str = "journal_names";

const SCHEMA_VERSION_KEY: &[u8] = b"schema.version";
const NEXT_ID_KEY: &[u8] = b"journal_id";

/// Store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying engine failure, propagated unchanged and never retried
    /// here; retry policy belongs to the caller.
    #[error("engine error: {0}")]
    Engine(#[from] rocksdb::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Conflict(#[from] MergeConflict),
    /// The stored schema was written by a newer build; migration is
    /// forward-only.
    #[error("stored schema version {stored} is newer than supported {latest}")]
    SchemaAhead { stored: Version, latest: Version },
    #[error("invalid stored schema version: {0}")]
    SchemaVersion(#[from] semver::Error),
    #[error("column family `{0}` is missing")]
    MissingColumnFamily(&'static str),
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database directory.
    pub path: PathBuf,
    /// Run the schema upgrade even when the stored version is current.
    pub force_migration: bool,
    /// fsync every committed batch instead of relying on the engine WAL.
    pub sync_writes: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            force_migration: false,
            sync_writes: false,
        }
    }
}

/// A per-record transform applied while upgrading through one version bound.
/// Returns whether the record was modified.
type RecordUpgrade = fn(&mut Journal) -> bool;

/// Version-indexed upgrade steps, oldest bound first. A record stored by a
/// schema older than a step's bound passes through that step; steps apply
/// cumulatively.
fn upgrade_steps() -> Vec<(Version, RecordUpgrade)> {
    vec![(Version::new(0, 2, 0), upgrade_pre_0_2_0)]
}

/// Records written before 0.2.0 already carry the current field layout;
/// nothing to rewrite.
fn upgrade_pre_0_2_0(_journal: &mut Journal) -> bool {
    false
}

/// The journal object store.
///
/// Owns the engine handle and the three persisted namespaces. The collection
/// facade ([`JournalList`]) borrows the store and never outlives it. The
/// engine is internally thread-safe; see the crate docs for what the facade
/// does and does not isolate.
pub struct JournalDB {
    engine: Engine,
    config: DbConfig,
    latest_version: Version,
    next_id: AtomicU64,
    event_tx: EventSender,
    event_rx: Mutex<Option<EventReceiver>>,
}

impl JournalDB {
    /// Open (and create if missing) the store at `config.path`.
    ///
    /// Lifecycle events raised during the open are buffered; drain them via
    /// [`take_event_rx`](Self::take_event_rx).
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        let (event_tx, event_rx) = mpsc::channel();
        Self::open_inner(config, event_tx, Some(event_rx))
    }

    /// Open with a caller-owned event sender, so migration progress can be
    /// observed live from another thread.
    pub fn open_with_events(config: DbConfig, events: EventSender) -> Result<Self, DbError> {
        Self::open_inner(config, events, None)
    }

    fn open_inner(
        config: DbConfig,
        event_tx: EventSender,
        event_rx: Option<EventReceiver>,
    ) -> Result<Self, DbError> {
        let latest_version = Version::parse(env!("CARGO_PKG_VERSION"))?;
        let preexisting = config.path.exists();

        let engine =
            Engine::open_cf_descriptors(&Self::engine_options(), &config.path, Self::cf_descriptors())?;
        let db = Self {
            engine,
            config,
            latest_version,
            next_id: AtomicU64::new(0),
            event_tx,
            event_rx: Mutex::new(event_rx),
        };

        if !preexisting {
            log::info!("created journal store at {}", db.config.path.display());
            db.put_metadata(SCHEMA_VERSION_KEY, &DbValue::Str(db.latest_version.to_string()))?;
            db.put_metadata(NEXT_ID_KEY, &DbValue::Int(0))?;
            db.emit(DbEvent::Created { version: db.latest_version.clone() });
        } else {
            let stored = db
                .schema_version()?
                .unwrap_or_else(|| Version::new(0, 0, 0));
            if stored > db.latest_version {
                return Err(DbError::SchemaAhead {
                    stored,
                    latest: db.latest_version.clone(),
                });
            }
            if stored < db.latest_version || db.config.force_migration {
                db.upgrade_schema(stored)?;
            }
        }

        // Recover the allocator from the persisted counter, clamped to the
        // last stored key. A staged-then-dropped batch advances neither, so
        // the counter alone could lag behind a committed ID.
        let persisted = match db.get_metadata(NEXT_ID_KEY)? {
            Some(DbValue::Int(n)) => n,
            _ => 0,
        };
        let after_last = match db.last_journal_id()? {
            Some(JournalId(n)) => n + 1,
            None => 0,
        };
        db.next_id.store(persisted.max(after_last), Ordering::SeqCst);

        Ok(db)
    }

    /// Offline repair of a store directory. Best-effort; full recovery from
    /// corruption is not guaranteed.
    pub fn repair(path: impl AsRef<Path>) -> Result<(), DbError> {
        Ok(Engine::repair(&Self::engine_options(), path)?)
    }

    /// Flush and release the engine handle.
    ///
    /// Consuming `self` makes use-after-close unrepresentable; dropping the
    /// store without calling this is also fine, minus the final flush.
    pub fn close(self) -> Result<(), DbError> {
        self.engine.flush()?;
        Ok(())
    }

    /// The collection facade over this store.
    pub fn journals(&self) -> JournalList<'_> {
        JournalList::new(self)
    }

    /// Database directory.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Schema version recorded in the metadata namespace.
    pub fn schema_version(&self) -> Result<Option<Version>, DbError> {
        match self.get_metadata(SCHEMA_VERSION_KEY)? {
            Some(DbValue::Str(s)) => Ok(Some(Version::parse(&s)?)),
            Some(_) => Err(DbError::Codec(CodecError::Malformed {
                expected: "schema version string",
            })),
            None => Ok(None),
        }
    }

    /// The schema version this build writes.
    pub fn latest_schema_version(&self) -> &Version {
        &self.latest_version
    }

    /// Take the receiver for lifecycle events. `None` after the first take,
    /// or when the store was opened with a caller-owned sender.
    pub fn take_event_rx(&self) -> Option<EventReceiver> {
        self.event_rx.lock().ok()?.take()
    }

    // ─── Schema migration ────────────────────────────────────────────────────

    fn upgrade_schema(&self, from: Version) -> Result<(), DbError> {
        let journals = self.journals();
        let total = journals.len()? as u64;
        log::info!(
            "upgrading schema from {from} to {} ({total} records)",
            self.latest_version
        );
        self.emit(DbEvent::UpgradeStarted {
            from: from.clone(),
            to: self.latest_version.clone(),
            total,
        });

        let steps: Vec<RecordUpgrade> = upgrade_steps()
            .into_iter()
            .filter(|(bound, _)| from < *bound)
            .map(|(_, step)| step)
            .collect();

        // The iterator reads a consistent engine snapshot, so records can be
        // written back mid-scan.
        let mut processed = 0u64;
        let mut updated = 0u64;
        for entry in journals.iter()? {
            let (id, mut journal) = entry?;
            let mut changed = false;
            for step in &steps {
                changed |= step(&mut journal);
            }
            if changed {
                journals.update(id, &journal, None)?;
                updated += 1;
            }
            processed += 1;
            self.emit(DbEvent::UpgradeProgress { processed, updated });
        }

        self.put_metadata(SCHEMA_VERSION_KEY, &DbValue::Str(self.latest_version.to_string()))?;
        self.emit(DbEvent::UpgradeFinished {
            to: self.latest_version.clone(),
            total,
        });
        log::info!("schema upgrade finished at {}", self.latest_version);
        Ok(())
    }

    // ─── Internals shared with the facade ────────────────────────────────────

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>, DbError> {
        self.engine
            .cf_handle(name)
            .ok_or(DbError::MissingColumnFamily(name))
    }

    /// Hand out the next ID and stage `merge +1` on the counter key in the
    /// same batch as the record write, so an ID is never consumed without its
    /// record committing alongside it.
    pub(crate) fn allocate_id(&self, batch: &mut WriteBatch) -> Result<JournalId, DbError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cf = self.cf(CF_METADATA)?;
        batch.merge_cf(&cf, NEXT_ID_KEY, codec::encode_uint(1)?);
        Ok(JournalId(id))
    }

    /// Commit an atomic batch, typically one composed through the facade's
    /// `*_to_batch` operations. All-or-nothing.
    pub fn commit(&self, batch: WriteBatch) -> Result<(), DbError> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        self.engine.write_opt(batch, &opts)?;
        Ok(())
    }

    pub(crate) fn emit(&self, event: DbEvent) {
        // Lifecycle events are advisory; a dropped receiver is not an error.
        let _ = self.event_tx.send(event);
    }

    /// Highest ID present in the primary table.
    fn last_journal_id(&self) -> Result<Option<JournalId>, DbError> {
        let cf = self.cf(CF_JOURNALS)?;
        match self.engine.iterator_cf(&cf, rocksdb::IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(codec::decode_id(&key)?))
            }
            None => Ok(None),
        }
    }

    fn get_metadata(&self, key: &[u8]) -> Result<Option<DbValue>, DbError> {
        let cf = self.cf(CF_METADATA)?;
        match self.engine.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(codec::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_metadata(&self, key: &[u8], value: &DbValue) -> Result<(), DbError> {
        let cf = self.cf(CF_METADATA)?;
        self.engine.put_cf(&cf, key, codec::encode_value(value)?)?;
        Ok(())
    }

    // ─── Engine options ──────────────────────────────────────────────────────

    fn engine_options() -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts
    }

    fn cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
        vec![
            ColumnFamilyDescriptor::new(CF_METADATA, Self::metadata_cf_options()),
            ColumnFamilyDescriptor::new(CF_JOURNALS, Self::journals_cf_options()),
            ColumnFamilyDescriptor::new(CF_NAME_INDEX, Self::name_index_cf_options()),
        ]
    }

    fn metadata_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_merge_operator_associative("counter_add", counter_merge);
        opts
    }

    fn journals_cf_options() -> Options {
        let mut opts = Options::default();
        // Point lookups dominate; scans only happen for non-name queries,
        // reserialization, and migration.
        opts.optimize_for_point_lookup(8 * 1024 * 1024);
        opts
    }

    pub(crate) fn name_index_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_comparator("journal_name_cmp", Box::new(name_key_compare));
        opts
    }
}

/// Associative merge for the allocation counter: decode and sum. Operands the
/// codec cannot read count as zero rather than poisoning the key.
fn counter_merge(
    _key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut total = existing
        .and_then(|bytes| codec::decode_uint(bytes).ok())
        .unwrap_or(0);
    for operand in operands.iter() {
        total = total.saturating_add(codec::decode_uint(operand).ok().unwrap_or(0));
    }
    codec::encode_uint(total).ok()
}

/// Orders encoded string keys by the decoded string's natural order. The
/// packed form prefixes a length marker, so raw byte order would not agree
/// with text order across length classes; undecodable keys fall back to byte
/// order.
fn name_key_compare(a: &[u8], b: &[u8]) -> CmpOrdering {
    match (codec::decode_str(a), codec::decode_str(b)) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
