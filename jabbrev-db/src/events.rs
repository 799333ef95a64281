//! Typed lifecycle notifications emitted by the store.
//!
//! Events are delivered over a channel rather than callbacks, so consumers
//! (progress bars, log sinks) can observe store creation and schema upgrades
//! without polling. Events emitted while `open()` runs are buffered by the
//! unbounded channel; a caller that wants them live passes its own sender via
//! [`crate::JournalDB::open_with_events`] and drains from another thread.

use semver::Version;

/// Sender half used by the store to publish [`DbEvent`]s.
pub type EventSender = std::sync::mpsc::Sender<DbEvent>;

/// Receiver half handed to consumers.
pub type EventReceiver = std::sync::mpsc::Receiver<DbEvent>;

/// A store lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEvent {
    /// A fresh store was created and seeded with the given schema version.
    Created { version: Version },
    /// A schema upgrade began: stored version, target version, and the number
    /// of records it will visit.
    UpgradeStarted {
        from: Version,
        to: Version,
        total: u64,
    },
    /// One record was visited; `updated` counts records actually rewritten.
    UpgradeProgress { processed: u64, updated: u64 },
    /// The upgrade finished and the new schema version is persisted.
    UpgradeFinished { to: Version, total: u64 },
}
