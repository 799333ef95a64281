//! Producer boundary: where acquisition collaborators hand records to the
//! store.
//!
//! Site-specific acquisition (HTML table walking, PDF text reconstruction)
//! lives outside this crate; it only has to implement [`JournalSource`]. The
//! sequence a source yields is lazy, finite, and not deduplicated. Callers
//! dedup via a names query before adding, and own the [`CancelToken`] they
//! pass in, so one orchestrator can wind down several sources at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::journal::Journal;

/// A producer-side failure (network, parse, layout drift).
#[derive(Debug, Clone, Error)]
#[error("source `{source}` failed: {message}")]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Cooperative cancellation flag, owned by the caller orchestrating fetches.
///
/// Clones share the flag. Sources poll [`is_canceled`](Self::is_canceled)
/// between yielded items and always finish the item in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A lazy, finite stream of journal records from one acquisition site.
pub trait JournalSource {
    /// Short identifier for logs and progress reporting.
    fn name(&self) -> &str;

    /// Yield records until the source is exhausted or `cancel` fires.
    fn fetch<'a>(
        &'a mut self,
        cancel: &'a CancelToken,
    ) -> Box<dyn Iterator<Item = Result<Journal, SourceError>> + 'a>;
}
