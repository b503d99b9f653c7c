//! Service lifecycle: build-or-load with a process-wide single instance,
//! and a bounded, cancellable wait for the corpus to appear.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, never};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::Settings;
use crate::corpus;
use crate::embedding::EmbeddingEncoder;
use crate::error::{SearchError, SearchResult};
use crate::service::CatalogSearchService;
use crate::storage::Snapshot;

/// Cancels a pending wait. Dropping the handle also cancels: the closed
/// channel reads as a cancellation signal.
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(());
    }
}

/// Receiving side observed by waiting code.
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// A token that never fires, for callers with nothing to cancel.
    #[must_use]
    pub fn none() -> Self {
        Self { rx: never() }
    }

    /// Sleep for `timeout` unless cancelled first. Returns true when
    /// cancelled.
    fn cancelled_within(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Create a linked cancellation pair.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(1);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Wait for a file to exist, checking up to `max_attempts` times with
/// `interval` between checks.
pub fn wait_for_file(
    path: &Path,
    interval: Duration,
    max_attempts: u32,
    token: &CancelToken,
) -> SearchResult<()> {
    for attempt in 1..=max_attempts {
        if path.exists() {
            return Ok(());
        }
        warn!(
            attempt,
            max_attempts,
            path = %path.display(),
            "corpus not present yet"
        );
        if token.cancelled_within(interval) {
            return Err(SearchError::WaitCancelled);
        }
    }
    if path.exists() {
        return Ok(());
    }
    Err(SearchError::CorpusMissing {
        path: path.to_path_buf(),
    })
}

/// Holds at most one service instance; concurrent callers share it.
///
/// The slot lock is held across the whole build, so a second caller
/// blocks until the first finishes and then receives the same instance.
/// A failed build releases the lock and leaves the slot empty, so the
/// next caller retries.
#[derive(Default)]
pub struct ServiceCell {
    slot: Mutex<Option<Arc<CatalogSearchService>>>,
}

impl ServiceCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current instance, if one has been built.
    #[must_use]
    pub fn get(&self) -> Option<Arc<CatalogSearchService>> {
        self.slot.lock().clone()
    }

    /// Return the existing instance or build/load one.
    pub fn get_or_init(
        &self,
        settings: &Settings,
        encoder: Arc<dyn EmbeddingEncoder>,
        token: &CancelToken,
    ) -> SearchResult<Arc<CatalogSearchService>> {
        let mut slot = self.slot.lock();
        if let Some(service) = slot.as_ref() {
            return Ok(service.clone());
        }
        let service = Arc::new(build_or_load(settings, encoder, token)?);
        *slot = Some(service.clone());
        Ok(service)
    }
}

/// Load the snapshot when a compatible one exists; otherwise wait for
/// the corpus, build from scratch, and persist.
fn build_or_load(
    settings: &Settings,
    encoder: Arc<dyn EmbeddingEncoder>,
    token: &CancelToken,
) -> SearchResult<CatalogSearchService> {
    let snapshot = Snapshot::new(settings.storage_path.clone());

    if snapshot.exists() {
        match snapshot.load() {
            Ok(loaded) => {
                return CatalogSearchService::from_snapshot(loaded, encoder, &settings.index);
            }
            Err(e) => {
                warn!(error = %e, "snapshot rejected, rebuilding from corpus");
            }
        }
    }

    wait_for_file(
        &settings.corpus.path,
        Duration::from_millis(settings.corpus.wait_interval_ms),
        settings.corpus.wait_max_attempts,
        token,
    )?;

    let entries = corpus::load_entries(&settings.corpus.path)?;
    let service = CatalogSearchService::build(entries, encoder, &settings.index)?;
    service.persist(&snapshot, &settings.embedding.model)?;
    info!(entries = service.entry_count(), "built and persisted new index");
    Ok(service)
}
