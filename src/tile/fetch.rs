//! Tile fetch coordination.
//!
//! The coordinator owns every in-flight tile fetch. It guarantees at most one
//! live operation per [`TileIndex`], shares that operation between duplicate
//! requests, and makes cancellation first-class.
//!
//! # Architecture
//!
//! ```text
//!  request(a) ─┐                         ┌──────────────┐
//!              ├──► in_flight[a] ──────► │ worker task  │──► TileDataSource
//!  request(a) ─┘   (one operation)       └──────┬───────┘
//!                                               │ finish (under in_flight lock)
//!                      ┌────────────────────────┼───────────────────┐
//!                      ▼                        ▼                   ▼
//!                  TileCache              FetchHandle(s)      FetchEvent queue
//! ```
//!
//! # Cancellation
//!
//! Cancellation is cooperative. `cancel` removes the operation and fires its
//! token; the worker aborts the fetch task at its next await point. A fetch
//! that panics fails its operation like any other source error.
//! If the fetch finishes anyway, its result is discarded: no cache write, no
//! event. The in-flight map lock is held while a result is committed, so a
//! cancel either happens entirely before the commit or has nothing to cancel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::FetchError;
use crate::geometry::TileIndex;
use crate::source::TileDataSource;

use super::bitmap::TileBitmap;
use super::cache::TileCache;

// =============================================================================
// Outcomes and Events
// =============================================================================

/// Identifies one fetch operation. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Final state of a fetch operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(TileBitmap),
    Failed(FetchError),
    Cancelled,
}

/// Completion notice delivered to the control thread.
///
/// Only operations that were still live when they finished produce an
/// event, so `outcome` is never [`FetchOutcome::Cancelled`].
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub index: TileIndex,
    pub operation: OperationId,
    pub outcome: FetchOutcome,
}

/// Counters describing coordinator activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    /// Calls to `request`
    pub requests: u64,
    /// Requests that joined an operation already in flight
    pub coalesced: u64,
    /// Operations started against the data source
    pub started: u64,
    /// Operations that loaded a bitmap
    pub completed: u64,
    /// Operations that failed
    pub failed: u64,
    /// Operations cancelled before committing
    pub cancelled: u64,
    /// Results that arrived after their operation was cancelled
    pub discarded: u64,
}

impl FetchStats {
    /// Fraction of requests served by an existing operation (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.requests as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    coalesced: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Fetch Handle
// =============================================================================

/// A view of one in-flight fetch.
///
/// Every handle for the same operation observes the same outcome. Dropping
/// a handle does not cancel the fetch.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    index: TileIndex,
    operation: OperationId,
    token: CancellationToken,
    status: watch::Receiver<Option<FetchOutcome>>,
}

impl FetchHandle {
    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }

    /// Request cancellation of the shared operation.
    ///
    /// This cancels it for every holder. Prefer
    /// [`TileFetchCoordinator::cancel`], which also unregisters it at once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The outcome, if the operation has finished.
    pub fn try_outcome(&self) -> Option<FetchOutcome> {
        self.status.borrow().clone()
    }

    /// Wait for the operation to finish.
    pub async fn outcome(&mut self) -> FetchOutcome {
        match self.status.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(FetchOutcome::Cancelled),
            // The operation was dropped without publishing a result
            Err(_) => FetchOutcome::Cancelled,
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Operation {
    id: OperationId,
    token: CancellationToken,
    status: watch::Sender<Option<FetchOutcome>>,
}

impl Operation {
    fn handle(&self, index: TileIndex) -> FetchHandle {
        FetchHandle {
            index,
            operation: self.id,
            token: self.token.clone(),
            status: self.status.subscribe(),
        }
    }

    fn resolve(self, outcome: FetchOutcome) {
        self.status.send_replace(Some(outcome));
    }
}

struct Shared {
    source: RwLock<Arc<dyn TileDataSource>>,
    cache: Arc<TileCache>,
    in_flight: Mutex<HashMap<TileIndex, Operation>>,
    events: mpsc::UnboundedSender<FetchEvent>,
    next_id: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<TileIndex, Operation>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn source(&self) -> Arc<dyn TileDataSource> {
        Arc::clone(&self.source.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Commit or discard the result of operation `id`.
    fn finish(
        &self,
        index: TileIndex,
        id: OperationId,
        result: Option<Result<TileBitmap, FetchError>>,
    ) {
        let mut in_flight = self.in_flight();

        let live = matches!(in_flight.get(&index), Some(op) if op.id == id);
        if !live {
            // Cancelled and unregistered; the handles were already resolved
            if result.is_some() {
                Counters::bump(&self.counters.discarded);
                debug!(%index, operation = %id, "Discarding result of cancelled fetch");
            }
            return;
        }

        let Some(op) = in_flight.remove(&index) else {
            return;
        };

        let result = match result {
            Some(result) if !op.token.is_cancelled() => result,
            other => {
                // Cancelled through a handle: unregister without committing
                if other.is_some() {
                    Counters::bump(&self.counters.discarded);
                }
                Counters::bump(&self.counters.cancelled);
                debug!(%index, operation = %id, "Fetch cancelled");
                op.resolve(FetchOutcome::Cancelled);
                return;
            }
        };

        let outcome = match result {
            Ok(bitmap) => {
                debug_assert_eq!(bitmap.index(), index, "data source returned the wrong tile");
                self.cache.put(index, bitmap.clone());
                Counters::bump(&self.counters.completed);
                trace!(%index, operation = %id, bytes = bitmap.len(), "Tile loaded");
                FetchOutcome::Loaded(bitmap)
            }
            Err(error) => {
                Counters::bump(&self.counters.failed);
                warn!(%index, operation = %id, %error, "Tile fetch failed");
                FetchOutcome::Failed(error)
            }
        };

        // The receiver lives as long as the engine; a send error only means
        // nobody is listening any more.
        let _ = self.events.send(FetchEvent {
            index,
            operation: id,
            outcome: outcome.clone(),
        });
        op.resolve(outcome);
    }
}

/// Tracks and de-duplicates asynchronous tile fetches.
///
/// # Example
///
/// ```ignore
/// let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
/// let coordinator = TileFetchCoordinator::new(source, cache, events_tx);
///
/// let mut handle = coordinator.request(TileIndex::new(3, 0, 0));
/// let again = coordinator.request(TileIndex::new(3, 0, 0)); // same operation
/// assert_eq!(handle.operation(), again.operation());
///
/// let outcome = handle.outcome().await;
/// ```
pub struct TileFetchCoordinator {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl TileFetchCoordinator {
    /// Create a coordinator that spawns fetches on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime. Use
    /// [`with_runtime`](Self::with_runtime) to construct one from a plain
    /// thread.
    pub fn new(
        source: Arc<dyn TileDataSource>,
        cache: Arc<TileCache>,
        events: mpsc::UnboundedSender<FetchEvent>,
    ) -> Self {
        Self::with_runtime(source, cache, events, Handle::current())
    }

    /// Create a coordinator that spawns fetches on `runtime`.
    pub fn with_runtime(
        source: Arc<dyn TileDataSource>,
        cache: Arc<TileCache>,
        events: mpsc::UnboundedSender<FetchEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source: RwLock::new(source),
                cache,
                in_flight: Mutex::new(HashMap::new()),
                events,
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
            runtime,
        }
    }

    /// Start fetching a tile, or join the fetch already in flight for it.
    ///
    /// Returns immediately; the fetch runs on the runtime.
    pub fn request(&self, index: TileIndex) -> FetchHandle {
        let shared = &self.shared;
        Counters::bump(&shared.counters.requests);

        let mut in_flight = shared.in_flight();
        if let Some(op) = in_flight.get(&index) {
            if !op.token.is_cancelled() {
                Counters::bump(&shared.counters.coalesced);
                trace!(%index, operation = %op.id, "Joining in-flight fetch");
                return op.handle(index);
            }
        }

        let id = OperationId(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        let (status, _) = watch::channel(None);
        let op = Operation {
            id,
            token: token.clone(),
            status,
        };
        let handle = op.handle(index);

        if let Some(stale) = in_flight.insert(index, op) {
            // Cancelled through a handle but not yet reaped by its worker,
            // which will now find it unregistered
            Counters::bump(&shared.counters.cancelled);
            debug!(%index, operation = %stale.id, "Fetch cancelled");
            stale.resolve(FetchOutcome::Cancelled);
        }
        drop(in_flight);

        Counters::bump(&shared.counters.started);
        debug!(%index, operation = %id, "Starting tile fetch");

        // Separate task so a panicking source surfaces as a `JoinError`
        let source = shared.source();
        let fetch = self
            .runtime
            .spawn(async move { source.fetch_tile(index).await });
        let worker = Arc::clone(shared);
        self.runtime.spawn(async move {
            let abort = fetch.abort_handle();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    abort.abort();
                    None
                }
                joined = fetch => match joined {
                    Ok(result) => Some(result),
                    Err(err) if err.is_panic() => {
                        warn!(%index, operation = %id, error = %err, "Tile fetch panicked");
                        Some(Err(FetchError::Source("fetch task panicked".to_string())))
                    }
                    Err(_) => None,
                },
            };
            worker.finish(index, id, result);
        });

        handle
    }

    /// Cancel the in-flight fetch for `index`.
    ///
    /// Returns `false` if nothing was in flight.
    pub fn cancel(&self, index: TileIndex) -> bool {
        let Some(op) = self.shared.in_flight().remove(&index) else {
            return false;
        };
        op.token.cancel();
        Counters::bump(&self.shared.counters.cancelled);
        debug!(%index, operation = %op.id, "Cancelled tile fetch");
        op.resolve(FetchOutcome::Cancelled);
        true
    }

    /// Cancel every in-flight fetch without waiting for any of them.
    ///
    /// Returns the number of operations cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Operation> = {
            let mut in_flight = self.shared.in_flight();
            in_flight.drain().map(|(_, op)| op).collect()
        };
        let count = drained.len();
        for op in drained {
            op.token.cancel();
            Counters::bump(&self.shared.counters.cancelled);
            op.resolve(FetchOutcome::Cancelled);
        }
        if count > 0 {
            debug!(count, "Cancelled all tile fetches");
        }
        count
    }

    /// Swap the data source used by future requests.
    ///
    /// Operations already in flight keep the source they started with.
    pub fn set_source(&self, source: Arc<dyn TileDataSource>) {
        *self
            .shared
            .source
            .write()
            .unwrap_or_else(PoisonError::into_inner) = source;
    }

    pub fn is_in_flight(&self, index: TileIndex) -> bool {
        self.shared.in_flight().contains_key(&index)
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight().len()
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.shared.cache
    }

    pub fn stats(&self) -> FetchStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for TileFetchCoordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// =============================================================================
// Tests
// =============================================================================
