//! Async Staleness Coordinator
//!
//! Reactive triggers frequently fan out into network fetches, and the
//! fetches race against further state changes: a user can re-select a bin
//! before the previous bin's contigs have finished loading. Without a
//! guard, the late response lands on top of the newer one and the view
//! silently shows stale or duplicated rows.
//!
//! The [`Coordinator`] closes that hole with generation tokens. Every
//! trigger increments the coordinator's generation and captures it; when a
//! response completes, it is applied only if its captured generation is
//! still the current one. A superseded response is discarded without any
//! state mutation; that is not an error, just an absence of effect.
//!
//! There is no true cancellation: the underlying request keeps running,
//! fire-and-forget, and only its completion is gated.
//!
//! Per trigger the lifecycle is `Idle → Pending(g) → Applied |
//! DiscardedStale | Failed`; failures surface to the awaiting caller with
//! state untouched, and never wedge the generation counter: the next
//! trigger simply claims the next generation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::diff::{diff, ChangeEvent, DiffError, Keyed};
use crate::reactive::{Cell, Readable};

/// Error returned by the external data service.
///
/// The core owns no wire format; it only distinguishes HTTP-status-shaped
/// rejections from transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The service answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced an answer.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outcome of one coordinated fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus<T> {
    /// The response was current and its payload may be applied.
    Applied(T),

    /// A newer trigger superseded this fetch; the response was dropped
    /// without side effects. Not an error.
    DiscardedStale,

    /// The fetch failed; no state was touched. Retrying claims a fresh
    /// generation.
    Failed(FetchError),
}

impl<T> FetchStatus<T> {
    /// Unwrap into a `Result`, folding `DiscardedStale` into `Ok(None)`.
    pub fn into_result(self) -> Result<Option<T>, FetchError> {
        match self {
            FetchStatus::Applied(value) => Ok(Some(value)),
            FetchStatus::DiscardedStale => Ok(None),
            FetchStatus::Failed(err) => Err(err),
        }
    }
}

/// A captured generation token. Older tokens are permanently stale once a
/// newer one has been issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// Generation bookkeeping for one logical async derivation (for example
/// "contigs of the currently selected bin").
///
/// Cloning shares the counter, so a trigger in one task invalidates
/// in-flight fetches awaited by another.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    current: Arc<AtomicU64>,
}

impl Coordinator {
    /// Create a coordinator with no trigger issued yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new trigger: supersede all in-flight fetches and capture the
    /// fresh generation.
    pub fn begin(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether the captured generation is still the current one.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current.load(Ordering::SeqCst) == generation.0
    }

    /// Drive one fetch under a fresh generation.
    ///
    /// Staleness wins over failure: a response that was superseded while in
    /// flight is discarded whether it succeeded or not.
    pub async fn run<T, Fut>(&self, fetch: Fut) -> FetchStatus<T>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let generation = self.begin();
        let result = fetch.await;
        self.settle(generation, result)
    }

    /// Drive two parallel sub-fetches as one logical unit.
    ///
    /// Both must succeed for the unit to be applied; one failure fails the
    /// whole unit and nothing is applied.
    pub async fn run_joined<A, B, FutA, FutB>(&self, a: FutA, b: FutB) -> FetchStatus<(A, B)>
    where
        FutA: Future<Output = Result<A, FetchError>>,
        FutB: Future<Output = Result<B, FetchError>>,
    {
        let generation = self.begin();
        let result = futures_util::future::try_join(a, b).await;
        self.settle(generation, result)
    }

    fn settle<T>(&self, generation: Generation, result: Result<T, FetchError>) -> FetchStatus<T> {
        if !self.is_current(generation) {
            debug!(generation = generation.0, "discarding stale response");
            return FetchStatus::DiscardedStale;
        }
        match result {
            Ok(value) => FetchStatus::Applied(value),
            Err(err) => FetchStatus::Failed(err),
        }
    }
}

/// A keyed collection kept in sync with a remote query.
///
/// Binds a [`Coordinator`] to a target cell; applied responses are merged
/// through the differ so subscribers receive a change script instead of a
/// wholesale replacement.
#[derive(Debug, Clone)]
pub struct CollectionQuery<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    coordinator: Coordinator,
    target: Cell<Vec<T>>,
}

impl<T> CollectionQuery<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    /// Bind a coordinator to the cell holding the collection.
    pub fn new(target: Cell<Vec<T>>) -> Self {
        Self {
            coordinator: Coordinator::new(),
            target,
        }
    }

    /// The underlying coordinator, for sharing with related triggers.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// The cell the collection lives in.
    pub fn target(&self) -> &Cell<Vec<T>> {
        &self.target
    }

    /// Fetch a fresh copy of the collection and merge it into the target.
    ///
    /// On a current, successful response the target is updated and the
    /// change script that transforms the previous collection into the new
    /// one is returned. Stale and failed responses leave the target
    /// untouched.
    pub async fn refresh<Fut>(
        &self,
        fetch: Fut,
    ) -> Result<FetchStatus<Vec<ChangeEvent<T>>>, DiffError>
    where
        Fut: Future<Output = Result<Vec<T>, FetchError>>,
    {
        match self.coordinator.run(fetch).await {
            FetchStatus::Applied(items) => {
                let previous = self.target.peek();
                let script = diff(&previous, &items)?;
                if !script.is_empty() {
                    self.target.set(items);
                }
                Ok(FetchStatus::Applied(script))
            }
            FetchStatus::DiscardedStale => Ok(FetchStatus::DiscardedStale),
            FetchStatus::Failed(err) => Ok(FetchStatus::Failed(err)),
        }
    }
}

/// Paginated response envelope used by collection endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    #[serde(default)]
    pub page_info: PageInfo,
}

/// Position of a page within the full result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub index: u64,
    pub per_page: u64,
}

/// Spawn a fire-and-forget mutation.
///
/// The success callback typically feeds a `Cell::set`; failures are logged
/// and otherwise dropped, matching the one-way nature of mutation
/// endpoints.
pub fn fire_and_forget<T, Fut, F>(fut: Fut, on_success: F) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    tokio::spawn(async move {
        match fut.await {
            Ok(value) => on_success(value),
            Err(err) => warn!(error = %err, "mutation request failed"),
        }
    })
}
