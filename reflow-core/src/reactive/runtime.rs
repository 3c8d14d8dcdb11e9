//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells and computeds.
//! It owns the dependency graph, the evaluation stack used for automatic
//! dependency tracking, and the propagation scheduler that turns a set of
//! cell writes into one glitch-free update pulse.
//!
//! # How a pulse works
//!
//! 1. One or more `Cell::set` calls record their node as pending. Writes
//!    issued inside `Runtime::batch`, inside a running pulse, or inside an
//!    active evaluation are deferred; everything else flushes immediately.
//!
//! 2. A flush drains the pending set and runs a pulse: all derived nodes
//!    transitively downstream of the written cells are marked maybe-dirty
//!    and topologically sorted, so every producer settles before any of its
//!    consumers.
//!
//! 3. Each affected computed is re-evaluated at most once, and only if one
//!    of its direct producers actually changed value. A computed whose
//!    output compares equal to its previous value does not propagate
//!    further (its consumers stay clean).
//!
//! 4. After derived state settles, external subscribers of every changed
//!    node are notified exactly once, seeing only the pulse's final values.
//!
//! 5. Writes that arrived while the pulse ran are coalesced into a
//!    follow-up pulse. Cascades are bounded; overflow is reported through
//!    `tracing::error` rather than looping forever.
//!
//! # Threading
//!
//! The runtime is driven by a single logical thread of control; propagation
//! never interleaves with another pulse. Shared state still sits behind
//! locks so handles are `Send + Sync` and can be captured by async tasks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, error, trace};

use super::graph::DepGraph;
use super::node::{DirtyState, Node, NodeId};

/// Upper bound on follow-up pulses triggered by writes issued during a
/// pulse. A cascade this deep means two reactive values keep writing each
/// other back and forth.
const MAX_CASCADES: usize = 64;

/// Errors raised by the reactive graph itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed transitively reads its own output. Structural programming
    /// error: the offending evaluation is aborted, the rest of the graph is
    /// untouched.
    #[error("dependency cycle detected at node {node:?}")]
    CycleDetected {
        /// The node that re-entered its own evaluation.
        node: NodeId,
    },
}

/// Internal capability of a derived node: re-run its derivation and report
/// whether the cached output changed.
pub(crate) trait Recompute: Send + Sync {
    fn recompute(&self) -> Result<bool, ReactiveError>;
}

/// One entry of the evaluation stack: the node currently evaluating and the
/// producers it has read so far.
struct Frame {
    node: NodeId,
    reads: SmallVec<[NodeId; 8]>,
}

struct Inner {
    graph: Mutex<DepGraph>,
    /// Stack of in-progress evaluations; empty between pulses.
    eval: Mutex<Vec<Frame>>,
    /// Derived nodes by ID. Weak so dropping a `Computed` is enough to
    /// retire it; the graph node itself is removed by the handle's Drop.
    derived: Mutex<HashMap<NodeId, Weak<dyn Recompute>>>,
    /// External subscriber callbacks per node.
    watchers: Mutex<HashMap<NodeId, Vec<(u64, Arc<dyn Fn() + Send + Sync>)>>>,
    watcher_ids: AtomicU64,
    batch_depth: AtomicUsize,
    in_pulse: AtomicBool,
    /// Source nodes written since the last pulse.
    pending: Mutex<IndexSet<NodeId>>,
}

/// Handle to one reactive state space.
///
/// All cells and computeds are created against a runtime; values from
/// different runtimes do not see each other. Cloning is cheap and shares
/// the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Create a new empty runtime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                graph: Mutex::new(DepGraph::new()),
                eval: Mutex::new(Vec::new()),
                derived: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
                watcher_ids: AtomicU64::new(0),
                batch_depth: AtomicUsize::new(0),
                in_pulse: AtomicBool::new(false),
                pending: Mutex::new(IndexSet::new()),
            }),
        }
    }

    /// Run `f`, coalescing all cell writes inside it into a single pulse.
    ///
    /// Subscribers observe only the batch's final state, and each dependent
    /// computed settles at most once. Batches nest; the pulse runs when the
    /// outermost batch ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);

        struct Guard<'a>(&'a Runtime);
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                if self.0.inner.batch_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
                    self.0.flush();
                }
            }
        }

        let _guard = Guard(self);
        f()
    }

    /// Get the total number of nodes currently in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.graph.lock().node_count()
    }

    // ------------------------------------------------------------------
    // Node registration
    // ------------------------------------------------------------------

    pub(crate) fn add_source(&self) -> NodeId {
        self.inner.graph.lock().add_node(Node::source())
    }

    pub(crate) fn add_derived(&self) -> NodeId {
        self.inner.graph.lock().add_node(Node::derived())
    }

    pub(crate) fn register_recomputer(&self, id: NodeId, recomputer: Weak<dyn Recompute>) {
        self.inner.derived.lock().insert(id, recomputer);
    }

    /// Retire a node: erase every edge it produced and consumed, its
    /// recompute hook, its watchers and any pending write.
    pub(crate) fn remove_node(&self, id: NodeId) {
        self.inner.graph.lock().remove_node(id);
        self.inner.derived.lock().remove(&id);
        self.inner.watchers.lock().remove(&id);
        self.inner.pending.lock().shift_remove(&id);
    }

    // ------------------------------------------------------------------
    // Dependency tracking
    // ------------------------------------------------------------------

    /// Record a read of `id` in the innermost active evaluation, if any.
    pub(crate) fn track_read(&self, id: NodeId) {
        if let Some(frame) = self.inner.eval.lock().last_mut() {
            if !frame.reads.contains(&id) {
                frame.reads.push(id);
            }
        }
    }

    /// Open an evaluation frame for `id`.
    ///
    /// Fails if `id` is already somewhere on the stack, which means the
    /// derivation transitively reads its own output.
    pub(crate) fn begin_eval(&self, id: NodeId) -> Result<(), ReactiveError> {
        let mut eval = self.inner.eval.lock();
        if eval.iter().any(|frame| frame.node == id) {
            return Err(ReactiveError::CycleDetected { node: id });
        }
        eval.push(Frame {
            node: id,
            reads: SmallVec::new(),
        });
        Ok(())
    }

    /// Close the evaluation frame for `id`, returning the reads it observed.
    pub(crate) fn end_eval(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
        let mut eval = self.inner.eval.lock();
        match eval.pop() {
            Some(frame) => {
                debug_assert_eq!(frame.node, id, "evaluation stack mismatch");
                frame.reads
            }
            None => SmallVec::new(),
        }
    }

    /// Discard the frame for `id` after a failed evaluation, leaving the
    /// node's previous edge set intact.
    pub(crate) fn abort_eval(&self, id: NodeId) {
        let mut eval = self.inner.eval.lock();
        if eval.last().map_or(false, |frame| frame.node == id) {
            eval.pop();
        }
    }

    /// Replace a consumer's edges with the reads from its latest evaluation.
    pub(crate) fn commit_reads(&self, consumer: NodeId, reads: &[NodeId]) {
        let set: IndexSet<NodeId> = reads.iter().copied().collect();
        self.inner.graph.lock().set_dependencies(consumer, &set);
    }

    pub(crate) fn is_stale(&self, id: NodeId) -> bool {
        self.inner.graph.lock().dirty_state(id) != DirtyState::Clean
    }

    pub(crate) fn mark_clean(&self, id: NodeId) {
        self.inner.graph.lock().mark_clean(id);
    }

    /// Dependents plus external watchers of a node.
    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        let edges = self.inner.graph.lock().dependent_count(id);
        let watchers = self
            .inner
            .watchers
            .lock()
            .get(&id)
            .map(|w| w.len())
            .unwrap_or(0);
        edges + watchers
    }

    // ------------------------------------------------------------------
    // External subscribers
    // ------------------------------------------------------------------

    pub(crate) fn watch(&self, node: NodeId, callback: Arc<dyn Fn() + Send + Sync>) -> Subscription {
        let watcher = self.inner.watcher_ids.fetch_add(1, Ordering::Relaxed);
        self.inner
            .watchers
            .lock()
            .entry(node)
            .or_default()
            .push((watcher, callback));
        Subscription {
            rt: self.clone(),
            node,
            watcher,
        }
    }

    pub(crate) fn unwatch(&self, node: NodeId, watcher: u64) {
        if let Some(list) = self.inner.watchers.lock().get_mut(&node) {
            list.retain(|(id, _)| *id != watcher);
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Record that a source cell's value changed.
    ///
    /// Flushes immediately unless a batch, a pulse, or an evaluation is in
    /// progress, in which case the write is queued for the next pulse.
    pub(crate) fn source_changed(&self, id: NodeId) {
        self.inner.pending.lock().insert(id);

        let deferred = self.inner.batch_depth.load(Ordering::SeqCst) > 0
            || self.inner.in_pulse.load(Ordering::SeqCst)
            || !self.inner.eval.lock().is_empty();
        if deferred {
            debug!(node = id.raw(), "write deferred to next pulse");
        } else {
            self.flush();
        }
    }

    /// Flush deferred writes if nothing is currently running. Called after
    /// top-level lazy evaluations, which may have queued writes.
    pub(crate) fn maybe_flush(&self) {
        let idle = self.inner.batch_depth.load(Ordering::SeqCst) == 0
            && !self.inner.in_pulse.load(Ordering::SeqCst)
            && self.inner.eval.lock().is_empty();
        if idle && !self.inner.pending.lock().is_empty() {
            self.flush();
        }
    }

    /// Drain pending writes, running pulses until the graph is quiescent.
    fn flush(&self) {
        if self.inner.in_pulse.swap(true, Ordering::SeqCst) {
            return;
        }

        // A panicking derivation unwinds through here to the writer; the
        // guard clears the pulse flag so the next write can pulse again.
        // Writes queued before the panic stay pending.
        struct Guard<'a>(&'a Inner);
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                self.0.in_pulse.store(false, Ordering::SeqCst);
            }
        }
        let _guard = Guard(&self.inner);

        let mut cascades = 0usize;
        loop {
            let sources: Vec<NodeId> = {
                let mut pending = self.inner.pending.lock();
                pending.drain(..).collect()
            };
            if sources.is_empty() {
                break;
            }

            cascades += 1;
            if cascades > MAX_CASCADES {
                error!(
                    limit = MAX_CASCADES,
                    dropped = sources.len(),
                    "pulse cascade limit exceeded; reactive values are writing each other in a loop"
                );
                break;
            }

            self.pulse(&sources);
        }

        debug_assert!(
            self.inner.eval.lock().is_empty(),
            "evaluation stack must be empty between pulses"
        );
    }

    /// One propagation pulse: settle every affected computed in dependency
    /// order, then notify external subscribers of the changed nodes.
    fn pulse(&self, sources: &[NodeId]) {
        let order = self.inner.graph.lock().affected_by(sources);
        trace!(
            sources = sources.len(),
            affected = order.len(),
            "propagation pulse"
        );

        // Sources only reach the pending set through a real value change,
        // so they all start out "changed".
        let mut changed: HashSet<NodeId> = sources.iter().copied().collect();

        for &node_id in &order {
            let needs_recompute = {
                let graph = self.inner.graph.lock();
                match graph.dirty_state(node_id) {
                    DirtyState::Dirty => true,
                    DirtyState::MaybeDirty => graph
                        .dependencies_of(node_id)
                        .iter()
                        .any(|dep| changed.contains(dep)),
                    DirtyState::Clean => false,
                }
            };
            if !needs_recompute {
                // No settled producer actually changed; equal-output
                // suppression upstream stops the wave here.
                self.inner.graph.lock().mark_clean(node_id);
                continue;
            }

            let recomputer = self
                .inner
                .derived
                .lock()
                .get(&node_id)
                .and_then(Weak::upgrade);
            let Some(recomputer) = recomputer else {
                continue;
            };

            match recomputer.recompute() {
                Ok(true) => {
                    changed.insert(node_id);
                    self.inner.graph.lock().mark_clean(node_id);
                }
                Ok(false) => {
                    self.inner.graph.lock().mark_clean(node_id);
                }
                Err(err) => {
                    // Leave the node dirty; the next read retries. The rest
                    // of the pulse proceeds untouched.
                    error!(node = node_id.raw(), error = %err, "evaluation failed during pulse");
                }
            }
        }

        // Notify watchers once per changed node, producers first.
        let notify_order: Vec<NodeId> = sources
            .iter()
            .chain(order.iter().filter(|id| changed.contains(id)))
            .copied()
            .collect();
        let callbacks: Vec<Arc<dyn Fn() + Send + Sync>> = {
            let watchers = self.inner.watchers.lock();
            notify_order
                .iter()
                .filter_map(|id| watchers.get(id))
                .flatten()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("node_count", &self.node_count())
            .finish()
    }
}

/// Owner of one graph node. Dropping the last clone of a cell or computed
/// drops its handle, which retires the node and all of its edges.
pub(crate) struct NodeHandle {
    rt: Runtime,
    id: NodeId,
}

impl NodeHandle {
    pub(crate) fn new(rt: Runtime, id: NodeId) -> Self {
        Self { rt, id }
    }

    pub(crate) fn rt(&self) -> &Runtime {
        &self.rt
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.rt.remove_node(self.id);
    }
}

/// Handle for one external subscriber registration.
///
/// The callback stays registered until `unsubscribe` is called or the
/// subscribed value is dropped; letting the handle itself go out of scope
/// keeps the subscription alive.
#[derive(Debug)]
pub struct Subscription {
    rt: Runtime,
    node: NodeId,
    watcher: u64,
}

impl Subscription {
    /// Remove the subscriber callback.
    pub fn unsubscribe(self) {
        self.rt.unwatch(self.node, self.watcher);
    }
}
