//! Computed Implementation
//!
//! A Computed is a derived reactive value: a derivation function plus a
//! cached output. Its dependencies are not declared: they are whatever
//! Readables the derivation actually read during its last run, rebuilt on
//! every evaluation. A branch that stops reading a cell drops the edge to
//! it; the cell can then change without waking the computed at all.
//!
//! # Evaluation protocol
//!
//! 1. Push this node onto the runtime's evaluation stack. Finding the node
//!    already on the stack means the derivation reads its own output:
//!    [`ReactiveError::CycleDetected`].
//! 2. Run the derivation; every tracked `get` lands in the open frame.
//! 3. Pop the frame and diff the observed reads against the previous edge
//!    set, subscribing to new producers and unsubscribing from dropped ones.
//! 4. Compare the fresh output with the cached one; an equal result is
//!    cached but does not notify dependents.
//!
//! A derivation that panics unwinds through step 2: the frame is popped by
//! a guard and both the cached value and the previous edges survive, so the
//! caller that forced the evaluation sees the panic and may retry.
//!
//! # Laziness
//!
//! `Computed::new` defers the first evaluation to the first read;
//! `Computed::eager` evaluates at construction. After the first evaluation
//! both behave the same: pulses keep every already-evaluated computed
//! settled eagerly, which is what makes subscriber notification glitch-free.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::node::NodeId;
use super::readable::Readable;
use super::runtime::{NodeHandle, Recompute, Runtime, Subscription};
use crate::reactive::ReactiveError;

struct ComputedShared<T> {
    handle: NodeHandle,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    eq: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    value: RwLock<Option<T>>,
}

impl<T> ComputedShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn evaluate(&self) -> Result<bool, ReactiveError> {
        let rt = self.handle.rt();
        let id = self.handle.id();
        rt.begin_eval(id)?;

        struct Guard<'a> {
            rt: &'a Runtime,
            id: NodeId,
            armed: bool,
        }
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                if self.armed {
                    self.rt.abort_eval(self.id);
                }
            }
        }
        let mut guard = Guard {
            rt,
            id,
            armed: true,
        };

        // A panic here unwinds through the guard, which pops the frame and
        // leaves the previous value and edge set untouched.
        let new_value = (self.compute)();
        guard.armed = false;
        let reads = rt.end_eval(id);

        rt.commit_reads(id, &reads);

        let changed = {
            let current = self.value.read();
            match current.as_ref() {
                Some(old) => !(self.eq)(old, &new_value),
                None => true,
            }
        };
        *self.value.write() = Some(new_value);
        rt.mark_clean(id);
        Ok(changed)
    }

    fn cached(&self) -> T {
        self.value
            .read()
            .clone()
            .expect("settled computed has a value")
    }
}

impl<T> Recompute for ComputedShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn recompute(&self) -> Result<bool, ReactiveError> {
        self.evaluate()
    }
}

/// A derived reactive value, recomputed from whatever it reads.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let gc = Cell::new(&rt, 0.42_f64);
/// let gc_clone = gc.clone();
/// let percent = Computed::new(&rt, move || (gc_clone.get() * 100.0) as u32);
///
/// assert_eq!(percent.get(), 42);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    shared: Arc<ComputedShared<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a lazy computed; the first evaluation happens on first read.
    ///
    /// Equal recomputation output (by `PartialEq`) is cached without
    /// notifying dependents.
    pub fn new<F>(rt: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: PartialEq,
    {
        Self::with_eq(rt, compute, |a, b| a == b)
    }

    /// Create a lazy computed with a custom output equality.
    pub fn with_eq<F, E>(rt: &Runtime, compute: F, eq: E) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let id = rt.add_derived();
        let shared = Arc::new(ComputedShared {
            handle: NodeHandle::new(rt.clone(), id),
            compute: Box::new(compute),
            eq: Box::new(eq),
            value: RwLock::new(None),
        });
        rt.register_recomputer(id, Arc::downgrade(&shared) as Weak<dyn Recompute>);
        Self { shared }
    }

    /// Create a computed that evaluates at construction.
    ///
    /// # Panics
    ///
    /// Panics if the derivation forms a dependency cycle.
    pub fn eager<F>(rt: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: PartialEq,
    {
        let this = Self::new(rt, compute);
        if let Err(err) = this.shared.evaluate() {
            panic!("{err}");
        }
        this
    }

    /// Read the current value, re-evaluating first if the cached one is
    /// stale. Registers a dependency when called during an evaluation.
    ///
    /// Returns [`ReactiveError::CycleDetected`] when the derivation
    /// transitively reads its own output; the previous cached value and
    /// edges are retained.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let rt = self.shared.handle.rt();
        let id = self.shared.handle.id();
        rt.track_read(id);
        if rt.is_stale(id) || self.shared.value.read().is_none() {
            self.shared.evaluate()?;
        }
        let value = self.shared.cached();
        // A lazy evaluation at top level may have queued writes.
        rt.maybe_flush();
        Ok(value)
    }

    /// Whether the computed has evaluated at least once.
    pub fn has_value(&self) -> bool {
        self.shared.value.read().is_some()
    }

    /// Number of dependents and external subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .handle
            .rt()
            .subscriber_count(self.shared.handle.id())
    }
}

impl<T> Readable for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.shared.handle.id()
    }

    /// Read the current value.
    ///
    /// # Panics
    ///
    /// Panics on a dependency cycle; use [`Computed::try_get`] to handle
    /// that case as a `Result`.
    fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Read the current value without registering a dependency, evaluating
    /// first if the cached value is stale.
    ///
    /// # Panics
    ///
    /// Panics on a dependency cycle, like [`get`](Readable::get).
    fn peek(&self) -> T {
        let rt = self.shared.handle.rt();
        let id = self.shared.handle.id();
        if rt.is_stale(id) || self.shared.value.read().is_none() {
            if let Err(err) = self.shared.evaluate() {
                panic!("{err}");
            }
        }
        self.shared.cached()
    }

    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .handle
            .rt()
            .watch(self.shared.handle.id(), Arc::new(callback))
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.node_id())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
