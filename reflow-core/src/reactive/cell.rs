//! Cell Implementation
//!
//! A Cell is the primitive mutable reactive storage unit. It holds a value
//! and a graph node; consumers that read it during an evaluation become its
//! dependents, and writes schedule a propagation pulse.
//!
//! # Equality suppression
//!
//! `set` compares the incoming value against the current one and is a no-op
//! when they are equal, so dependents never churn on writes that change
//! nothing. The comparison defaults to `PartialEq` and can be replaced per
//! cell with [`Cell::with_eq`].

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::node::NodeId;
use super::readable::Readable;
use super::runtime::{NodeHandle, Runtime, Subscription};

struct CellShared<T> {
    handle: NodeHandle,
    value: RwLock<T>,
    eq: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
}

/// A mutable reactive value.
///
/// Cloning a `Cell` is cheap and shares the underlying storage; all clones
/// see the same value and the same subscribers.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let selected_bin = Cell::new(&rt, None::<u64>);
///
/// selected_bin.set(Some(42)); // notifies subscribers
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    shared: Arc<CellShared<T>>,
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    ///
    /// Writes are suppressed when the new value `==` the current one.
    pub fn new(rt: &Runtime, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_eq(rt, value, |a, b| a == b)
    }

    /// Create a new cell with a custom write-suppression equality.
    pub fn with_eq<E>(rt: &Runtime, value: T, eq: E) -> Self
    where
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let id = rt.add_source();
        Self {
            shared: Arc::new(CellShared {
                handle: NodeHandle::new(rt.clone(), id),
                value: RwLock::new(value),
                eq: Box::new(eq),
            }),
        }
    }

    /// Set a new value and notify subscribers.
    ///
    /// A no-op if the value compares equal to the current one. Otherwise a
    /// propagation pulse runs synchronously, unless the write happens
    /// inside a batch, a pulse, or an evaluation, in which case it is
    /// coalesced into the next pulse.
    pub fn set(&self, value: T) {
        let changed = {
            let mut guard = self.shared.value.write();
            if (self.shared.eq)(&guard, &value) {
                false
            } else {
                *guard = value;
                true
            }
        };
        if changed {
            self.shared.handle.rt().source_changed(self.shared.handle.id());
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.shared.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// Number of dependents and external subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .handle
            .rt()
            .subscriber_count(self.shared.handle.id())
    }
}

impl<T> Readable for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.shared.handle.id()
    }

    fn get(&self) -> T {
        self.shared.handle.rt().track_read(self.shared.handle.id());
        self.shared.value.read().clone()
    }

    fn peek(&self) -> T {
        self.shared.value.read().clone()
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

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.node_id())
            .field("value", &self.peek())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn cell_get_and_set() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn cell_notifies_subscribers() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let _sub = cell.subscribe(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);

        cell.set(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        cell.set(2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 7);
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let _sub = cell.subscribe(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(7);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        cell.set(8);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_equality() {
        let rt = Runtime::new();
        // compare case-insensitively
        let cell = Cell::with_eq(&rt, String::from("Bin A"), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let _sub = cell.subscribe(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(String::from("BIN A"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        cell.set(String::from("Bin B"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cell_unsubscribe() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let sub = cell.subscribe(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        cell.set(2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cell_clone_shares_state() {
        let rt = Runtime::new();
        let cell1 = Cell::new(&rt, 0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);

        cell2.set(100);
        assert_eq!(cell1.get(), 100);
    }

    #[test]
    fn peek_outside_evaluation_matches_get() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 3);
        assert_eq!(cell.peek(), cell.get());
    }
}
