//! The Readable capability.
//!
//! Cells and computeds are interchangeable as far as consumers are
//! concerned: both can be read with dependency tracking, read silently, or
//! subscribed to. The dependency graph treats them uniformly through this
//! trait instead of inspecting concrete types.

use super::node::NodeId;
use super::runtime::Subscription;

/// A reactive value that can be read and observed.
///
/// Implemented by [`Cell`](super::Cell) and [`Computed`](super::Computed).
pub trait Readable {
    /// The value produced by a read.
    type Value;

    /// The value's node in the dependency graph.
    fn node_id(&self) -> NodeId;

    /// Read the current value.
    ///
    /// When called during an active evaluation (inside a computed's
    /// derivation), the read registers a dependency edge; otherwise it
    /// behaves like [`peek`](Readable::peek).
    fn get(&self) -> Self::Value;

    /// Read the current value without registering a dependency.
    fn peek(&self) -> Self::Value;

    /// Register a callback invoked once per pulse in which this value
    /// changed, after all derived state has settled.
    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static;
}
