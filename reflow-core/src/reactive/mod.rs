//! Reactive Primitives
//!
//! This module implements the reactive state core: cells, computeds, and
//! the runtime that propagates changes between them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state. When a cell is read inside
//! a tracking context (a computed's derivation), the cell automatically
//! registers that context as a dependent. When the cell's value changes,
//! dependents are brought up to date and subscribers are notified.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. Its
//! dependency set is rebuilt on every evaluation from the reads it actually
//! performed, so conditional derivations only wake up for the branch they
//! are on.
//!
//! ## The runtime
//!
//! The [`Runtime`] owns the dependency graph and the propagation scheduler.
//! One round of dirty-marking and recomputation is a *pulse*: affected
//! computeds settle in topological order, each at most once, and external
//! subscribers observe only the pulse's final values. [`Runtime::batch`]
//! coalesces several writes into a single pulse.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: an evaluation stack records which
//! derivation is currently running, and every tracked read lands in the
//! open frame. This approach ("transparent reactivity") is the same one
//! used by Knockout, SolidJS, Vue, and Leptos.

mod cell;
mod computed;
mod graph;
mod node;
mod readable;
mod runtime;

pub use cell::Cell;
pub use computed::Computed;
pub use node::NodeId;
pub use readable::Readable;
pub use runtime::{ReactiveError, Runtime, Subscription};
