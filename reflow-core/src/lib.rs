//! Reflow Core
//!
//! This crate provides the reactive state-synchronization runtime behind
//! the Reflow data explorer. It implements:
//!
//! - Reactive primitives (cells, computeds) with automatic dependency
//!   tracking
//! - A propagation scheduler that settles derived state glitch-free, in
//!   dependency order, once per update pulse
//! - An ordered-collection differ producing minimal change scripts for
//!   keyed sequences
//! - An async staleness coordinator that discards responses of superseded
//!   fetches by generation token
//!
//! Rendering, HTTP transport, and all other UI concerns live outside this
//! crate; they consume the reactive surface (`Readable`, subscriptions,
//! change scripts) and feed it through cell writes and coordinated fetches.
//!
//! # Example
//!
//! ```rust,ignore
//! use reflow_core::reactive::{Cell, Computed, Readable, Runtime};
//!
//! let rt = Runtime::new();
//! let selected = Cell::new(&rt, 0u64);
//!
//! let selected_clone = selected.clone();
//! let label = Computed::new(&rt, move || format!("bin {}", selected_clone.get()));
//!
//! let sub = label.subscribe(|| println!("label changed"));
//!
//! selected.set(3); // recomputes `label`, then notifies the subscriber
//! ```

pub mod diff;
pub mod fetch;
pub mod reactive;

pub use diff::{ChangeEvent, ChangeStatus, DiffError, Keyed};
pub use fetch::{CollectionQuery, Coordinator, FetchError, FetchStatus, Generation, Page};
pub use reactive::{Cell, Computed, ReactiveError, Readable, Runtime, Subscription};
