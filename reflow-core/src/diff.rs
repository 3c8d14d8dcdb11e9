//! Ordered-Collection Differ
//!
//! Server responses usually arrive as whole collections, but the view layer
//! wants to know what actually changed: which rows appeared and which
//! disappeared. [`diff`] computes a minimal edit script between two ordered
//! sequences of uniquely-keyed elements; applying the script to the old
//! sequence, left to right, reproduces the new one exactly.
//!
//! # Policy
//!
//! - Matching is by key only; elements present in both sequences but at
//!   different relative positions are reported as delete+add (no move
//!   detection).
//! - Duplicate keys within one input are a contract violation and fail with
//!   [`DiffError::DuplicateKey`].
//! - Where a deletion and an addition land at the same logical index, the
//!   deletion is emitted first.
//!
//! The script is minimal in the insert/delete edit-distance sense; it is
//! derived from a longest-common-subsequence table over the key sequences.

use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;
use thiserror::Error;

/// Stable identity for elements of a diffable collection.
pub trait Keyed {
    /// The key type; must be unique within one sequence.
    type Key: Eq + Hash + Clone + Debug;

    /// The element's key.
    fn key(&self) -> Self::Key;
}

/// Whether a change event adds or removes an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// The element is inserted at `index`.
    Added,
    /// The element at `index` is removed.
    Deleted,
}

/// One step of an edit script.
///
/// Indices refer to the sequence as it stands when the event is applied,
/// assuming earlier events in the script have already been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<T> {
    pub status: ChangeStatus,
    pub index: usize,
    pub value: T,
}

/// Errors raised on malformed differ input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// The same key appeared twice within one input sequence.
    #[error("duplicate key {key} at positions {first} and {second} of the {side} sequence")]
    DuplicateKey {
        key: String,
        first: usize,
        second: usize,
        side: &'static str,
    },
}

/// Index the elements of one sequence by key, rejecting duplicates.
fn key_positions<T: Keyed>(
    items: &[T],
    side: &'static str,
) -> Result<IndexMap<T::Key, usize>, DiffError> {
    let mut positions = IndexMap::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        if let Some(first) = positions.insert(item.key(), index) {
            return Err(DiffError::DuplicateKey {
                key: format!("{:?}", item.key()),
                first,
                second: index,
                side,
            });
        }
    }
    Ok(positions)
}

/// Compute the edit script that transforms `old` into `new`.
///
/// The returned events, applied in order (see [`apply`]), reproduce `new`
/// exactly.
pub fn diff<T>(old: &[T], new: &[T]) -> Result<Vec<ChangeEvent<T>>, DiffError>
where
    T: Keyed + Clone,
{
    key_positions(old, "old")?;
    key_positions(new, "new")?;

    let n = old.len();
    let m = new.len();

    // LCS table over the key sequences.
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i].key() == new[j].key() {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    // Walk both sequences, keeping matched elements and emitting events for
    // the rest. `position` tracks the index in the partially-edited
    // sequence, so events apply cleanly left to right. Deletions are
    // preferred when either branch would do.
    let mut events = Vec::new();
    let (mut i, mut j, mut position) = (0, 0, 0);
    while i < n || j < m {
        if i < n && j < m && old[i].key() == new[j].key() {
            i += 1;
            j += 1;
            position += 1;
        } else if i < n && (j == m || table[i + 1][j] >= table[i][j + 1]) {
            events.push(ChangeEvent {
                status: ChangeStatus::Deleted,
                index: position,
                value: old[i].clone(),
            });
            i += 1;
        } else {
            events.push(ChangeEvent {
                status: ChangeStatus::Added,
                index: position,
                value: new[j].clone(),
            });
            j += 1;
            position += 1;
        }
    }

    Ok(events)
}

/// Apply an edit script to a sequence, producing the edited sequence.
pub fn apply<T: Clone>(seq: &[T], events: &[ChangeEvent<T>]) -> Vec<T> {
    let mut result: Vec<T> = seq.to_vec();
    for event in events {
        match event.status {
            ChangeStatus::Added => result.insert(event.index, event.value.clone()),
            ChangeStatus::Deleted => {
                result.remove(event.index);
            }
        }
    }
    result
}
