//! Tagged add/remove deltas and their read-time resolution.
//!
//! The reverse-index logs are append-only: membership changes are recorded
//! as explicit [`Delta`] entries and folded back into a set when a key is
//! queried. A removal may land in the log without its matching add having
//! been observed in the same decode pass (a crash between the two halves of
//! a diff application, or interleaved chunks), so resolution tracks such
//! tombstones as *pending removals* that cancel the next matching add
//! instead of silently dropping them.

use std::collections::BTreeSet;

/// One membership change for a keyed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta<T> {
    /// `value` joined the set.
    Added(T),
    /// `value` left the set.
    Removed(T),
}

impl<T> Delta<T> {
    /// The value carried by the delta, regardless of direction.
    pub const fn value(&self) -> &T {
        match self {
            Self::Added(v) | Self::Removed(v) => v,
        }
    }
}

/// Accumulator folding a delta stream into its current membership.
///
/// Replay order is oldest entry first. An `Added` that matches an
/// outstanding pending removal annihilates it; otherwise the value becomes
/// present. A `Removed` drops a present value; otherwise it is parked as a
/// pending removal awaiting its add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet<T: Ord> {
    present: BTreeSet<T>,
    pending_removals: BTreeSet<T>,
}

impl<T: Ord> ResolvedSet<T> {
    /// Empty set with no history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            present: BTreeSet::new(),
            pending_removals: BTreeSet::new(),
        }
    }

    /// Fold one delta into the accumulated state.
    pub fn apply(&mut self, delta: Delta<T>) {
        match delta {
            Delta::Added(v) => {
                if !self.pending_removals.remove(&v) {
                    self.present.insert(v);
                }
            }
            Delta::Removed(v) => {
                if !self.present.remove(&v) {
                    self.pending_removals.insert(v);
                }
            }
        }
    }

    /// Values currently in the set.
    #[must_use]
    pub const fn present(&self) -> &BTreeSet<T> {
        &self.present
    }

    /// Removals that never matched an add in this decode pass.
    #[must_use]
    pub const fn pending_removals(&self) -> &BTreeSet<T> {
        &self.pending_removals
    }

    /// Whether the set currently has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Consume the accumulator, keeping only the resolved membership.
    #[must_use]
    pub fn into_present(self) -> BTreeSet<T> {
        self.present
    }
}

impl<T: Ord> FromIterator<Delta<T>> for ResolvedSet<T> {
    fn from_iter<I: IntoIterator<Item = Delta<T>>>(iter: I) -> Self {
        let mut set = Self::new();
        for delta in iter {
            set.apply(delta);
        }
        set
    }
}
