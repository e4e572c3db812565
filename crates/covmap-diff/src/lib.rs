//! Set-difference engine for test usage snapshots.
//!
//! Re-running a test replaces its usage snapshot wholesale, but the reverse
//! index is maintained incrementally: only the methods and files that
//! actually changed get add/remove entries appended. This module computes
//! that minimal change set, eagerly and entirely in memory.

use std::cmp::Ordering;

use covmap_types::{ClassId, FileId, MethodId, TestUsage};

/// Minimal change set between two usage snapshots of the same test.
///
/// Method lists inside each entry are sorted; entries are sorted by class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageDiff {
    /// Methods covered now but not before, per class.
    pub added_methods: Vec<(ClassId, Vec<MethodId>)>,
    /// Methods covered before but no longer, per class. Classes absent from
    /// the new snapshot show up here wholesale.
    pub removed_methods: Vec<(ClassId, Vec<MethodId>)>,
    /// Files touched now but not before.
    pub added_files: Vec<FileId>,
    /// Files touched before but no longer.
    pub removed_files: Vec<FileId>,
}

impl UsageDiff {
    /// True when the two snapshots cover exactly the same ground.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_methods.is_empty()
            && self.removed_methods.is_empty()
            && self.added_files.is_empty()
            && self.removed_files.is_empty()
    }
}

/// Compare a test's previous usage snapshot against its newly observed one.
///
/// Per-class set difference: `new − old` are additions, `old − new` are
/// removals, classes missing on either side count wholesale for the other.
/// Module association is not diffed; it rides along with additions.
#[must_use]
pub fn diff_usage(old: &TestUsage, new: &TestUsage) -> UsageDiff {
    let mut diff = UsageDiff::default();

    for (class, new_methods) in &new.methods {
        let old_methods = old.methods.get(class).map_or(&[][..], Vec::as_slice);
        let (added, removed) = diff_sorted(old_methods, new_methods);
        if !added.is_empty() {
            diff.added_methods.push((*class, added));
        }
        if !removed.is_empty() {
            diff.removed_methods.push((*class, removed));
        }
    }
    for (class, old_methods) in &old.methods {
        if !new.methods.contains_key(class) && !old_methods.is_empty() {
            diff.removed_methods.push((*class, old_methods.clone()));
        }
    }
    diff.removed_methods.sort_by_key(|(class, _)| *class);

    let (added_files, removed_files) = diff_sorted(&old.files, &new.files);
    diff.added_files = added_files;
    diff.removed_files = removed_files;
    diff
}

/// Merge-walk two sorted deduplicated slices into `(added, removed)`.
fn diff_sorted<T: Ord + Copy>(old: &[T], new: &[T]) -> (Vec<T>, Vec<T>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match old[i].cmp(&new[j]) {
            Ordering::Less => {
                removed.push(old[i]);
                i += 1;
            }
            Ordering::Greater => {
                added.push(new[j]);
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    removed.extend_from_slice(&old[i..]);
    added.extend_from_slice(&new[j..]);
    (added, removed)
}
