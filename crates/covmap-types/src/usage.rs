//! Per-test usage snapshots.

use std::collections::BTreeMap;

use crate::ids::{ClassId, FileId, MethodId, ModuleId};

/// Everything one test was observed to touch in its most recent run.
///
/// This is the value the store keeps under each test id, and the input the
/// diff engine compares across runs. Method lists and the file list are
/// kept sorted and deduplicated so diffs reduce to merge walks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestUsage {
    /// Covered methods, grouped by owning class.
    pub methods: BTreeMap<ClassId, Vec<MethodId>>,
    /// Source files the run touched.
    pub files: Vec<FileId>,
    /// Module the test ran in, when the harness reported one.
    pub module: Option<ModuleId>,
}

impl TestUsage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a covered method, keeping the per-class list sorted and unique.
    pub fn add_method(&mut self, class: ClassId, method: MethodId) {
        let methods = self.methods.entry(class).or_default();
        if let Err(pos) = methods.binary_search(&method) {
            methods.insert(pos, method);
        }
    }

    /// Record an affected file, keeping the list sorted and unique.
    pub fn add_file(&mut self, file: FileId) {
        if let Err(pos) = self.files.binary_search(&file) {
            self.files.insert(pos, file);
        }
    }

    /// True when the snapshot records no coverage at all.
    ///
    /// A module association alone does not count as coverage; the store
    /// treats an empty usage as "delete this test's record".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.values().all(Vec::is_empty) && self.files.is_empty()
    }

    /// Total number of (class, method) coverage pairs.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.values().map(Vec::len).sum()
    }
}
