//! Index configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often the background task writes dirty state to disk.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Where the index lives and how eagerly it flushes.
///
/// One config (and one [`crate::CoverageIndex`]) owns one root directory;
/// pointing two live indexes at the same root is unsupported and not
/// guarded by file locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding every index file. Created on first use.
    pub root: PathBuf,
    /// Background flush period. A zero duration disables the background
    /// task entirely; dirty state then persists only on explicit flush or
    /// dispose.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: Duration,
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

impl IndexConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_flush_interval() {
        let config = IndexConfig::new("/tmp/idx").with_flush_interval(Duration::from_millis(50));
        assert_eq!(config.root, PathBuf::from("/tmp/idx"));
        assert_eq!(config.flush_interval, Duration::from_millis(50));
    }

    #[test]
    fn missing_flush_interval_defaults() {
        let config: IndexConfig =
            serde_json::from_str(r#"{"root":"/tmp/idx"}"#).expect("deserialize");
        assert_eq!(config.flush_interval, DEFAULT_FLUSH_INTERVAL);
    }
}
