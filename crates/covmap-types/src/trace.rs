//! Test identities and raw coverage observations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::FrameworkId;

/// Fully qualified identity of one test: framework, class, and method.
///
/// Two frameworks running the same class/method pair count as two distinct
/// tests, which is why the framework byte participates in the encoded name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestIdentity {
    pub class: String,
    pub method: String,
    pub framework: FrameworkId,
}

impl TestIdentity {
    pub fn new(
        class: impl Into<String>,
        method: impl Into<String>,
        framework: FrameworkId,
    ) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            framework,
        }
    }

    /// Encoded form stored in the test name table:
    /// `<framework>:<class>.<method>`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}.{}", self.framework, self.class, self.method)
    }

    /// Parse an encoded test name back into its parts.
    ///
    /// Class names are dotted paths themselves, so the method component is
    /// everything after the last dot. Returns `None` for strings not
    /// produced by [`Self::encode`].
    #[must_use]
    pub fn decode(encoded: &str) -> Option<Self> {
        let (framework, qualified) = encoded.split_once(':')?;
        let framework = FrameworkId(framework.parse::<u8>().ok()?);
        let (class, method) = qualified.rsplit_once('.')?;
        if class.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self {
            class: class.to_owned(),
            method: method.to_owned(),
            framework,
        })
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.method)
    }
}

/// One test's coverage observation, as decoded from a trace source.
///
/// Everything is still a raw string at this level; id assignment happens
/// inside the store when the record is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub test: TestIdentity,
    /// Covered methods grouped by fully qualified class name.
    pub covered_methods: BTreeMap<String, Vec<String>>,
    /// Paths of files the run touched.
    pub affected_files: Vec<String>,
    /// Module the test ran in, when known.
    pub module: Option<String>,
}

impl TraceRecord {
    #[must_use]
    pub fn new(test: TestIdentity) -> Self {
        Self {
            test,
            covered_methods: BTreeMap::new(),
            affected_files: Vec::new(),
            module: None,
        }
    }
}
