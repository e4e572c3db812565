//! Strongly typed identifiers.
//!
//! Every name the index sees (class, method, test, module, file path) is
//! interned into a per-kind name table that hands out dense 1-based
//! ordinals. Zero is reserved everywhere as "absent", which is why the id
//! newtypes wrap [`NonZeroU32`].

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Common surface of the table-assigned id newtypes, used by the on-disk
/// codec to encode and decode ids generically.
pub trait IdLike: Copy + Eq + Ord + fmt::Debug {
    /// Raw 1-based ordinal.
    fn raw(self) -> u32;

    /// Wrap a raw ordinal; `None` for zero.
    fn from_raw(raw: u32) -> Option<Self>
    where
        Self: Sized;
}

macro_rules! table_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wrap a raw table ordinal. Returns `None` for zero, which the
            /// on-disk encodings reserve as "absent".
            #[must_use]
            pub fn new(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            /// Raw 1-based ordinal as assigned by the name table.
            #[must_use]
            pub const fn get(self) -> u32 {
                self.0.get()
            }
        }

        impl IdLike for $name {
            fn raw(self) -> u32 {
                self.get()
            }

            fn from_raw(raw: u32) -> Option<Self> {
                Self::new(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

table_id! {
    /// Id of a class name (either a covered class or a test class).
    ClassId
}

table_id! {
    /// Id of a bare method name. Method names are interned independently of
    /// the owning class, so `toString` has one id no matter how many classes
    /// define it.
    MethodId
}

table_id! {
    /// Id of a fully qualified test name, `<framework>:<class>.<method>`.
    TestId
}

table_id! {
    /// Id of a module (project sub-unit) name.
    ModuleId
}

table_id! {
    /// Id of a source file path.
    FileId
}

/// Discriminates which test framework a trace came from.
///
/// Stored as part of the encoded test name, so the same class/method pair
/// run under two frameworks yields two distinct test ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameworkId(pub u8);

impl FrameworkId {
    pub const JUNIT: Self = Self(0);
    pub const TESTNG: Self = Self(1);

    /// Raw framework discriminant.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Packed `(class, method)` pair keying the reverse index.
///
/// Layout is `(class << 32) | method`, both halves 1-based ordinals, so a
/// valid key is never zero and keys sort class-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey(u64);

impl MethodKey {
    /// Pack a class/method id pair.
    #[must_use]
    pub const fn new(class: ClassId, method: MethodId) -> Self {
        Self(((class.get() as u64) << 32) | method.get() as u64)
    }

    /// Raw packed value, as written to the reverse-index log.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Validate and wrap a stored key. `None` when either half is zero.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let key = Self(raw);
        key.parts().map(|_| key)
    }

    /// Unpack into the original id pair. `None` when either half is zero,
    /// which can only happen for keys read back from disk.
    #[must_use]
    pub fn parts(self) -> Option<(ClassId, MethodId)> {
        let class = ClassId::new((self.0 >> 32) as u32)?;
        let method = MethodId::new(self.0 as u32)?;
        Some((class, method))
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parts() {
            Some((class, method)) => write!(f, "{class}:{method}"),
            None => write!(f, "invalid:{:#x}", self.0),
        }
    }
}
