//! Process-wide identifiers for contexts, objects and functions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for a runtime entity.
///
/// Identifiers are unique for the lifetime of the process and never reused,
/// even after the entity they named is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u64);

impl Uid {
    /// Reserved id naming the script global object. Never produced by [`next_uid`].
    pub const ROOT: Uid = Uid(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// Script numbers are doubles; ids stay far below 2^53.
    pub(crate) fn as_f64(self) -> f64 {
        self.0 as f64
    }

    pub(crate) fn from_f64(value: f64) -> Option<Uid> {
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
            Some(Uid(value as u64))
        } else {
            None
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocate the next identifier. Safe to call from any thread.
pub fn next_uid() -> Uid {
    Uid(NEXT_UID.fetch_add(1, Ordering::Relaxed))
}
