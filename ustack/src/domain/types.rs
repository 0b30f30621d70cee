//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a CPU number where
//! a thread ID is expected, and make visitor signatures more expressive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Thread ID
///
/// Kernel-assigned thread ID of a thread in the traced process. All per-thread
/// unwinding state is keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// CPU ID
///
/// CPU core the event was recorded on (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Identity of an instrumented function
///
/// The address the uprobe is attached to. Two probe events refer to the same
/// function exactly when their identities are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn@0x{:x}", self.0)
    }
}

/// Timestamp in nanoseconds
///
/// Represents an absolute point in time as nanoseconds since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Nanoseconds elapsed since `earlier`, saturating at zero
    #[must_use]
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Convert to microseconds (f64)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_micros_f64(self) -> f64 {
        self.0 as f64 / 1_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(Tid(42).to_string(), "TID:42");
        assert_eq!(CpuId(3).to_string(), "CPU:3");
        assert_eq!(FunctionId(0x4010).to_string(), "fn@0x4010");
        assert_eq!(Timestamp(100).to_string(), "100ns");
    }

    #[test]
    fn test_saturating_since() {
        assert_eq!(Timestamp(200).saturating_since(Timestamp(100)), 100);
        // Out-of-order timestamps never underflow
        assert_eq!(Timestamp(100).saturating_since(Timestamp(200)), 0);
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&Tid(7)).unwrap();
        assert_eq!(json, "7");
        let tid: Tid = serde_json::from_str("7").unwrap();
        assert_eq!(tid, Tid(7));
    }
}
