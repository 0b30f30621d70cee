//! Records emitted by the unwinding visitor
//!
//! Both records are produced exactly once and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::domain::{CpuId, FunctionId, Tid, Timestamp};

/// A sample's call stack with every trampoline frame replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectedCallStack {
    pub tid: Tid,
    pub cpu: CpuId,
    pub timestamp: Timestamp,
    /// Instruction addresses, innermost first, outermost last
    pub frames: Vec<u64>,
}

/// An instrumented call whose entry and exit were both observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedFunctionCall {
    pub tid: Tid,
    /// CPU the call was entered on
    pub cpu: CpuId,
    pub function: FunctionId,
    pub entry_timestamp: Timestamp,
    pub exit_timestamp: Timestamp,
    /// Nesting depth among instrumented calls on the thread (0 = outermost)
    pub depth: u32,
}

impl CompletedFunctionCall {
    /// Wall time spent in the call, in nanoseconds
    #[must_use]
    pub fn duration_ns(&self) -> u64 {
        self.exit_timestamp.saturating_since(self.entry_timestamp)
    }
}
