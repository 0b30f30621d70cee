//! Matching of probe entries and exits into timed calls on one thread

use crate::domain::{CpuId, FunctionId, Tid, Timestamp};
use crate::trace_data::CompletedFunctionCall;

/// An instrumented call that has been entered but not exited yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    pub tid: Tid,
    pub cpu: CpuId,
    pub entry_timestamp: Timestamp,
    pub function: FunctionId,
}

/// Stack of pending calls for a single thread
#[derive(Debug, Clone, Default)]
pub struct FunctionCallManager {
    pending: Vec<PendingCall>,
}

impl FunctionCallManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_probe_entry(
        &mut self,
        tid: Tid,
        cpu: CpuId,
        timestamp: Timestamp,
        function: FunctionId,
    ) {
        self.pending.push(PendingCall {
            tid,
            cpu,
            entry_timestamp: timestamp,
            function,
        });
    }

    /// Close the most recently entered call
    ///
    /// Returns `None` if there is no pending call.
    pub fn on_probe_exit(&mut self, timestamp: Timestamp) -> Option<CompletedFunctionCall> {
        let call = self.pending.pop()?;
        let depth = u32::try_from(self.pending.len()).unwrap_or(u32::MAX);

        Some(CompletedFunctionCall {
            tid: call.tid,
            cpu: call.cpu,
            function: call.function,
            entry_timestamp: call.entry_timestamp,
            exit_timestamp: timestamp,
            depth,
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn top(&self) -> Option<&PendingCall> {
        self.pending.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_call() {
        let mut manager = FunctionCallManager::new();
        manager.on_probe_entry(Tid(1), CpuId(2), Timestamp(100), FunctionId(0xf));

        let call = manager.on_probe_exit(Timestamp(200)).unwrap();
        assert_eq!(call.tid, Tid(1));
        assert_eq!(call.function, FunctionId(0xf));
        assert_eq!(call.cpu, CpuId(2));
        assert_eq!(call.entry_timestamp, Timestamp(100));
        assert_eq!(call.exit_timestamp, Timestamp(200));
        assert_eq!(call.depth, 0);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_recursion_matches_innermost_first() {
        let mut manager = FunctionCallManager::new();
        let tid = Tid(1);
        manager.on_probe_entry(tid, CpuId(0), Timestamp(10), FunctionId(0xa));
        manager.on_probe_entry(tid, CpuId(0), Timestamp(20), FunctionId(0xa));
        manager.on_probe_entry(tid, CpuId(0), Timestamp(30), FunctionId(0xb));
        assert_eq!(manager.top().map(|c| c.function), Some(FunctionId(0xb)));

        let inner = manager.on_probe_exit(Timestamp(35)).unwrap();
        assert_eq!(
            (inner.function, inner.entry_timestamp, inner.depth),
            (FunctionId(0xb), Timestamp(30), 2)
        );

        let middle = manager.on_probe_exit(Timestamp(40)).unwrap();
        assert_eq!((middle.entry_timestamp, middle.depth), (Timestamp(20), 1));

        let outer = manager.on_probe_exit(Timestamp(50)).unwrap();
        assert_eq!((outer.entry_timestamp, outer.depth), (Timestamp(10), 0));

        assert!(manager.on_probe_exit(Timestamp(60)).is_none());
    }
}
