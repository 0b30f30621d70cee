//! Per-thread instrumentation state
//!
//! Every probe entry pushes one record on both stacks of its thread and every
//! matched exit pops one from both, so the two always have the same depth.
//! [`ThreadStacks`] only exposes mutations that touch both.

use std::collections::HashMap;

use super::events::ProbeEntryEvent;
use super::function_call_manager::FunctionCallManager;
use super::return_address_manager::ReturnAddressManager;
use crate::domain::{Tid, Timestamp};
use crate::trace_data::CompletedFunctionCall;

/// Return-address and pending-call stacks of one thread
#[derive(Debug, Clone, Default)]
pub struct ThreadStacks {
    return_addresses: ReturnAddressManager,
    calls: FunctionCallManager,
}

impl ThreadStacks {
    pub fn on_probe_entry(&mut self, event: &ProbeEntryEvent) {
        self.return_addresses
            .on_probe_entry(event.stack_pointer, event.stack_top);
        self.calls
            .on_probe_entry(event.tid, event.cpu, event.timestamp, event.function);
    }

    /// Pop both stacks; `None` if nothing was pending
    pub fn on_probe_exit(&mut self, timestamp: Timestamp) -> Option<CompletedFunctionCall> {
        let original = self.return_addresses.on_probe_exit();
        let call = self.calls.on_probe_exit(timestamp);
        debug_assert_eq!(original.is_some(), call.is_some());
        call
    }

    /// Whether `event` repeats the most recent entry on this thread
    ///
    /// The kernel can deliver a uprobe twice when the thread migrates while
    /// the probe is being handled. The copy has the same stack pointer and
    /// function but a different CPU. A recursive call has a lower stack
    /// pointer, so it never matches.
    #[must_use]
    pub fn is_duplicate_entry(&self, event: &ProbeEntryEvent) -> bool {
        let (Some(frame), Some(call)) = (self.return_addresses.top(), self.calls.top()) else {
            return false;
        };
        frame.stack_pointer == event.stack_pointer
            && call.function == event.function
            && call.cpu != event.cpu
    }

    #[must_use]
    pub fn return_addresses(&self) -> &ReturnAddressManager {
        &self.return_addresses
    }

    #[must_use]
    pub fn calls(&self) -> &FunctionCallManager {
        &self.calls
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.calls.depth()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.return_addresses.is_empty() && self.calls.is_empty()
    }
}

/// [`ThreadStacks`] for every thread with a pending instrumented call
#[derive(Debug, Default)]
pub struct ThreadStackMap {
    by_tid: HashMap<Tid, ThreadStacks>,
}

impl ThreadStackMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, tid: Tid) -> Option<&ThreadStacks> {
        self.by_tid.get(&tid)
    }

    pub fn on_probe_entry(&mut self, event: &ProbeEntryEvent) {
        self.by_tid
            .entry(event.tid)
            .or_default()
            .on_probe_entry(event);
    }

    /// Pop the thread's most recent call; threads left empty are forgotten
    pub fn on_probe_exit(
        &mut self,
        tid: Tid,
        timestamp: Timestamp,
    ) -> Option<CompletedFunctionCall> {
        let stacks = self.by_tid.get_mut(&tid)?;
        let call = stacks.on_probe_exit(timestamp);
        if stacks.is_empty() {
            self.by_tid.remove(&tid);
        }
        call
    }

    #[must_use]
    pub fn is_duplicate_entry(&self, event: &ProbeEntryEvent) -> bool {
        self.get(event.tid)
            .is_some_and(|stacks| stacks.is_duplicate_entry(event))
    }

    /// Pending instrumented calls on `tid`
    #[must_use]
    pub fn depth(&self, tid: Tid) -> usize {
        self.get(tid).map_or(0, ThreadStacks::depth)
    }

    /// Number of threads with at least one pending call
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.by_tid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CpuId, FunctionId};

    fn entry(tid: u32, cpu: u32, sp: u64, function: u64) -> ProbeEntryEvent {
        ProbeEntryEvent::new(
            Tid(tid),
            CpuId(cpu),
            Timestamp(10),
            FunctionId(function),
            sp,
            0x40_1000,
        )
    }

    #[test]
    fn test_stacks_move_together() {
        let mut stacks = ThreadStacks::default();
        stacks.on_probe_entry(&entry(1, 0, 0x7000, 0xa));
        stacks.on_probe_entry(&entry(1, 0, 0x6f00, 0xb));
        assert_eq!(stacks.return_addresses().depth(), 2);
        assert_eq!(stacks.calls().depth(), 2);

        let call = stacks.on_probe_exit(Timestamp(20)).unwrap();
        assert_eq!(call.function, FunctionId(0xb));
        assert_eq!(stacks.return_addresses().depth(), 1);
        assert_eq!(stacks.calls().depth(), 1);
    }

    #[test]
    fn test_duplicate_needs_cpu_change() {
        let mut stacks = ThreadStacks::default();
        stacks.on_probe_entry(&entry(1, 0, 0x7000, 0xa));

        assert!(stacks.is_duplicate_entry(&entry(1, 3, 0x7000, 0xa)));
        assert!(!stacks.is_duplicate_entry(&entry(1, 0, 0x7000, 0xa)));
        assert!(!stacks.is_duplicate_entry(&entry(1, 3, 0x6f00, 0xa)));
        assert!(!stacks.is_duplicate_entry(&entry(1, 3, 0x7000, 0xb)));
    }

    #[test]
    fn test_map_forgets_empty_threads() {
        let mut map = ThreadStackMap::new();
        map.on_probe_entry(&entry(1, 0, 0x7000, 0xa));
        map.on_probe_entry(&entry(2, 0, 0x7000, 0xa));
        assert_eq!(map.thread_count(), 2);

        assert!(map.on_probe_exit(Tid(1), Timestamp(20)).is_some());
        assert_eq!(map.thread_count(), 1);
        assert_eq!(map.depth(Tid(1)), 0);
        assert_eq!(map.depth(Tid(2)), 1);
    }

    #[test]
    fn test_exit_on_unknown_thread() {
        let mut map = ThreadStackMap::new();
        map.on_probe_entry(&entry(2, 0, 0x7000, 0xa));

        assert!(map.on_probe_exit(Tid(1), Timestamp(20)).is_none());
        assert_eq!(map.thread_count(), 1);
        assert!(map.get(Tid(1)).is_none());
    }
}
