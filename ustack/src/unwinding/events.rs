//! Events consumed by the unwinding visitor
//!
//! Each kind of perf record the visitor cares about is its own struct; the
//! [`TraceEvent`] enum tags them for storage and replay, and
//! [`EventVisitor`] has one method per kind.

use serde::{Deserialize, Serialize};

use super::unwinder::Registers;
use crate::domain::{CpuId, FunctionId, Tid, Timestamp};

/// The traced process's memory map changed (mmap, munmap, dlopen, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapsEvent {
    pub timestamp: Timestamp,
    /// Full `/proc/<pid>/maps` text after the change
    pub maps: String,
}

/// A uprobe fired on entry to an instrumented function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEntryEvent {
    pub tid: Tid,
    pub cpu: CpuId,
    pub timestamp: Timestamp,
    pub function: FunctionId,
    /// Stack pointer at entry; the return address lives at this address
    pub stack_pointer: u64,
    /// The eight bytes at the top of the stack, before the uretprobe
    /// replaced them with the trampoline address
    pub stack_top: [u8; 8],
}

impl ProbeEntryEvent {
    /// Build an entry event from the return address it captured
    #[must_use]
    pub fn new(
        tid: Tid,
        cpu: CpuId,
        timestamp: Timestamp,
        function: FunctionId,
        stack_pointer: u64,
        return_address: u64,
    ) -> Self {
        Self {
            tid,
            cpu,
            timestamp,
            function,
            stack_pointer,
            stack_top: return_address.to_le_bytes(),
        }
    }
}

/// A uretprobe fired on return from an instrumented function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeExitEvent {
    pub tid: Tid,
    pub cpu: CpuId,
    pub timestamp: Timestamp,
}

/// Registers plus a copy of the user stack starting at `registers.sp`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSampleEvent {
    pub tid: Tid,
    pub cpu: CpuId,
    pub timestamp: Timestamp,
    pub registers: Registers,
    pub stack: Vec<u8>,
}

/// A callchain walked by the kernel, possibly including perf context markers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallchainSampleEvent {
    pub tid: Tid,
    pub cpu: CpuId,
    pub timestamp: Timestamp,
    pub ips: Vec<u64>,
}

/// One event of the time-ordered stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Maps(MapsEvent),
    ProbeEntry(ProbeEntryEvent),
    ProbeExit(ProbeExitEvent),
    StackSample(StackSampleEvent),
    CallchainSample(CallchainSampleEvent),
}

impl TraceEvent {
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            TraceEvent::Maps(e) => e.timestamp,
            TraceEvent::ProbeEntry(e) => e.timestamp,
            TraceEvent::ProbeExit(e) => e.timestamp,
            TraceEvent::StackSample(e) => e.timestamp,
            TraceEvent::CallchainSample(e) => e.timestamp,
        }
    }

    /// Thread the event belongs to; map changes are process-wide
    #[must_use]
    pub fn tid(&self) -> Option<Tid> {
        match self {
            TraceEvent::Maps(_) => None,
            TraceEvent::ProbeEntry(e) => Some(e.tid),
            TraceEvent::ProbeExit(e) => Some(e.tid),
            TraceEvent::StackSample(e) => Some(e.tid),
            TraceEvent::CallchainSample(e) => Some(e.tid),
        }
    }

    /// Dispatch to the matching `visit_*` method
    pub fn accept<V: EventVisitor + ?Sized>(self, visitor: &mut V) {
        match self {
            TraceEvent::Maps(e) => visitor.visit_maps(e),
            TraceEvent::ProbeEntry(e) => visitor.visit_probe_entry(e),
            TraceEvent::ProbeExit(e) => visitor.visit_probe_exit(e),
            TraceEvent::StackSample(e) => visitor.visit_stack_sample(e),
            TraceEvent::CallchainSample(e) => visitor.visit_callchain_sample(e),
        }
    }
}

/// Receiver of the event stream, one method per event kind
pub trait EventVisitor {
    fn visit_maps(&mut self, event: MapsEvent);
    fn visit_probe_entry(&mut self, event: ProbeEntryEvent);
    fn visit_probe_exit(&mut self, event: ProbeExitEvent);
    fn visit_stack_sample(&mut self, event: StackSampleEvent);
    fn visit_callchain_sample(&mut self, event: CallchainSampleEvent);
}
