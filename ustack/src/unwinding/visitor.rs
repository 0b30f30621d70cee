//! # Unwinding Visitor
//!
//! Processes stack samples and uprobe/uretprobe records, plus memory map
//! changes to keep unwinding information current, assuming they arrive in
//! timestamp order.
//!
//! Samples and probes are handled by the same visitor because a uretprobe
//! hijacks the return address of the function it instruments. Unwinding any
//! sample that falls inside such a function stops at a frame in the
//! `[uprobes]` page. Each thread's [`ThreadStacks`] remembers the return
//! addresses before they were hijacked, so they can be spliced back into the
//! sample, and pairs the same entries and exits into timed call records.
//!
//! ## Event Routing
//!
//! - `Maps` → replace the live memory map
//! - `ProbeEntry` → push on the thread's stacks (duplicates dropped)
//! - `ProbeExit` → pop the thread's stacks, emit
//!   [`CompletedFunctionCall`](crate::trace_data::CompletedFunctionCall)
//! - `StackSample` / `CallchainSample` → unwind, patch, emit
//!   [`CorrectedCallStack`]
//!
//! Failures never stop the stream; they only increment [`UnwindCounters`].

use log::{debug, warn};
use std::sync::Arc;

use super::counters::{increment, UnwindCounters};
use super::events::{
    CallchainSampleEvent, EventVisitor, MapsEvent, ProbeEntryEvent, ProbeExitEvent,
    StackSampleEvent, TraceEvent,
};
use super::listener::TracerListener;
use super::return_address_manager::PatchOutcome;
use super::thread_stacks::{ThreadStackMap, ThreadStacks};
use super::unwinder::{CallChain, StackMemory, Unwinder, UnwinderConfig};
use crate::domain::{CpuId, Tid, Timestamp, UnwindError};
use crate::memory::{MemoryMapSnapshot, MemoryMapStore};
use crate::trace_data::CorrectedCallStack;

pub struct UnwindingVisitor<L: TracerListener> {
    maps: MemoryMapStore,
    unwinder: Unwinder,
    threads: ThreadStackMap,
    counters: UnwindCounters,
    listener: L,
}

impl<L: TracerListener> UnwindingVisitor<L> {
    /// Create a visitor from the process's maps text at session start
    pub fn new(initial_maps: &str, listener: L) -> Self {
        Self::with_config(
            initial_maps,
            listener,
            UnwinderConfig::default(),
            UnwindCounters::default(),
        )
    }

    pub fn with_config(
        initial_maps: &str,
        listener: L,
        config: UnwinderConfig,
        counters: UnwindCounters,
    ) -> Self {
        Self {
            maps: MemoryMapStore::new(MemoryMapSnapshot::parse_lossy(initial_maps)),
            unwinder: Unwinder::new(config),
            threads: ThreadStackMap::new(),
            counters,
            listener,
        }
    }

    /// Swap in counter handles owned by a reporting layer
    pub fn set_counters(&mut self, counters: UnwindCounters) {
        self.counters = counters;
    }

    pub fn counters(&self) -> &UnwindCounters {
        &self.counters
    }

    /// Process one event of the stream
    pub fn process(&mut self, event: TraceEvent) {
        event.accept(self);
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    pub fn memory_maps(&self) -> Arc<MemoryMapSnapshot> {
        self.maps.current()
    }

    /// Instrumentation state of `tid`, if it has pending calls
    pub fn thread_stacks(&self, tid: Tid) -> Option<&ThreadStacks> {
        self.threads.get(tid)
    }

    /// Pending instrumented calls on `tid`
    pub fn depth(&self, tid: Tid) -> usize {
        self.threads.depth(tid)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.thread_count()
    }

    /// Splice the thread's recorded return addresses into a halted chain
    fn correct(&self, tid: Tid, chain: &mut CallChain, maps: &MemoryMapSnapshot) -> PatchOutcome {
        let splice =
            |chain: &mut CallChain, original: u64| self.unwinder.splice(chain, original, maps);
        match self.threads.get(tid) {
            Some(stacks) => stacks.return_addresses().patch(chain, splice),
            None if chain.is_halted_at_trampoline() => PatchOutcome::Exhausted { spliced: 0 },
            None => PatchOutcome::Unchanged,
        }
    }

    fn on_unwind_error(&self, tid: Tid, timestamp: Timestamp, error: &UnwindError) {
        debug!("{tid}: dropping sample at {timestamp}: {error}");
        increment(&self.counters.unwind_errors);
    }

    fn finish_sample(
        &mut self,
        tid: Tid,
        cpu: CpuId,
        timestamp: Timestamp,
        chain: CallChain,
        outcome: PatchOutcome,
    ) {
        match outcome {
            PatchOutcome::Exhausted { spliced } => {
                debug!(
                    "{tid}: discarding sample at {timestamp} stuck in trampoline \
                     ({spliced} of {} recorded frames used)",
                    self.threads.depth(tid)
                );
                increment(&self.counters.discarded_samples);
            }
            PatchOutcome::Unchanged | PatchOutcome::Patched { .. } => {
                self.listener.on_callstack_sample(CorrectedCallStack {
                    tid,
                    cpu,
                    timestamp,
                    frames: chain.into_frames(),
                });
            }
        }
    }
}

impl<L: TracerListener> EventVisitor for UnwindingVisitor<L> {
    fn visit_maps(&mut self, event: MapsEvent) {
        let snapshot = MemoryMapSnapshot::parse_lossy(&event.maps);
        self.maps.replace(snapshot);
    }

    fn visit_probe_entry(&mut self, event: ProbeEntryEvent) {
        if self.threads.is_duplicate_entry(&event) {
            warn!(
                "{}: discarding duplicate probe entry for {} on {} (sp=0x{:x})",
                event.tid, event.function, event.cpu, event.stack_pointer
            );
            increment(&self.counters.duplicate_entries);
            return;
        }

        self.threads.on_probe_entry(&event);
    }

    fn visit_probe_exit(&mut self, event: ProbeExitEvent) {
        match self.threads.on_probe_exit(event.tid, event.timestamp) {
            Some(call) => self.listener.on_function_call(call),
            None => {
                warn!(
                    "{}: probe exit at {} without a matching entry",
                    event.tid, event.timestamp
                );
                increment(&self.counters.unmatched_exits);
            }
        }
    }

    fn visit_stack_sample(&mut self, event: StackSampleEvent) {
        let maps = self.maps.current();
        let stack = StackMemory::new(event.registers.sp, &event.stack);

        let mut chain = match self.unwinder.unwind(&event.registers, &stack, &maps) {
            Ok(chain) => chain,
            Err(e) => {
                self.on_unwind_error(event.tid, event.timestamp, &e);
                return;
            }
        };

        let outcome = self.correct(event.tid, &mut chain, &maps);
        self.finish_sample(event.tid, event.cpu, event.timestamp, chain, outcome);
    }

    fn visit_callchain_sample(&mut self, event: CallchainSampleEvent) {
        let maps = self.maps.current();

        let mut chain = match self.unwinder.walk_callchain(&event.ips, &maps) {
            Ok(chain) => chain,
            Err(e) => {
                self.on_unwind_error(event.tid, event.timestamp, &e);
                return;
            }
        };

        let outcome = self.correct(event.tid, &mut chain, &maps);
        self.finish_sample(event.tid, event.cpu, event.timestamp, chain, outcome);
    }
}
