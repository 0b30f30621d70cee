//! # Uprobe-Aware Unwinding
//!
//! Turns raw samples into call stacks that are correct even while
//! uretprobes have hijacked return addresses, and pairs probe entries with
//! exits into timed calls.
//!
//! ## Module Structure
//!
//! - **`unwinder`**: `framehop` walk over a stack snapshot, user-mode
//!   callchain extraction, and splicing a chain halted at a trampoline
//! - **`return_address_manager`**: a thread's stack of original return
//!   addresses
//! - **`function_call_manager`**: a thread's stack of pending calls
//! - **`thread_stacks`**: both stacks of a thread, pushed and popped together,
//!   keyed by thread id
//! - **`visitor`**: [`UnwindingVisitor`], which routes events to the above
//! - **`events`** / **`listener`**: what goes in and what comes out
//! - **`counters`**: shared failure counters
//!
//! ## Data Flow
//!
//! ```text
//! TraceEvent ──► UnwindingVisitor ──┬─► Unwinder ──► CallChain
//!                                   │                   │
//!                                   │   ReturnAddressManager::patch
//!                                   │                   │
//!                                   │                   ▼
//!                                   ├──────────► CorrectedCallStack ──┐
//!                                   │                                 ├─► TracerListener
//!                                   └─► ThreadStacks ──► CompletedFunctionCall ─┘
//! ```

pub mod counters;
pub mod events;
pub mod function_call_manager;
pub mod listener;
pub mod return_address_manager;
pub mod thread_stacks;
pub mod unwinder;
pub mod visitor;

pub use counters::{CounterSnapshot, UnwindCounters};
pub use events::{
    CallchainSampleEvent, EventVisitor, MapsEvent, ProbeEntryEvent, ProbeExitEvent,
    StackSampleEvent, TraceEvent,
};
pub use function_call_manager::{FunctionCallManager, PendingCall};
pub use listener::{ChannelListener, ListenerRecord, RecordingListener, TracerListener};
pub use return_address_manager::{PatchOutcome, ReturnAddressFrame, ReturnAddressManager};
pub use thread_stacks::{ThreadStackMap, ThreadStacks};
pub use unwinder::{CallChain, Registers, StackMemory, Unwinder, UnwinderConfig, DEFAULT_MAX_DEPTH};
pub use visitor::UnwindingVisitor;
