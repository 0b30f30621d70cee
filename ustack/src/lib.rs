//! # ustack - Uprobe-Aware Call Stack Unwinding
//!
//! Dynamic instrumentation with uretprobes works by overwriting the return
//! address of every instrumented function with the address of a kernel
//! trampoline page (`[uprobes]`). Any call stack sampled while such a function
//! is active therefore ends at the trampoline instead of reaching `main`.
//!
//! ustack consumes a time-ordered stream of samples, probe events, and memory
//! map changes for one process. It remembers the original return addresses
//! captured at function entry and splices them back into sampled stacks,
//! producing correct call stacks plus timed records of every instrumented call.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             Recorded Session (JSON lines, time order)           │
//! │  maps │ probe_entry │ probe_exit │ stack_sample │ callchain     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ TraceEvent
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      UnwindingVisitor                           │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │
//! │  │ MemoryMap    │──▶│   Unwinder   │──▶│ ReturnAddress    │     │
//! │  │   Store      │   │ (frame ptrs) │   │   Manager        │     │
//! │  └──────────────┘   └──────────────┘   └────────┬─────────┘     │
//! │                                                 │ patched       │
//! │  ┌──────────────┐                               ▼               │
//! │  │ FunctionCall │──────────────▶  CompletedFunctionCall         │
//! │  │   Manager    │                 CorrectedCallStack            │
//! │  └──────────────┘                               │               │
//! └─────────────────────────────────────────────────┼───────────────┘
//!                                                   ▼
//!                   TracerListener (recording, channel, Chrome trace)
//! ```
//!
//! ## Module Structure
//!
//! - [`unwinding`]: the visitor, the unwinder, and the two per-thread managers
//! - [`memory`]: memory map parsing and the live map store
//! - [`trace_data`]: records handed to listeners
//! - [`replay`]: loading and replaying recorded sessions
//! - [`export`]: Chrome Trace Event Format output
//! - [`cli`]: command-line arguments
//! - [`domain`]: newtypes and error enums
//!
//! ## Failure Model
//!
//! Lost or damaged events never stop a session. Samples that cannot be
//! unwound or corrected are dropped and counted in [`unwinding::UnwindCounters`];
//! probe exits without an entry are counted and ignored.

pub mod cli;
pub mod domain;
pub mod export;
pub mod memory;
pub mod replay;
pub mod trace_data;
pub mod unwinding;
