//! # Process Memory Layout
//!
//! Unwinding needs to know, for every candidate return address, whether it
//! points into executable code. That information comes from the traced
//! process's memory map (`/proc/<pid>/maps`), which changes as libraries are
//! loaded and unloaded.
//!
//! ## Module Structure
//!
//! - **`maps`**: parsing of maps text into a [`MemoryMapSnapshot`]
//!   - Strict parsing for tooling, lossy parsing for live sessions
//!   - Recognizes the `[uprobes]` trampoline page
//!
//! - **`store`**: the [`MemoryMapStore`] holding the live snapshot
//!   - Replaced wholesale on every map-change event
//!
//! ## The `[uprobes]` page
//!
//! When a uretprobe is armed, the kernel maps a special executable page into
//! the process and rewrites the function's return address to point into it:
//!
//! ```text
//! 7fffffffe000-7ffffffff000 r-xp 00000000 00:00 0    [uprobes]
//! ```
//!
//! Any return address found inside that page is a hijacked one.

pub mod maps;
pub mod store;

pub use maps::{MemoryMapSnapshot, MemoryRegion, Permissions, UPROBES_REGION_PATH};
pub use store::MemoryMapStore;
