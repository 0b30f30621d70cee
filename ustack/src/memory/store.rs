//! Live memory map of the traced process

use log::debug;
use std::sync::Arc;

use super::MemoryMapSnapshot;

/// Holds the one live [`MemoryMapSnapshot`] for a trace session
///
/// Replacement is eager and destructive: map-change events are delivered
/// before any sample that depends on the new layout, so no history is kept.
/// Snapshots are handed out as `Arc`s, which means a caller that obtained a
/// snapshot keeps unwinding against it even if the store moves on.
#[derive(Debug, Default)]
pub struct MemoryMapStore {
    current: Arc<MemoryMapSnapshot>,
    generation: u64,
}

impl MemoryMapStore {
    #[must_use]
    pub fn new(initial: MemoryMapSnapshot) -> Self {
        Self {
            current: Arc::new(initial),
            generation: 0,
        }
    }

    /// Install `snapshot`, discarding the previous one unconditionally
    pub fn replace(&mut self, snapshot: MemoryMapSnapshot) {
        self.generation += 1;
        debug!(
            "Memory map generation {} installed ({} regions, previously {})",
            self.generation,
            snapshot.len(),
            self.current.len()
        );
        self.current = Arc::new(snapshot);
    }

    #[must_use]
    pub fn current(&self) -> Arc<MemoryMapSnapshot> {
        Arc::clone(&self.current)
    }

    /// Number of replacements since construction
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
