//! Failure and discard counters shared with a reporting thread

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter handles incremented by the visitor
///
/// The handles are owned by whoever reports them; the visitor only ever
/// increments. Cloning shares the same underlying counters.
#[derive(Debug, Clone, Default)]
pub struct UnwindCounters {
    /// Samples dropped because unwinding failed
    pub unwind_errors: Arc<AtomicU64>,
    /// Samples dropped because they halted at a trampoline with no recorded
    /// return address left to splice in
    pub discarded_samples: Arc<AtomicU64>,
    /// Probe exits that had no pending probe entry on their thread
    pub unmatched_exits: Arc<AtomicU64>,
    /// Probe entries delivered twice across a thread migration
    pub duplicate_entries: Arc<AtomicU64>,
}

/// Point-in-time copy of [`UnwindCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub unwind_errors: u64,
    pub discarded_samples: u64,
    pub unmatched_exits: u64,
    pub duplicate_entries: u64,
}

impl UnwindCounters {
    /// Use externally owned handles for the two counters a reporting layer
    /// always consumes; the others start fresh.
    #[must_use]
    pub fn with_handles(unwind_errors: Arc<AtomicU64>, discarded_samples: Arc<AtomicU64>) -> Self {
        Self {
            unwind_errors,
            discarded_samples,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            unwind_errors: self.unwind_errors.load(Ordering::Relaxed),
            discarded_samples: self.discarded_samples.load(Ordering::Relaxed),
            unmatched_exits: self.unmatched_exits.load(Ordering::Relaxed),
            duplicate_entries: self.duplicate_entries.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let counters = UnwindCounters::default();
        let reporter = counters.clone();

        increment(&counters.unwind_errors);
        increment(&counters.discarded_samples);
        increment(&counters.discarded_samples);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.unwind_errors, 1);
        assert_eq!(snapshot.discarded_samples, 2);
        assert_eq!(snapshot.unmatched_exits, 0);
    }

    #[test]
    fn test_external_handles_observed_across_threads() {
        let errors = Arc::new(AtomicU64::new(0));
        let discarded = Arc::new(AtomicU64::new(0));
        let counters = UnwindCounters::with_handles(Arc::clone(&errors), Arc::clone(&discarded));

        std::thread::spawn(move || increment(&counters.unwind_errors))
            .join()
            .unwrap();

        assert_eq!(errors.load(Ordering::Relaxed), 1);
        assert_eq!(discarded.load(Ordering::Relaxed), 0);
    }
}
