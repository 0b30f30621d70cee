//! # Recorded Session Replay
//!
//! A recorded session is a JSON-lines file, one [`TraceEvent`] per line,
//! tagged by `"kind"`:
//!
//! ```text
//! {"kind":"maps","timestamp":0,"maps":"400000-500000 r-xp 00000000 fd:01 10 /usr/bin/app\n"}
//! {"kind":"probe_entry","tid":7,"cpu":0,"timestamp":100,"function":4198400,"stack_pointer":28672,"stack_top":[173,222,0,0,0,0,0,0]}
//! {"kind":"probe_exit","tid":7,"cpu":0,"timestamp":200}
//! ```
//!
//! Replaying feeds the events through an [`UnwindingVisitor`] in file order
//! and reports a [`SessionSummary`].

use anyhow::{Context, Result};
use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::domain::{ReplayError, Timestamp};
use crate::trace_data::{CompletedFunctionCall, CorrectedCallStack};
use crate::unwinding::{CounterSnapshot, TraceEvent, TracerListener, UnwindingVisitor};

/// Parse a JSON-lines event stream; blank lines are skipped
///
/// # Errors
/// Returns the 1-based line number of the first event that does not parse.
pub fn read_events<R: BufRead>(reader: R) -> Result<Vec<TraceEvent>, ReplayError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| ReplayError::InvalidEvent {
            line: idx + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Load a recorded event stream from disk
///
/// # Errors
/// Fails when the file cannot be opened or holds an invalid event.
pub fn load_events(path: impl AsRef<Path>) -> Result<Vec<TraceEvent>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open event file: {}", path.display()))?;
    let events = read_events(BufReader::new(file))
        .with_context(|| format!("Failed to read events from {}", path.display()))?;
    info!("Loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

/// Counts what passes through to the wrapped listener
#[derive(Debug, Default)]
pub struct CountingListener<L> {
    inner: L,
    samples: u64,
    calls: u64,
}

impl<L: TracerListener> CountingListener<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            samples: 0,
            calls: 0,
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: TracerListener> TracerListener for CountingListener<L> {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        self.samples += 1;
        self.inner.on_callstack_sample(sample);
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        self.calls += 1;
        self.inner.on_function_call(call);
    }
}

/// Totals for one replayed session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub events: u64,
    /// Events whose timestamp is earlier than the one before
    pub out_of_order: u64,
    pub samples_emitted: u64,
    pub calls_emitted: u64,
    pub counters: CounterSnapshot,
}

/// Feed `events` through `visitor` in order
pub fn replay<L, I>(
    visitor: &mut UnwindingVisitor<CountingListener<L>>,
    events: I,
) -> SessionSummary
where
    L: TracerListener,
    I: IntoIterator<Item = TraceEvent>,
{
    let mut summary = SessionSummary::default();
    let mut last_timestamp = Timestamp(0);

    for event in events {
        let timestamp = event.timestamp();
        if timestamp < last_timestamp {
            if summary.out_of_order == 0 {
                warn!("Event at {timestamp} arrived after {last_timestamp}; results may be wrong");
            }
            summary.out_of_order += 1;
        }
        last_timestamp = last_timestamp.max(timestamp);

        visitor.process(event);
        summary.events += 1;
    }

    summary.samples_emitted = visitor.listener().samples();
    summary.calls_emitted = visitor.listener().calls();
    summary.counters = visitor.counters().snapshot();

    info!(
        "Replayed {} events: {} samples, {} calls",
        summary.events, summary.samples_emitted, summary.calls_emitted
    );
    summary
}

/// Display session statistics
pub fn display_summary(summary: &SessionSummary) {
    eprintln!(
        "events={} samples={} calls={} out_of_order={}",
        summary.events, summary.samples_emitted, summary.calls_emitted, summary.out_of_order
    );
    eprintln!(
        "stats: unwind_errors={} discarded_samples={} unmatched_exits={} duplicate_entries={}",
        summary.counters.unwind_errors,
        summary.counters.discarded_samples,
        summary.counters.unmatched_exits,
        summary.counters.duplicate_entries
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CpuId, FunctionId, Tid};
    use crate::unwinding::{ProbeEntryEvent, ProbeExitEvent, RecordingListener};
    use std::io::Cursor;

    #[test]
    fn test_read_events_skips_blank_lines() {
        let input = "\n{\"kind\":\"probe_exit\",\"tid\":1,\"cpu\":0,\"timestamp\":5}\n   \n";
        let events = read_events(Cursor::new(input)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp(), Timestamp(5));
    }

    #[test]
    fn test_read_events_reports_line_number() {
        let input = concat!(
            "{\"kind\":\"probe_exit\",\"tid\":1,\"cpu\":0,\"timestamp\":5}\n",
            "{\"kind\":\"bogus\"}\n",
        );
        let err = read_events(Cursor::new(input)).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidEvent { line: 2, .. }));
    }

    #[test]
    fn test_replay_counts_and_flags_disorder() {
        let tid = Tid(1);
        let events = vec![
            TraceEvent::ProbeEntry(ProbeEntryEvent::new(
                tid,
                CpuId(0),
                Timestamp(10),
                FunctionId(0xf),
                0x7000,
                0xdead,
            )),
            TraceEvent::ProbeExit(ProbeExitEvent {
                tid,
                cpu: CpuId(0),
                timestamp: Timestamp(20),
            }),
            TraceEvent::ProbeExit(ProbeExitEvent {
                tid,
                cpu: CpuId(0),
                timestamp: Timestamp(15),
            }),
        ];

        let listener = CountingListener::new(RecordingListener::new());
        let mut visitor = UnwindingVisitor::new("", listener);
        let summary = replay(&mut visitor, events);

        assert_eq!(summary.events, 3);
        assert_eq!(summary.out_of_order, 1);
        assert_eq!(summary.calls_emitted, 1);
        assert_eq!(summary.samples_emitted, 0);
        assert_eq!(summary.counters.unmatched_exits, 1);
        assert_eq!(visitor.into_listener().into_inner().calls.len(), 1);
    }
}
