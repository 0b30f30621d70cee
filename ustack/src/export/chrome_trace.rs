use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;

use crate::domain::{Tid, Timestamp};
use crate::trace_data::{CompletedFunctionCall, CorrectedCallStack};
use crate::unwinding::TracerListener;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    /// Event name (function identity or "sample")
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "X" = complete, "i" = instant, "M" = metadata
    ph: String,
    /// Timestamp in microseconds, relative to the first event
    ts: f64,
    /// Duration in microseconds, complete events only
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    /// Instant event scope ("t" = thread)
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Collects visitor output for viewing in `chrome://tracing` or Perfetto
///
/// Calls become complete (`"X"`) slices, corrected samples become instant
/// (`"i"`) markers carrying their frames. Implements [`TracerListener`] so it
/// can sit directly behind the visitor.
pub struct ChromeTraceExporter {
    pid: u32,
    events: Vec<ChromeTraceEvent>,
    threads: BTreeSet<Tid>,
    /// Start timestamp for relative timing
    start: Option<Timestamp>,
}

impl ChromeTraceExporter {
    /// Create an exporter whose events are attributed to process `pid`
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            events: Vec::new(),
            threads: BTreeSet::new(),
            start: None,
        }
    }

    fn relative_micros(&mut self, ts: Timestamp) -> f64 {
        let start = *self.start.get_or_insert(ts);
        Timestamp(ts.saturating_since(start)).as_micros_f64()
    }

    pub fn add_call(&mut self, call: &CompletedFunctionCall) {
        let ts = self.relative_micros(call.entry_timestamp);
        self.threads.insert(call.tid);

        let mut args = HashMap::new();
        args.insert("cpu".to_string(), serde_json::json!(call.cpu.0));
        args.insert("depth".to_string(), serde_json::json!(call.depth));

        self.events.push(ChromeTraceEvent {
            name: call.function.to_string(),
            cat: "function".to_string(),
            ph: "X".to_string(),
            ts,
            dur: Some(Timestamp(call.duration_ns()).as_micros_f64()),
            s: None,
            pid: self.pid,
            tid: call.tid.0,
            args: Some(args),
        });
    }

    pub fn add_sample(&mut self, sample: &CorrectedCallStack) {
        let ts = self.relative_micros(sample.timestamp);
        self.threads.insert(sample.tid);

        let frames: Vec<String> = sample
            .frames
            .iter()
            .map(|addr| format!("0x{addr:x}"))
            .collect();
        let mut args = HashMap::new();
        args.insert("cpu".to_string(), serde_json::json!(sample.cpu.0));
        args.insert("frames".to_string(), serde_json::json!(frames));

        self.events.push(ChromeTraceEvent {
            name: "sample".to_string(),
            cat: "sample".to_string(),
            ph: "i".to_string(),
            ts,
            dur: None,
            s: Some("t".to_string()),
            pid: self.pid,
            tid: sample.tid.0,
            args: Some(args),
        });
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Fails when the writer does.
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        let mut all_events = self.events.clone();

        for tid in &self.threads {
            let mut args = HashMap::new();
            args.insert("name".to_string(), serde_json::json!(tid.to_string()));

            all_events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                dur: None,
                s: None,
                pid: self.pid,
                tid: tid.0,
                args: Some(args),
            });
        }

        let trace = ChromeTrace {
            trace_events: all_events,
            display_time_unit: "ms".to_string(),
        };

        serde_json::to_writer_pretty(writer, &trace).context("Failed to write trace JSON")?;

        Ok(())
    }

    /// Get the number of events collected
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl TracerListener for ChromeTraceExporter {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        self.add_sample(&sample);
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        self.add_call(&call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CpuId, FunctionId};

    fn export_json(exporter: &ChromeTraceExporter) -> JsonValue {
        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        serde_json::from_slice(&buffer).unwrap()
    }

    #[test]
    fn test_call_becomes_complete_event() {
        let mut exporter = ChromeTraceExporter::new(42);
        exporter.add_call(&CompletedFunctionCall {
            tid: Tid(7),
            cpu: CpuId(1),
            function: FunctionId(0x4010),
            entry_timestamp: Timestamp(5_000),
            exit_timestamp: Timestamp(7_500),
            depth: 0,
        });

        let json = export_json(&exporter);
        assert_eq!(json["displayTimeUnit"], "ms");

        let event = &json["traceEvents"][0];
        assert_eq!(event["ph"], "X");
        assert_eq!(event["name"], "fn@0x4010");
        assert_eq!(event["ts"], 0.0);
        assert_eq!(event["dur"], 2.5);
        assert_eq!(event["pid"], 42);
        assert_eq!(event["tid"], 7);
    }

    #[test]
    fn test_sample_becomes_instant_event_with_frames() {
        let mut exporter = ChromeTraceExporter::new(1);
        exporter.on_function_call(CompletedFunctionCall {
            tid: Tid(3),
            cpu: CpuId(0),
            function: FunctionId(0x1),
            entry_timestamp: Timestamp(1_000),
            exit_timestamp: Timestamp(9_000),
            depth: 0,
        });
        exporter.on_callstack_sample(CorrectedCallStack {
            tid: Tid(3),
            cpu: CpuId(0),
            timestamp: Timestamp(3_000),
            frames: vec![0x40_0100, 0xdead],
        });

        let json = export_json(&exporter);
        let sample = &json["traceEvents"][1];
        assert_eq!(sample["ph"], "i");
        assert_eq!(sample["ts"], 2.0);
        assert_eq!(
            sample["args"]["frames"],
            serde_json::json!(["0x400100", "0xdead"])
        );
        assert!(sample.get("dur").is_none());
    }

    #[test]
    fn test_thread_name_metadata_once_per_thread() {
        let mut exporter = ChromeTraceExporter::new(1);
        for ts in [10, 20] {
            exporter.add_sample(&CorrectedCallStack {
                tid: Tid(9),
                cpu: CpuId(0),
                timestamp: Timestamp(ts),
                frames: vec![0x1000],
            });
        }

        let json = export_json(&exporter);
        let events = json["traceEvents"].as_array().unwrap();
        let metadata: Vec<_> = events.iter().filter(|e| e["ph"] == "M").collect();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0]["args"]["name"], "TID:9");
        assert_eq!(exporter.event_count(), 2);
    }
}
