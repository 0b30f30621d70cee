//! # ustack - Main Entry Point
//!
//! Replays a recorded session through the unwinding visitor, prints a summary
//! to stderr, and optionally exports a Chrome trace.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::BufWriter;

use ustack::cli::Args;
use ustack::export::ChromeTraceExporter;
use ustack::replay::{display_summary, load_events, replay, CountingListener};
use ustack::unwinding::{UnwindCounters, UnwindingVisitor};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            // Help and version also arrive here
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run(args: &Args) -> Result<()> {
    let initial_maps = match args.maps {
        Some(ref path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read memory map: {}", path.display()))?,
        None => String::new(),
    };

    let events = load_events(&args.events)?;

    let exporter = args
        .export
        .as_ref()
        .map(|_| ChromeTraceExporter::new(args.pid));
    let mut visitor = UnwindingVisitor::with_config(
        &initial_maps,
        CountingListener::new(exporter),
        args.unwinder_config(),
        UnwindCounters::default(),
    );

    let summary = replay(&mut visitor, events);
    if !args.quiet {
        display_summary(&summary);
    }

    let exporter = visitor.into_listener().into_inner();
    if let (Some(path), Some(exporter)) = (args.export.as_ref(), exporter) {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        exporter.export(BufWriter::new(file))?;
        info!("Wrote {} trace events to {}", exporter.event_count(), path.display());
    }

    Ok(())
}
