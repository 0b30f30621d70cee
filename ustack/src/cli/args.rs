//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::unwinding::{UnwinderConfig, DEFAULT_MAX_DEPTH};

#[derive(Parser, Debug)]
#[command(
    name = "ustack",
    about = "Replay recorded samples and uprobe events into corrected call stacks",
    after_help = "\
EXAMPLES:
    ustack --events session.jsonl                          Print a session summary
    ustack --events session.jsonl --maps maps.txt          Start from a saved /proc/<pid>/maps
    ustack --events session.jsonl --export trace.json      Write a Chrome trace
    ustack --events session.jsonl --trampoline 7fffffffe000"
)]
pub struct Args {
    /// Recorded event stream, one JSON event per line
    #[arg(short, long, value_name = "FILE")]
    pub events: PathBuf,

    /// Memory map of the traced process at session start
    #[arg(short, long, value_name = "FILE")]
    pub maps: Option<PathBuf>,

    /// Export corrected samples and calls as a Chrome trace
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Process ID to attribute exported events to
    #[arg(long, default_value = "0")]
    pub pid: u32,

    /// Trampoline address (hex) to recognize besides the [uprobes] page
    #[arg(long, value_name = "HEX", value_parser = parse_hex_address)]
    pub trampoline: Option<u64>,

    /// Maximum frames per unwound call stack
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn unwinder_config(&self) -> UnwinderConfig {
        UnwinderConfig {
            max_depth: self.max_depth,
            trampoline_address: self.trampoline,
        }
    }
}

fn parse_hex_address(s: &str) -> Result<u64, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))
}
