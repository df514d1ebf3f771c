//! `loopcheck trace`: latency between paired labels in a firmware trace dump.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use loopcheck_core::trace::{pair_intervals, read_trace, LatencySummary};

use super::{flag_value, header, print_json};

const DEFAULT_START_LABEL: &str = "USBHS_IRQHandler-start";
const DEFAULT_END_LABEL: &str = "USBHS_IRQHandler-end";

#[derive(Debug, PartialEq)]
pub struct TraceArgs {
    pub file: PathBuf,
    pub start: String,
    pub end: String,
}

impl TraceArgs {
    pub fn parse(args: &[&str]) -> Result<Self> {
        let mut file = None;
        let mut start = DEFAULT_START_LABEL.to_string();
        let mut end = DEFAULT_END_LABEL.to_string();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "--start" => start = flag_value(args, &mut i, "--start")?,
                "--end" => end = flag_value(args, &mut i, "--end")?,
                flag if flag.starts_with("--") => bail!("unknown trace option: {flag}"),
                path if file.is_none() => file = Some(PathBuf::from(path)),
                extra => bail!("unexpected argument: {extra}"),
            }
            i += 1;
        }
        let file = file.context("trace requires a file")?;
        Ok(Self { file, start, end })
    }
}

#[derive(Serialize)]
struct TraceReport {
    file: String,
    start: String,
    end: String,
    events: usize,
    unordered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<LatencySummary>,
}

fn print_human(report: &TraceReport) {
    header(&format!("Trace {}", report.file));
    println!("  Events    : {}", report.events);
    println!("  Pair      : {} → {}", report.start, report.end);
    match &report.latency {
        Some(l) => {
            println!("  Intervals : {}", l.count);
            println!("  Min       : {} us", l.min_us);
            println!("  Mean      : {:.1} us", l.mean_us);
            println!("  Median    : {} us", l.median_us);
            println!("  Max       : {} us", l.max_us);
        }
        None => println!("\n  No complete start/end pairs found."),
    }
    if report.unordered > 0 {
        println!("  Skipped {} pair(s) whose end precedes the start.", report.unordered);
    }
}

pub fn run(args: TraceArgs, json: bool) -> Result<bool> {
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let events = read_trace(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", args.file.display()))?;

    let (intervals, unordered) = pair_intervals(&events, &args.start, &args.end);
    let report = TraceReport {
        file: args.file.display().to_string(),
        events: events.len(),
        unordered,
        latency: LatencySummary::from_intervals(&intervals),
        start: args.start,
        end: args.end,
    };

    if json {
        print_json(&report)?;
    } else {
        print_human(&report);
    }
    Ok(true)
}
