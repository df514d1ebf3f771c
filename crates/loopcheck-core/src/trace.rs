//! Firmware trace timing: parse timestamped log lines and pair start/end
//! events by label to get per-interval latencies.
//!
//! Line format: `<seconds>s <millis>ms <micros>us ... <label>`. The label is
//! the last whitespace-separated token. Serial captures often carry stray
//! control bytes, so non-printable characters are stripped before parsing.

use std::io::BufRead;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub at: Duration,
    pub label: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("line {line}: expected `<s>s <ms>ms <us>us <label>`, got {text:?}")]
    Malformed { line: usize, text: String },
    #[error("line {line}: bad {unit} field {field:?}")]
    BadField {
        line: usize,
        unit: &'static str,
        field: String,
    },
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a single trace line. `line_no` is only used for error reporting.
pub fn parse_line(line_no: usize, raw: &str) -> Result<TraceEvent, TraceError> {
    let text: String = raw
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    let fields: Vec<&str> = text.split(' ').filter(|f| !f.is_empty()).collect();
    if fields.len() < 4 {
        return Err(TraceError::Malformed {
            line: line_no,
            text,
        });
    }

    let s = parse_unit(line_no, fields[0], "s")?;
    let ms = parse_unit(line_no, fields[1], "ms")?;
    let us = parse_unit(line_no, fields[2], "us")?;
    let label = fields[fields.len() - 1].to_string();

    let at = Duration::from_secs(s) + Duration::from_millis(ms) + Duration::from_micros(us);
    Ok(TraceEvent { at, label })
}

fn parse_unit(line: usize, field: &str, unit: &'static str) -> Result<u64, TraceError> {
    field
        .strip_suffix(unit)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| TraceError::BadField {
            line,
            unit,
            field: field.to_string(),
        })
}

/// Read every non-blank line of a trace.
pub fn read_trace(reader: impl BufRead) -> Result<Vec<TraceEvent>, TraceError> {
    let mut events = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(parse_line(i + 1, &line)?);
    }
    Ok(events)
}

/// Pair the n-th `start` event with the n-th `end` event and return the
/// intervals. Pairs whose end precedes their start are skipped; the second
/// value counts them.
pub fn pair_intervals(events: &[TraceEvent], start: &str, end: &str) -> (Vec<Duration>, usize) {
    let starts = events.iter().filter(|e| e.label == start);
    let ends = events.iter().filter(|e| e.label == end);

    let mut intervals = Vec::new();
    let mut unordered = 0;
    for (s, e) in starts.zip(ends) {
        match e.at.checked_sub(s.at) {
            Some(d) => intervals.push(d),
            None => unordered += 1,
        }
    }
    (intervals, unordered)
}

/// Summary statistics over a set of intervals, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub median_us: u64,
}

impl LatencySummary {
    pub fn from_intervals(intervals: &[Duration]) -> Option<Self> {
        if intervals.is_empty() {
            return None;
        }
        let mut us: Vec<u64> = intervals.iter().map(|d| d.as_micros() as u64).collect();
        us.sort_unstable();
        let total: u64 = us.iter().sum();
        Some(Self {
            count: us.len(),
            min_us: us[0],
            max_us: us[us.len() - 1],
            mean_us: total as f64 / us.len() as f64,
            median_us: us[us.len() / 2],
        })
    }
}
