use std::io::{self, Stdout, Write};

use chrono::Local;
use parking_lot::Mutex;

use super::Sink;
use crate::error::SinkError;
use crate::record::{rtt_millis, CompositeRecord};

/// Rows between repeated headers.
const HEADER_EVERY: usize = 20;

/// Column titles and widths. The trailing errors column is unpadded.
const COLUMNS: [(&str, usize); 11] = [
    ("Time", 8),
    ("OBS RTT", 9),
    ("Ref RTT", 9),
    ("Stream", 6),
    ("Bytes", 12),
    ("Skipped", 7),
    ("Frames", 7),
    ("OBS CPU", 7),
    ("OBS MB", 9),
    ("Sys CPU", 7),
    ("Sys Mem", 7),
];

/// Fixed-width table on a terminal, one line per record.
pub struct ConsoleSink<W: Write + Send = Stdout> {
    state: Mutex<ConsoleState<W>>,
}

struct ConsoleState<W> {
    out: W,
    rows: usize,
    closed: bool,
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                out,
                rows: 0,
                closed: false,
            }),
        }
    }

    /// Consumes the sink and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.state.into_inner().out
    }
}

fn header_lines() -> [String; 2] {
    let mut header = String::new();
    let mut separator = String::new();
    for (title, width) in COLUMNS {
        header.push_str(&format!(" {title:>width$} |"));
        separator.push_str(&format!("-{}-+", "-".repeat(width)));
    }
    header.push_str(" Errors");
    separator.push_str("-------");
    [header, separator]
}

fn data_line(record: &CompositeRecord) -> String {
    let rtt = |ms: Option<f64>| ms.map_or_else(|| "-".to_string(), |ms| format!("{ms:.2}"));

    let stream = &record.stream.value;
    let obs = &record.obs_stats.value;
    let system = &record.system.value;

    let cells = [
        record
            .timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string(),
        rtt(rtt_millis(&record.obs_ping)),
        rtt(rtt_millis(&record.reference_ping)),
        if stream.active { "live" } else { "off" }.to_string(),
        format!("{:.0}", stream.output_bytes),
        format!("{:.0}", stream.skipped_frames),
        format!("{:.0}", stream.total_frames),
        format!("{:.2}", obs.cpu_percent),
        format!("{:.2}", obs.memory_mb),
        format!("{:.2}", system.cpu_percent),
        format!("{:.2}", system.memory_percent),
    ];

    let mut line = String::new();
    for (cell, (_, width)) in cells.iter().zip(COLUMNS) {
        line.push_str(&format!(" {cell:>width$} |"));
    }

    let errors = record.error_summary();
    if !errors.is_empty() {
        line.push(' ');
        line.push_str(&errors);
    }
    line
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn name(&self) -> &'static str {
        "console"
    }

    fn write(&self, record: &CompositeRecord) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed("console"));
        }

        let io_err = |source| SinkError::Io {
            sink: "console",
            source,
        };

        if state.rows % HEADER_EVERY == 0 {
            if state.rows > 0 {
                writeln!(state.out).map_err(io_err)?;
            }
            for line in header_lines() {
                writeln!(state.out, "{line}").map_err(io_err)?;
            }
        }

        writeln!(state.out, "{}", data_line(record)).map_err(io_err)?;
        state.out.flush().map_err(io_err)?;
        state.rows += 1;

        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.out.flush().map_err(|source| SinkError::Io {
            sink: "console",
            source,
        })
    }
}
