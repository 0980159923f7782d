use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::SecondsFormat;
use parking_lot::Mutex;

use super::Sink;
use crate::error::SinkError;
use crate::record::{rtt_millis, CompositeRecord, SourceValue};

/// Column header, written once after the provenance row.
pub const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "obs_rtt_ms",
    "google_rtt_ms",
    "stream_active",
    "output_bytes",
    "output_skipped_frames",
    "output_frames",
    "obs_cpu_percent",
    "obs_memory_mb",
    "system_cpu_percent",
    "system_memory_percent",
    "errors",
];

/// Describes where a CSV file's data came from. Written as the first row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub obs_version: String,
    pub stream_domain: String,
    pub os: String,
}

impl Provenance {
    fn row(&self) -> [String; 3] {
        [
            format!("OBS Studio version: {}", self.obs_version),
            format!("Stream domain: {}", self.stream_domain),
            format!("OS: {}", self.os),
        ]
    }
}

/// Appends one row per record to a freshly created CSV file.
///
/// The provenance row has 3 fields and every later row has 12, so the
/// writer runs in flexible mode. Rows are flushed as they are written.
pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<Option<csv::Writer<BufWriter<File>>>>,
}

impl CsvSink {
    /// Create (or truncate) `path` and write the provenance and header rows.
    pub fn create(path: &Path, provenance: &Provenance) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|source| SinkError::Io { sink: "csv", source })?;

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(BufWriter::new(file));

        writer.write_record(provenance.row())?;
        writer.write_record(CSV_HEADER)?;
        writer
            .flush()
            .map_err(|source| SinkError::Io { sink: "csv", source })?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Renders the 12 columns of a data row.
pub fn format_row(record: &CompositeRecord) -> [String; 12] {
    let rtt = |value: &SourceValue<Duration>| {
        rtt_millis(value)
            .map(|ms| format!("{ms:.2}"))
            .unwrap_or_default()
    };

    let stream = &record.stream.value;
    let obs = &record.obs_stats.value;
    let system = &record.system.value;

    [
        record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
        rtt(&record.obs_ping),
        rtt(&record.reference_ping),
        stream.active.to_string(),
        format!("{:.0}", stream.output_bytes),
        format!("{:.0}", stream.skipped_frames),
        format!("{:.0}", stream.total_frames),
        format!("{:.2}", obs.cpu_percent),
        format!("{:.2}", obs.memory_mb),
        format!("{:.2}", system.cpu_percent),
        format!("{:.2}", system.memory_percent),
        record.error_summary(),
    ]
}

impl Sink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&self, record: &CompositeRecord) -> Result<(), SinkError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(SinkError::Closed("csv"))?;

        writer.write_record(format_row(record))?;
        writer
            .flush()
            .map_err(|source| SinkError::Io { sink: "csv", source })
    }

    fn close(&self) -> Result<(), SinkError> {
        match self.writer.lock().take() {
            Some(mut writer) => writer
                .flush()
                .map_err(|source| SinkError::Io { sink: "csv", source }),
            None => Ok(()),
        }
    }
}
