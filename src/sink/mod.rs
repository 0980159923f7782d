mod console;
mod csv;

pub use self::console::ConsoleSink;
pub use self::csv::{format_row, CsvSink, Provenance, CSV_HEADER};

use crate::error::SinkError;
use crate::record::CompositeRecord;

/// Sink consumes composite records, one per combiner tick.
///
/// Writes are synchronous and short; the combiner calls every sink in order
/// and a failure in one never prevents the others from receiving the record.
pub trait Sink: Send + Sync {
    /// Returns the sink's name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Persist or display a single record.
    fn write(&self, record: &CompositeRecord) -> Result<(), SinkError>;

    /// Flush buffered output and release resources. Idempotent.
    fn close(&self) -> Result<(), SinkError>;
}
