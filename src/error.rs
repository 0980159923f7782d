//! Error taxonomy shared by the sampling engine.
//!
//! Probe and sink failures are contained where they happen: a [`ProbeError`]
//! is recorded on the sampler and surfaces once in the next summary, a
//! [`SinkError`] is logged by the combiner. Only [`MonitorError::Connection`]
//! aborts startup.

use std::time::Duration;

use thiserror::Error;

/// A single probe invocation failed.
///
/// Cloned into the sampler's sticky-error slot, so it carries rendered
/// messages rather than source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProbeError {
    /// Renders an `anyhow` chain into a recordable probe failure.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// No new sample arrived since the previous successful read.
///
/// A control signal for the reader, distinct from a legitimate zero value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no new measurements collected since last read")]
pub struct StaleRead;

/// A sink failed to persist or display a record.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("writing {sink} output: {source}")]
    Io {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("writing csv row: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0} sink is closed")]
    Closed(&'static str),
}

/// Lifecycle failures surfaced by [`crate::monitor::Monitor::start`].
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The initial OBS connection failed. Not retried.
    #[error("failed to connect to OBS: {0:#}")]
    Connection(#[source] anyhow::Error),

    /// Connected, but the data needed to configure samplers was unavailable.
    #[error("monitor setup failed: {0:#}")]
    Setup(#[source] anyhow::Error),

    #[error("monitor already started")]
    AlreadyStarted,

    /// Shutdown was requested before the monitor started.
    #[error("monitor has been shut down")]
    ShutDown,

    #[error(transparent)]
    Sink(#[from] SinkError),
}
