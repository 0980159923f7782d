//! OBS Studio stream health monitor.
//!
//! Independent samplers poll OBS over obs-websocket, ping the stream ingest
//! and a reference host, and read local CPU and memory. A combiner drains
//! them on a slower tick and writes one merged row to CSV and the console.

pub mod combiner;
pub mod config;
pub mod error;
pub mod export;
pub mod monitor;
pub mod obs;
pub mod probe;
pub mod record;
pub mod sampler;
pub mod sink;
