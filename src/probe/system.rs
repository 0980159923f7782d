use parking_lot::Mutex;
use sysinfo::System;

use super::{Probe, SystemReading};
use crate::error::ProbeError;

/// Host-wide CPU and memory usage.
///
/// CPU usage is computed between consecutive refreshes, so the first
/// reading after construction is relative to the priming refresh in
/// [`SystemProbe::new`].
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            system: Mutex::new(system),
        }
    }

    fn read(&self) -> Result<SystemReading, ProbeError> {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(ProbeError::Failed("total memory reported as zero".into()));
        }

        Ok(SystemReading {
            cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
            memory_percent: system.used_memory() as f64 / total as f64 * 100.0,
        })
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for SystemProbe {
    type Reading = SystemReading;

    async fn probe(&self) -> Result<SystemReading, ProbeError> {
        self.read()
    }
}
