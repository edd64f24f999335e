use super::{MetricCollector, MetricReadError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use sysinfo::System;
use tracing::{instrument, trace};

/// Samples free (unused) physical memory, in bytes.
pub struct FreeMemoryCollector {
    system: Mutex<System>,
}

impl fmt::Debug for FreeMemoryCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeMemoryCollector").finish_non_exhaustive()
    }
}

impl Default for FreeMemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeMemoryCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();

        Self {
            system: Mutex::new(system),
        }
    }
}

#[async_trait]
impl MetricCollector for FreeMemoryCollector {
    type Value = u64;

    fn name(&self) -> &'static str {
        "mem_free"
    }

    #[instrument(skip(self))]
    async fn collect(&self) -> Result<u64, MetricReadError> {
        let mut system = self.system.lock();
        system.refresh_memory();

        // A zero total means the platform gave us nothing to read.
        if system.total_memory() == 0 {
            return Err(MetricReadError::NoMemoryInfo);
        }

        let free = system.free_memory();
        trace!(free, total = system.total_memory(), "Sampled free memory");
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn free_memory_fits_in_total() {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return;
        }

        let collector = FreeMemoryCollector::new();
        let free = collector.collect().await.expect("free memory");

        let mut system = System::new();
        system.refresh_memory();
        assert!(free <= system.total_memory());
    }
}
