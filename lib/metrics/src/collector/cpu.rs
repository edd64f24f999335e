use super::{MetricCollector, MetricReadError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::{instrument, trace};

/// Samples global CPU usage.
///
/// CPU usage is computed from the difference between two refreshes, so the
/// collector keeps one long-lived [`System`] and refreshes it on each call;
/// the value returned is the average load since the previous call.
pub struct CpuLoadCollector {
    system: Mutex<System>,
}

impl fmt::Debug for CpuLoadCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuLoadCollector").finish_non_exhaustive()
    }
}

impl Default for CpuLoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuLoadCollector {
    pub fn new() -> Self {
        // The initial refresh establishes the baseline for the first diff.
        let system =
            System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::everything()));

        Self {
            system: Mutex::new(system),
        }
    }
}

#[async_trait]
impl MetricCollector for CpuLoadCollector {
    type Value = f32;

    fn name(&self) -> &'static str {
        "cpu_load"
    }

    #[instrument(skip(self))]
    async fn collect(&self) -> Result<f32, MetricReadError> {
        let mut system = self.system.lock();
        system.refresh_cpu();

        if system.cpus().is_empty() {
            return Err(MetricReadError::NoCpuInfo);
        }

        let usage = system.global_cpu_info().cpu_usage();
        trace!(usage, "Sampled CPU usage");
        checked_usage(usage)
    }
}

// `clamp` lets NaN through.
fn checked_usage(usage: f32) -> Result<f32, MetricReadError> {
    if usage.is_finite() {
        Ok(usage.clamp(0.0, 100.0))
    } else {
        Err(MetricReadError::InvalidCpuLoad)
    }
}
