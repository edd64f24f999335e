use crate::collector::cpu::CpuLoadCollector;
use crate::collector::memory::FreeMemoryCollector;
use crate::collector::{MetricCollector, MetricReadError};
use async_trait::async_trait;
use common::Reading;
use getset::Getters;
use std::sync::Arc;
use tracing::debug;
use typed_builder::TypedBuilder;

/// A reference-counted handle to a [`MetricsSource`].
pub type MetricsSourceRef = Arc<dyn MetricsSource>;

/// Where the collector task gets its readings from.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Take one reading of the host's current CPU load and free memory.
    async fn read(&self) -> Result<Reading, MetricReadError>;
}

/// Reads the local host through `sysinfo`.
#[derive(Debug, Default, Getters, TypedBuilder)]
#[getset(get = "pub")]
pub struct SystemMetricsSource {
    #[builder(default)]
    cpu: CpuLoadCollector,
    #[builder(default)]
    memory: FreeMemoryCollector,
}

impl SystemMetricsSource {
    pub fn new() -> Self {
        SystemMetricsSource::builder().build()
    }
}

#[async_trait]
impl MetricsSource for SystemMetricsSource {
    async fn read(&self) -> Result<Reading, MetricReadError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(MetricReadError::UnsupportedPlatform);
        }

        debug!(
            "Collecting metrics from {} and {}",
            self.cpu.name(),
            self.memory.name()
        );
        let cpu_load = self.cpu.collect().await?;
        let mem_free = self.memory.collect().await?;

        Ok(Reading::builder()
            .cpu_load(cpu_load)
            .mem_free(mem_free)
            .build())
    }
}
