use async_trait::async_trait;
use thiserror::Error;

pub mod cpu;
pub mod memory;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricReadError {
    #[error("System metrics are not supported on this platform")]
    UnsupportedPlatform,

    #[error("No CPU information available")]
    NoCpuInfo,

    #[error("CPU usage reading was not a number")]
    InvalidCpuLoad,

    #[error("No memory information available")]
    NoMemoryInfo,
}

/// A single host metric that can be sampled on demand.
///
/// Collectors own whatever system handle they need and refresh it on every
/// call, so two consecutive `collect` calls observe two distinct moments.
#[async_trait]
pub trait MetricCollector: Send + Sync {
    type Value: Send;

    fn name(&self) -> &'static str;

    async fn collect(&self) -> Result<Self::Value, MetricReadError>;
}
