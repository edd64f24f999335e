pub mod collector;
pub mod source;

pub use collector::MetricReadError;
pub use source::{MetricsSource, MetricsSourceRef, SystemMetricsSource};
