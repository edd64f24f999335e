use crate::blocking::with_store;
use crate::error::CollectError;
use crate::periodic::PeriodicTask;
use async_trait::async_trait;
use common::Sample;
use metrics::MetricsSourceRef;
use storage::SampleStoreRef;
use tracing::{debug, warn};

/// Reads the host metrics once per tick and appends them to the store.
pub struct Collector {
    source: MetricsSourceRef,
    store: SampleStoreRef,
}

impl Collector {
    pub fn new(source: MetricsSourceRef, store: SampleStoreRef) -> Self {
        Self { source, store }
    }

    /// One read-then-append. Nothing is written if the read fails.
    pub async fn collect_once(&self) -> Result<Sample, CollectError> {
        let reading = self.source.read().await?;
        with_store(&self.store, move |store| store.append(reading)).await
    }
}

#[async_trait]
impl PeriodicTask for Collector {
    fn name(&self) -> &'static str {
        "collector"
    }

    async fn tick(&mut self) {
        match self.collect_once().await {
            Ok(sample) => debug!(%sample, "Sample stored"),
            Err(e) => warn!(error = %e, "Skipping collection tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{setup_store, BrokenStore, FakeSource, ThreadRecordingStore};
    use common::{Reading, SampleId};
    use metrics::MetricReadError;
    use pretty_assertions_sorted::assert_eq;
    use std::sync::Arc;
    use storage::SampleStore;

    #[tokio::test]
    async fn each_tick_appends_one_sample() {
        let (store, _temp_dir) = setup_store();
        let mut collector = Collector::new(Arc::new(FakeSource::default()), store.clone());

        collector.tick().await;
        collector.tick().await;

        let samples = store.list_all().unwrap();
        assert_eq!(
            samples.iter().map(|s| s.id()).collect::<Vec<_>>(),
            vec![SampleId(1), SampleId(2)]
        );
        assert_eq!(samples[0].reading(), Reading::new(1.0, 1000));
        assert_eq!(samples[1].reading(), Reading::new(2.0, 2000));
    }

    #[tokio::test]
    async fn failed_read_appends_nothing_and_next_tick_recovers() {
        let (store, _temp_dir) = setup_store();
        let source = Arc::new(FakeSource::scripted(vec![Err(MetricReadError::NoCpuInfo)]));
        let mut collector = Collector::new(source.clone(), store.clone());

        let result = collector.collect_once().await;
        assert!(matches!(result, Err(CollectError::MetricRead(MetricReadError::NoCpuInfo))));
        assert_eq!(store.pending_count(), 0);

        collector.tick().await;
        assert_eq!(source.reads(), 2);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn storage_fault_is_reported_not_raised() {
        let mut collector = Collector::new(Arc::new(FakeSource::default()), Arc::new(BrokenStore));

        let result = collector.collect_once().await;
        assert!(matches!(result, Err(CollectError::Storage(_))));

        // The periodic body swallows it.
        collector.tick().await;
    }

    #[tokio::test]
    async fn append_runs_on_the_blocking_pool() {
        let (inner, _temp_dir) = setup_store();
        let store = Arc::new(ThreadRecordingStore::new(inner.clone()));
        let mut collector = Collector::new(Arc::new(FakeSource::default()), store.clone());

        collector.tick().await;

        let runtime_thread = std::thread::current().id();
        assert_eq!(store.threads().len(), 1);
        assert!(store.threads().iter().all(|t| *t != runtime_thread));
        assert_eq!(inner.pending_count(), 1);
    }
}
