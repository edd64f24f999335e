//! Scripted stand-ins for the metrics source, the transport and the store.

use async_trait::async_trait;
use common::{Reading, Sample, SampleBatch};
use metrics::{MetricReadError, MetricsSource};
use network::{DeliveryError, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use storage::{FileSampleStore, SampleStore, SampleStoreRef, StoreError};

pub(crate) fn setup_store() -> (Arc<FileSampleStore>, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join(format!("agent_{}.db", rand::random::<u32>()));
    let store = Arc::new(FileSampleStore::open(&db_path).expect("Failed to open sample store"));

    (store, temp_dir)
}

/// Returns scripted readings first, then `Reading::new(n, n * 1000)` where
/// `n` is the 1-based read count.
#[derive(Default)]
pub(crate) struct FakeSource {
    script: Mutex<VecDeque<Result<Reading, MetricReadError>>>,
    reads: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn scripted(script: Vec<Result<Reading, MetricReadError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            reads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeSource {
    async fn read(&self) -> Result<Reading, MetricReadError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(Reading::new(n as f32, n as u64 * 1000)),
        }
    }
}

pub(crate) struct PanickingSource;

#[async_trait]
impl MetricsSource for PanickingSource {
    async fn read(&self) -> Result<Reading, MetricReadError> {
        panic!("metrics source blew up");
    }
}

/// Records every accepted batch. Scripted failures are consumed one per
/// delivery attempt; once the script runs out every attempt succeeds.
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<DeliveryError>>,
    delivered: Mutex<Vec<SampleBatch>>,
    attempts: AtomicUsize,
    /// Appended to this store during delivery, to simulate a collector tick
    /// landing while a batch is in flight.
    append_during_delivery: Mutex<Option<SampleStoreRef>>,
}

impl FakeTransport {
    pub(crate) fn failing(failures: Vec<DeliveryError>) -> Self {
        Self {
            script: Mutex::new(failures.into()),
            ..Default::default()
        }
    }

    pub(crate) fn appending_to(store: SampleStoreRef) -> Self {
        Self {
            append_during_delivery: Mutex::new(Some(store)),
            ..Default::default()
        }
    }

    pub(crate) fn delivered(&self) -> Vec<SampleBatch> {
        self.delivered.lock().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn destination(&self) -> &str {
        "fake://collector"
    }

    async fn deliver(&self, payload: Vec<u8>) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(store) = self.append_during_delivery.lock().as_ref() {
            store
                .append(Reading::new(99.0, 99))
                .expect("Failed to append during delivery");
        }
        if let Some(failure) = self.script.lock().pop_front() {
            return Err(failure);
        }

        self.delivered.lock().push(SampleBatch::decode(&payload)?);
        Ok(())
    }
}

/// A store whose every operation fails with an I/O error.
pub(crate) struct BrokenStore;

impl BrokenStore {
    fn fault() -> StoreError {
        StoreError::Io {
            path: PathBuf::from("/broken"),
            source: io::Error::new(io::ErrorKind::Other, "disk on fire"),
        }
    }
}

impl SampleStore for BrokenStore {
    fn append(&self, _reading: Reading) -> Result<Sample, StoreError> {
        Err(Self::fault())
    }

    fn list_all(&self) -> Result<Vec<Sample>, StoreError> {
        Err(Self::fault())
    }

    fn delete_batch(&self, _samples: &[Sample]) -> Result<usize, StoreError> {
        Err(Self::fault())
    }
}

/// Delegates to a real store and remembers which thread ran each operation.
pub(crate) struct ThreadRecordingStore {
    inner: Arc<FileSampleStore>,
    threads: Mutex<Vec<ThreadId>>,
}

impl ThreadRecordingStore {
    pub(crate) fn new(inner: Arc<FileSampleStore>) -> Self {
        Self {
            inner,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().clone()
    }

    fn record(&self) {
        self.threads.lock().push(thread::current().id());
    }
}

impl SampleStore for ThreadRecordingStore {
    fn append(&self, reading: Reading) -> Result<Sample, StoreError> {
        self.record();
        self.inner.append(reading)
    }

    fn list_all(&self) -> Result<Vec<Sample>, StoreError> {
        self.record();
        self.inner.list_all()
    }

    fn delete_batch(&self, samples: &[Sample]) -> Result<usize, StoreError> {
        self.record();
        self.inner.delete_batch(samples)
    }
}
