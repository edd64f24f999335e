mod error;
mod file;

use common::{Reading, Sample};
use std::sync::Arc;

pub use error::StoreError;
pub use file::{FileSampleStore, LAYOUT_NAME, LAYOUT_VERSION};

/// A reference-counted handle to a [`SampleStore`], shared by the collector
/// and forwarder tasks.
pub type SampleStoreRef = Arc<dyn SampleStore>;

/// Durable, ordered collection of samples that have been collected but not
/// yet forwarded.
///
/// Implementations must serialize concurrent calls: the collector appends
/// while the forwarder lists and deletes, and neither may observe a partially
/// written sample.
pub trait SampleStore: Send + Sync {
    /// Persist a new sample at the tail of the store. The store assigns the
    /// sample its identity and creation time.
    fn append(&self, reading: Reading) -> Result<Sample, StoreError>;

    /// Snapshot of every pending sample, in insertion order.
    fn list_all(&self) -> Result<Vec<Sample>, StoreError>;

    /// Remove exactly the given samples. Samples that are no longer present
    /// are ignored. Returns the number of samples actually removed.
    fn delete_batch(&self, samples: &[Sample]) -> Result<usize, StoreError>;
}

#[cfg(test)]
pub(crate) fn setup_store() -> (Arc<FileSampleStore>, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let db_name = format!("test_{}.db", rand::random::<u32>());
    let db_path = temp_dir.path().join(db_name);
    let store = Arc::new(FileSampleStore::open(&db_path).expect("Failed to open sample store"));

    (store, temp_dir)
}
