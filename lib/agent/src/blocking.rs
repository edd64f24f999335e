use std::panic;
use storage::{SampleStore, SampleStoreRef, StoreError};
use tokio::task::JoinError;

/// Run a store operation on the blocking pool. Appends and compactions fsync
/// while holding the store lock, which must not stall a runtime worker.
///
/// A panic inside `op` is re-raised on the calling task.
pub(crate) async fn with_store<T, E, F>(store: &SampleStoreRef, op: F) -> Result<T, E>
where
    F: FnOnce(&dyn SampleStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + From<JoinError>,
{
    let store = store.clone();
    match tokio::task::spawn_blocking(move || op(&*store)).await {
        Ok(result) => Ok(result?),
        Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
        Err(e) => Err(e.into()),
    }
}
