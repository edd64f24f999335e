use metrics::MetricReadError;
use network::DeliveryError;
use storage::StoreError;
use thiserror::Error;
use tokio::task::JoinError;

/// Why a collection tick produced no sample.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Metric read failed: {0}")]
    MetricRead(#[from] MetricReadError),

    #[error("Storage fault: {0}")]
    Storage(#[from] StoreError),

    #[error("Storage operation did not complete: {0}")]
    Interrupted(#[from] JoinError),
}

/// Why a forwarding tick left its batch in the store.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Storage fault: {0}")]
    Storage(#[from] StoreError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Storage operation did not complete: {0}")]
    Interrupted(#[from] JoinError),
}
