use crate::blocking::with_store;
use crate::error::ForwardError;
use crate::periodic::PeriodicTask;
use async_trait::async_trait;
use common::traits::encode::Encodable;
use common::util::time::format_duration;
use common::SampleBatch;
use network::{DeliveryError, TransportRef};
use std::time::{Duration, Instant};
use storage::SampleStoreRef;
use tracing::{debug, error, info, warn};

/// Result of a forwarding tick that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The store was empty; nothing was sent.
    Empty,
    /// The remote accepted the batch and it was removed from the store.
    Delivered {
        samples: usize,
        removed: usize,
        elapsed: Duration,
    },
}

/// Snapshots the store, ships the snapshot as one batch, and removes exactly
/// that batch once the remote has accepted it.
///
/// Without a transport the forwarder still snapshots and encodes every tick
/// but treats the batch as undeliverable, so samples accumulate until an
/// endpoint is configured.
pub struct Forwarder {
    store: SampleStoreRef,
    transport: Option<TransportRef>,
    consecutive_failures: u32,
}

impl Forwarder {
    pub fn new(store: SampleStoreRef, transport: Option<TransportRef>) -> Self {
        Self {
            store,
            transport,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub async fn forward_once(&self) -> Result<ForwardOutcome, ForwardError> {
        let snapshot = with_store::<_, ForwardError, _>(&self.store, |store| store.list_all()).await?;
        let batch = SampleBatch::from(snapshot);
        if batch.is_empty() {
            return Ok(ForwardOutcome::Empty);
        }

        let payload = batch.encode().map_err(DeliveryError::from)?;
        let Some(transport) = &self.transport else {
            return Err(DeliveryError::NoEndpoint.into());
        };

        debug!(
            samples = batch.len(),
            bytes = payload.len(),
            destination = transport.destination(),
            "Sending batch"
        );

        let started = Instant::now();
        transport.deliver(payload).await?;
        let elapsed = started.elapsed();

        // Samples appended after the snapshot are not in `batch` and stay put.
        let samples = batch.len();
        let removed = with_store(&self.store, move |store| store.delete_batch(&batch))
            .await
            .map_err(|e: ForwardError| {
                error!(
                    error = %e,
                    samples,
                    "Batch was delivered but could not be removed; it will be sent again"
                );
                e
            })?;

        Ok(ForwardOutcome::Delivered {
            samples,
            removed,
            elapsed,
        })
    }
}

#[async_trait]
impl PeriodicTask for Forwarder {
    fn name(&self) -> &'static str {
        "forwarder"
    }

    async fn tick(&mut self) {
        match self.forward_once().await {
            Ok(ForwardOutcome::Empty) => debug!("Nothing to forward"),
            Ok(ForwardOutcome::Delivered {
                samples,
                removed,
                elapsed,
            }) => {
                self.consecutive_failures = 0;
                info!(
                    samples,
                    removed,
                    elapsed = %format_duration(elapsed),
                    "Batch forwarded"
                );
            }
            Err(ForwardError::Delivery(DeliveryError::NoEndpoint)) => {
                info!("No endpoint configured; batch retained");
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    "Batch retained for the next tick"
                );
            }
        }
    }
}
