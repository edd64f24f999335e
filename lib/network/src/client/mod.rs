use async_trait::async_trait;
use common::traits::encode::EncodingError;
use getset::{CopyGetters, Getters};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// A reference-counted handle to a [`Transport`].
pub type TransportRef = Arc<dyn Transport>;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("No remote endpoint configured")]
    NoEndpoint,

    #[error("Failed to encode batch: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to `{endpoint}` failed: {source}")]
    Request {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("Request to `{endpoint}` timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("`{endpoint}` answered with status {status}")]
    Status { endpoint: String, status: u16 },
}

/// Carries an encoded batch to the remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Where batches are sent.
    fn destination(&self) -> &str;

    /// Attempt one delivery. `Ok` means the remote accepted the whole batch.
    async fn deliver(&self, payload: Vec<u8>) -> Result<(), DeliveryError>;
}

/// Posts JSON batches over HTTP with a bounded per-request timeout.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct HttpTransport {
    #[getset(get = "pub")]
    endpoint: String,
    #[getset(get_copy = "pub")]
    timeout: Duration,
    client: Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(DeliveryError::Client)?;

        Ok(Self {
            endpoint: endpoint.into(),
            timeout,
            client,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn destination(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn deliver(&self, payload: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    DeliveryError::Timeout {
                        endpoint: self.endpoint.clone(),
                        timeout: self.timeout,
                    }
                } else {
                    DeliveryError::Request {
                        endpoint: self.endpoint.clone(),
                        source,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), "Batch accepted");
        Ok(())
    }
}
