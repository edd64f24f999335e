//! # Encoding Subsystem
//!
//! Converts collected samples into the payload that travels to the remote
//! endpoint. The wire format is a JSON array of flat sample records, each
//! carrying the same fields the store persists (`id`, `cpu_load`, `mem_free`,
//! `created_at`).
//!
//! ## Key Component
//!
//! ### `Encodable` Trait
//!
//! ```rust
//! use common::traits::encode::EncodingError;
//!
//! trait Encodable {
//!    fn encode(&self) -> Result<Vec<u8>, EncodingError>;
//! }
//! ```
//!
//! Anything that is put on the wire implements this trait. Decoding is only
//! needed by tests and by receivers, so it lives on `SampleBatch` directly.

use crate::sample::SampleBatch;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub trait Encodable {
    fn encode(&self) -> Result<Vec<u8>, EncodingError>;
}

impl Encodable for SampleBatch {
    fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl SampleBatch {
    pub fn decode(payload: &[u8]) -> Result<Self, EncodingError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
