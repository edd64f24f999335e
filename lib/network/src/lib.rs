pub mod client;

pub use client::{DeliveryError, HttpTransport, Transport, TransportRef};
