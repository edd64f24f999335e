//! The telemetry agent: a collector task that samples host metrics into the
//! local store, a forwarder task that ships the backlog to a remote endpoint,
//! and the [`Agent`] that starts both and shuts them down in order.

mod blocking;
pub mod collector;
pub mod coordinator;
pub mod error;
pub mod forwarder;
pub mod periodic;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::Collector;
pub use coordinator::{Agent, ShutdownReport};
pub use error::{CollectError, ForwardError};
pub use forwarder::{ForwardOutcome, Forwarder};
pub use periodic::{run_periodic, PeriodicTask, TickReport};
