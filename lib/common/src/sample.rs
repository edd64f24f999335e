use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;
use std::fmt;
use typed_builder::TypedBuilder;

/// Unique identifier for a sample. Sample ids are assigned by the store from a
/// monotonically increasing counter and are never reused, even after the
/// sample has been forwarded and deleted.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Shrinkwrap,
)]
#[serde(transparent)]
pub struct SampleId(pub u64);

impl SampleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The id that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for SampleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<SampleId> for u64 {
    fn from(id: SampleId) -> Self {
        id.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SampleId({})", self.0)
    }
}

/// A raw observation taken from the host, before it has been given an
/// identity by the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, CopyGetters, TypedBuilder)]
#[getset(get_copy = "pub")]
pub struct Reading {
    /// Global CPU usage percentage (0-100%).
    cpu_load: f32,
    /// Free memory in bytes.
    mem_free: u64,
}

impl Reading {
    pub fn new(cpu_load: f32, mem_free: u64) -> Self {
        Self { cpu_load, mem_free }
    }
}

/// One persisted metric observation.
///
/// A `Sample` is immutable once created. It lives in the store from the
/// moment it is collected until the batch that carries it has been delivered
/// to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters, TypedBuilder)]
pub struct Sample {
    #[getset(get_copy = "pub")]
    id: SampleId,
    #[getset(get_copy = "pub")]
    cpu_load: f32,
    #[getset(get_copy = "pub")]
    mem_free: u64,
    #[getset(get = "pub")]
    created_at: DateTime<Utc>,
}

impl Sample {
    pub fn from_reading(id: SampleId, reading: Reading, created_at: DateTime<Utc>) -> Self {
        Sample::builder()
            .id(id)
            .cpu_load(reading.cpu_load())
            .mem_free(reading.mem_free())
            .created_at(created_at)
            .build()
    }

    pub fn reading(&self) -> Reading {
        Reading::new(self.cpu_load, self.mem_free)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpu={:.1}% mem_free={}B at {}",
            self.id,
            self.cpu_load,
            self.mem_free,
            self.created_at.to_rfc3339()
        )
    }
}

/// A snapshot of pending samples taken by the forwarder at the start of a
/// tick. Samples are kept in insertion (id) order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Shrinkwrap)]
#[serde(transparent)]
pub struct SampleBatch(pub Vec<Sample>);

impl SampleBatch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self(samples)
    }

    pub fn ids(&self) -> Vec<SampleId> {
        self.0.iter().map(Sample::id).collect()
    }

    pub fn into_inner(self) -> Vec<Sample> {
        self.0
    }
}

impl From<Vec<Sample>> for SampleBatch {
    fn from(samples: Vec<Sample>) -> Self {
        Self(samples)
    }
}
