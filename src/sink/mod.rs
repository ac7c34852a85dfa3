pub mod log;
#[cfg(test)]
pub mod mock;

pub use log::LogSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::core::TrackPoint;
use thiserror::Error;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Failure reported by a sink for a single delivery
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    /// The sink refused this particular location
    #[error("location rejected by {sink}: {reason}")]
    Rejected { sink: String, reason: String },
}

/// Trait for consumers of replayed locations
///
/// A sink applies a single point to whatever location subsystem it fronts:
/// - a log for dry runs
/// - a platform mock-location provider
/// - a recording mock for tests
///
/// Failures are the sink's concern; the scheduler logs and drops them.
#[async_trait]
pub trait LocationSink: Send + Sync {
    /// Get the name/identifier of this sink
    fn name(&self) -> &str;

    /// Apply a location for `provider`, stamped with `timestamp`
    async fn deliver(
        &self,
        provider: &str,
        point: &TrackPoint,
        timestamp: DateTime<Utc>,
    ) -> SinkResult<()>;
}
