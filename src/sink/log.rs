use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::core::TrackPoint;
use crate::sink::{LocationSink, SinkResult};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Sink that only logs each location, for dry runs from the command line
pub struct LogSink {
    name: String,
    delivered: AtomicU64,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delivered: AtomicU64::new(0),
        }
    }

    /// Number of locations applied so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl LocationSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        provider: &str,
        point: &TrackPoint,
        timestamp: DateTime<Utc>,
    ) -> SinkResult<()> {
        let n = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "[{}] #{} provider={} lat={} lon={} heading={:.1} speed={:.2} at {}",
            self.name,
            n,
            provider,
            point.lat,
            point.lon,
            point.heading,
            point.speed,
            timestamp.format("%H:%M:%S%.3f"),
        );
        Ok(())
    }
}
