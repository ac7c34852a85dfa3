use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::core::TrackPoint;
use crate::sink::{LocationSink, SinkError, SinkResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// One location as seen by the mock sink
#[derive(Debug, Clone)]
pub struct Delivered {
    pub provider: String,
    pub point: TrackPoint,
    pub timestamp: DateTime<Utc>,
    /// Runtime clock at delivery (follows tokio's paused clock in tests)
    pub at: Instant,
}

/// Mock sink that records every delivery for verification
pub struct MockSink {
    name: String,
    delivered: Mutex<Vec<Delivered>>,
    /// Number of upcoming deliveries to reject
    failures: AtomicUsize,
}

impl MockSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delivered: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Reject the next `count` deliveries
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of everything delivered so far
    pub fn deliveries(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    /// Get all delivered locations and clear the record
    pub fn take_deliveries(&self) -> Vec<Delivered> {
        std::mem::take(&mut *self.delivered.lock().unwrap())
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl LocationSink for MockSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        provider: &str,
        point: &TrackPoint,
        timestamp: DateTime<Utc>,
    ) -> SinkResult<()> {
        let rejected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(SinkError::Rejected {
                sink: self.name.clone(),
                reason: "injected failure".to_string(),
            });
        }

        self.delivered.lock().unwrap().push(Delivered {
            provider: provider.to_string(),
            point: point.clone(),
            timestamp,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_sink_records() {
        let sink = MockSink::new("test");
        sink.deliver("gps", &TrackPoint::new(1.0, 2.0), Utc::now()).await.unwrap();

        let delivered = sink.take_deliveries();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].provider, "gps");
        assert_eq!(delivered[0].point.lon, 2.0);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_mock_sink_injected_failures() {
        let sink = MockSink::new("test");
        sink.fail_next(1);

        let point = TrackPoint::new(1.0, 2.0);
        assert!(sink.deliver("gps", &point, Utc::now()).await.is_err());
        assert!(sink.deliver("gps", &point, Utc::now()).await.is_ok());
        assert_eq!(sink.count(), 1);
    }
}
