//! Deadline-ordered delivery queue
//!
//! Each queue owns one dispatcher task that sleeps until the earliest
//! deadline and hands due units to the sink. Every mutation and every firing
//! goes through the same mutex, and deliveries happen while it is held, so
//! once `reset()` returns none of the cancelled units can still fire.

use crate::core::TrackPoint;
use crate::sink::LocationSink;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Scheduler state of a single queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
    Paused,
}

/// Which of the controller's queues a unit went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    /// Advances through the route
    Main,
    /// Repeats the last point while paused
    Hold,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueueError {
    #[error("{role:?} queue already accepted its limit of {limit} units")]
    LimitReached { role: QueueRole, limit: usize },
}

/// Sent for every location the sink accepted
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub role: QueueRole,
    pub provider: String,
    pub point: TrackPoint,
}

/// Told about each accepted location while the queue lock is still held,
/// so reports are ordered with the queue operations around them
pub trait DeliveryObserver: Send + Sync {
    fn delivered(&self, report: DeliveryReport);
}

impl DeliveryObserver for mpsc::UnboundedSender<DeliveryReport> {
    fn delivered(&self, report: DeliveryReport) {
        // A closed receiver just means nobody is listening
        let _ = self.send(report);
    }
}

/// One scheduled delivery of one point
#[derive(Debug, Clone)]
pub struct DispatchUnit {
    pub point: TrackPoint,
    pub provider: String,
    pub deadline: Instant,
    /// Insertion order, breaks ties between equal deadlines
    sequence: u64,
}

impl PartialEq for DispatchUnit {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for DispatchUnit {}

impl PartialOrd for DispatchUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DispatchUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline
        // (then the oldest unit) on top
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Unit waiting for a baseline (queue not started, or paused)
#[derive(Debug, Clone)]
struct PendingUnit {
    point: TrackPoint,
    provider: String,
    offset: Duration,
}

#[derive(Debug)]
struct QueueInner {
    state: QueueState,
    /// Instant that recorded offset zero maps to
    baseline: Option<Instant>,
    paused_at: Option<Instant>,
    /// Extra shift applied to the baseline on the next resume
    resume_delay: Duration,
    units: BinaryHeap<DispatchUnit>,
    pending: Vec<PendingUnit>,
    next_sequence: u64,
    /// Units accepted since the last reset
    accepted: usize,
    last_delivered: Option<TrackPoint>,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            state: QueueState::Idle,
            baseline: None,
            paused_at: None,
            resume_delay: Duration::ZERO,
            units: BinaryHeap::new(),
            pending: Vec::new(),
            next_sequence: 0,
            accepted: 0,
            last_delivered: None,
        }
    }

    fn push(&mut self, point: TrackPoint, provider: String, deadline: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.units.push(DispatchUnit {
            point,
            provider,
            deadline,
            sequence,
        });
    }

    /// Resolve buffered units against `baseline`
    fn schedule_pending(&mut self, baseline: Instant) {
        for unit in std::mem::take(&mut self.pending) {
            self.push(unit.point, unit.provider, baseline + unit.offset);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.state != QueueState::Running {
            return None;
        }
        self.units.peek().map(|u| u.deadline)
    }

    fn pop_due(&mut self, now: Instant) -> Option<DispatchUnit> {
        if self.next_deadline()? > now {
            return None;
        }
        self.units.pop()
    }
}

struct Shared {
    role: QueueRole,
    /// Maximum units accepted per activation (None = unbounded)
    limit: Option<usize>,
    sink: Arc<dyn LocationSink>,
    observer: Arc<dyn DeliveryObserver>,
    inner: Mutex<QueueInner>,
    wake: Notify,
}

impl Shared {
    /// Deliver every unit whose deadline has passed
    async fn fire_due(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        while let Some(unit) = inner.pop_due(now) {
            match self.sink.deliver(&unit.provider, &unit.point, Utc::now()).await {
                Ok(()) => {
                    debug!(
                        "{:?} queue delivered {}, {} via {}",
                        self.role, unit.point.lat, unit.point.lon, unit.provider
                    );
                    self.observer.delivered(DeliveryReport {
                        role: self.role,
                        provider: unit.provider,
                        point: unit.point.clone(),
                    });
                    inner.last_delivered = Some(unit.point);
                }
                Err(e) => {
                    warn!(
                        "{:?} queue dropping location for {}: {}",
                        self.role,
                        self.sink.name(),
                        e
                    );
                }
            }
        }

        if let Some(limit) = self.limit {
            let exhausted = inner.accepted >= limit && inner.units.is_empty();
            if inner.state == QueueState::Running && exhausted {
                info!("{:?} queue issued all {} units, going idle", self.role, limit);
                inner.state = QueueState::Idle;
            }
        }
    }
}

async fn run_dispatcher(shared: Arc<Shared>) {
    loop {
        let next = shared.inner.lock().await.next_deadline();

        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = time::sleep_until(deadline) => shared.fire_due().await,
                    _ = shared.wake.notified() => {}
                }
            }
            None => shared.wake.notified().await,
        }
    }
}

/// Delayed-dispatch queue delivering points to a sink at their deadlines
///
/// Deadlines are given to [`enqueue`](Self::enqueue) as offsets from the
/// queue's baseline. Units enqueued before [`start`](Self::start) or while
/// paused are buffered and resolved once a baseline is in force.
pub struct DispatchQueue {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl DispatchQueue {
    /// Create an unbounded queue. Must be called inside a tokio runtime.
    pub fn new(
        role: QueueRole,
        sink: Arc<dyn LocationSink>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        Self::build(role, None, sink, observer)
    }

    /// Create a queue that accepts at most `limit` units between resets
    pub fn bounded(
        role: QueueRole,
        limit: usize,
        sink: Arc<dyn LocationSink>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        Self::build(role, Some(limit), sink, observer)
    }

    fn build(
        role: QueueRole,
        limit: Option<usize>,
        sink: Arc<dyn LocationSink>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        let shared = Arc::new(Shared {
            role,
            limit,
            sink,
            observer,
            inner: Mutex::new(QueueInner::new()),
            wake: Notify::new(),
        });
        let dispatcher = tokio::spawn(run_dispatcher(shared.clone()));

        Self { shared, dispatcher }
    }

    /// Start delivering; recorded offset zero maps to now + `initial_delay`
    pub async fn start(&self, initial_delay: Duration) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != QueueState::Idle {
            debug!("{:?} queue already started ({:?})", self.shared.role, inner.state);
            return;
        }

        let baseline = Instant::now() + initial_delay;
        inner.baseline = Some(baseline);
        inner.state = QueueState::Running;
        inner.schedule_pending(baseline);
        debug!(
            "{:?} queue started with {} units, delay {:?}",
            self.shared.role,
            inner.units.len(),
            initial_delay
        );
        drop(inner);

        self.shared.wake.notify_one();
    }

    /// Schedule `point` at `offset` past the baseline
    pub async fn enqueue(
        &self,
        point: TrackPoint,
        provider: &str,
        offset: Duration,
    ) -> Result<(), QueueError> {
        let mut inner = self.shared.inner.lock().await;

        if let Some(limit) = self.shared.limit {
            if inner.accepted >= limit {
                return Err(QueueError::LimitReached {
                    role: self.shared.role,
                    limit,
                });
            }
        }
        inner.accepted += 1;

        match (inner.state, inner.baseline) {
            (QueueState::Running, Some(baseline)) => {
                inner.push(point, provider.to_string(), baseline + offset);
            }
            _ => inner.pending.push(PendingUnit {
                point,
                provider: provider.to_string(),
                offset,
            }),
        }
        drop(inner);

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stop advancing. Units that have not fired yet are dropped, not
    /// deferred. Returns how many were dropped.
    pub async fn pause(&self) -> usize {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != QueueState::Running {
            return 0;
        }

        let dropped = inner.units.len();
        inner.units.clear();
        inner.state = QueueState::Paused;
        inner.paused_at = Some(Instant::now());
        inner.resume_delay = Duration::ZERO;
        drop(inner);

        self.shared.wake.notify_one();
        dropped
    }

    /// Continue with a fresh baseline. The time spent paused is cut out of
    /// the timeline rather than caught up.
    pub async fn resume(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != QueueState::Paused {
            return;
        }

        let now = Instant::now();
        let paused_for = inner
            .paused_at
            .take()
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        let shift = std::mem::take(&mut inner.resume_delay);
        let baseline = inner.baseline.unwrap_or(now) + paused_for + shift;

        inner.baseline = Some(baseline);
        inner.state = QueueState::Running;
        inner.schedule_pending(baseline);
        debug!(
            "{:?} queue resumed after {:?} (+{:?}), {} units left",
            self.shared.role,
            paused_for,
            shift,
            inner.units.len()
        );
        drop(inner);

        self.shared.wake.notify_one();
    }

    /// Extra delay for the next resume. Ignored unless paused.
    pub async fn update_delay_time(&self, delay: Duration) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state == QueueState::Paused {
            inner.resume_delay = delay;
        }
    }

    /// Cancel everything and go idle. Returns the last delivered point.
    pub async fn reset(&self) -> Option<TrackPoint> {
        let mut inner = self.shared.inner.lock().await;
        let last = inner.last_delivered.take();
        *inner = QueueInner {
            next_sequence: inner.next_sequence,
            ..QueueInner::new()
        };
        drop(inner);

        self.shared.wake.notify_one();
        last
    }

    pub async fn state(&self) -> QueueState {
        self.shared.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == QueueState::Running
    }

    /// Units scheduled or buffered
    pub async fn queue_size(&self) -> usize {
        let inner = self.shared.inner.lock().await;
        inner.units.len() + inner.pending.len()
    }

    pub async fn baseline(&self) -> Option<Instant> {
        self.shared.inner.lock().await.baseline
    }

    pub async fn last_delivered(&self) -> Option<TrackPoint> {
        self.shared.inner.lock().await.last_delivered.clone()
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::mock::MockSink;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn queue(sink: &Arc<MockSink>) -> (DispatchQueue, mpsc::UnboundedReceiver<DeliveryReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DispatchQueue::new(QueueRole::Main, sink.clone(), Arc::new(tx)), rx)
    }

    #[test]
    fn test_units_pop_earliest_first() {
        let mut inner = QueueInner::new();
        let base = Instant::now();
        inner.push(TrackPoint::new(2.0, 0.0), "gps".into(), base + ms(20));
        inner.push(TrackPoint::new(1.0, 0.0), "gps".into(), base + ms(10));
        inner.push(TrackPoint::new(3.0, 0.0), "gps".into(), base + ms(20));

        let order: Vec<f64> = std::iter::from_fn(|| inner.units.pop())
            .map(|u| u.point.lat)
            .collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_follow_recorded_offsets() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, mut reports) = queue(&sink);

        queue.start(Duration::ZERO).await;
        let t0 = queue.baseline().await.unwrap();

        queue.enqueue(TrackPoint::new(0.0, 0.0), "gps", Duration::ZERO).await.unwrap();
        queue.enqueue(TrackPoint::new(0.0, 0.0001), "gps", ms(1000)).await.unwrap();
        queue.enqueue(TrackPoint::new(0.0, 0.0002), "gps", ms(2500)).await.unwrap();

        time::sleep(ms(3000)).await;

        let delivered = sink.deliveries();
        let times: Vec<Instant> = delivered.iter().map(|d| d.at).collect();
        assert_eq!(times, vec![t0, t0 + ms(1000), t0 + ms(2500)]);
        assert_eq!(delivered[1].provider, "gps");

        assert_eq!(reports.recv().await.unwrap().role, QueueRole::Main);
        assert_eq!(queue.queue_size().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_until_start() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, _reports) = queue(&sink);

        queue.enqueue(TrackPoint::new(1.0, 1.0), "gps", ms(100)).await.unwrap();
        assert_eq!(queue.queue_size().await, 1);
        assert_eq!(queue.state().await, QueueState::Idle);

        time::sleep(ms(1000)).await;
        assert_eq!(sink.count(), 0);

        queue.start(ms(500)).await;
        let t0 = queue.baseline().await.unwrap();
        time::sleep(ms(1000)).await;

        let delivered = sink.deliveries();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].at, t0 + ms(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_then_reset_delivers_nothing() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, _reports) = queue(&sink);

        queue.start(Duration::ZERO).await;
        for i in 1..=5 {
            queue.enqueue(TrackPoint::new(i as f64, 0.0), "gps", ms(i * 100)).await.unwrap();
        }

        assert_eq!(queue.pause().await, 5);
        queue.reset().await;
        time::sleep(ms(5000)).await;

        assert_eq!(sink.count(), 0);
        assert_eq!(queue.state().await, QueueState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_excises_paused_time() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, _reports) = queue(&sink);

        queue.start(Duration::ZERO).await;
        let t0 = queue.baseline().await.unwrap();
        queue.enqueue(TrackPoint::new(1.0, 0.0), "gps", ms(100)).await.unwrap();
        queue.enqueue(TrackPoint::new(2.0, 0.0), "gps", ms(1000)).await.unwrap();

        time::sleep(ms(500)).await;
        assert_eq!(queue.pause().await, 1);

        // Arrives while paused, resolved against the new baseline
        queue.enqueue(TrackPoint::new(3.0, 0.0), "gps", ms(2000)).await.unwrap();
        time::sleep(ms(3000)).await;
        assert_eq!(sink.count(), 1);

        queue.resume().await;
        time::sleep(ms(5000)).await;

        let delivered = sink.deliveries();
        let lats: Vec<f64> = delivered.iter().map(|d| d.point.lat).collect();
        // The unit dropped by pause never comes back
        assert_eq!(lats, vec![1.0, 3.0]);
        // 3000ms of pause cut out of the timeline
        assert_eq!(delivered[1].at, t0 + ms(3000) + ms(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_delay_time_only_while_paused() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, _reports) = queue(&sink);

        queue.start(Duration::ZERO).await;
        let t0 = queue.baseline().await.unwrap();

        // Ignored: not paused
        queue.update_delay_time(ms(10_000)).await;

        queue.pause().await;
        queue.update_delay_time(ms(700)).await;
        queue.enqueue(TrackPoint::new(1.0, 0.0), "gps", ms(100)).await.unwrap();
        queue.resume().await;

        time::sleep(ms(2000)).await;
        let delivered = sink.deliveries();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].at, t0 + ms(700) + ms(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_is_dropped() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, _reports) = queue(&sink);
        sink.fail_next(1);

        queue.start(Duration::ZERO).await;
        queue.enqueue(TrackPoint::new(1.0, 0.0), "gps", ms(10)).await.unwrap();
        queue.enqueue(TrackPoint::new(2.0, 0.0), "gps", ms(20)).await.unwrap();
        time::sleep(ms(100)).await;

        let delivered = sink.deliveries();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].point.lat, 2.0);
        assert_eq!(queue.last_delivered().await.unwrap().lat, 2.0);
        assert!(queue.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_queue_limit() {
        let sink = Arc::new(MockSink::new("test"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = DispatchQueue::bounded(QueueRole::Hold, 3, sink.clone(), Arc::new(tx));

        for i in 0..3 {
            queue.enqueue(TrackPoint::new(1.0, 0.0), "gps", ms(i * 10)).await.unwrap();
        }
        let err = queue.enqueue(TrackPoint::new(1.0, 0.0), "gps", ms(40)).await.unwrap_err();
        assert_eq!(err, QueueError::LimitReached { role: QueueRole::Hold, limit: 3 });

        queue.start(Duration::ZERO).await;
        time::sleep(ms(1000)).await;
        assert_eq!(sink.count(), 3);
        assert_eq!(queue.state().await, QueueState::Idle);

        // A reset opens a new activation
        queue.reset().await;
        assert!(queue.enqueue(TrackPoint::new(1.0, 0.0), "gps", ms(0)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_idempotent_and_returns_last() {
        let sink = Arc::new(MockSink::new("test"));
        let (queue, _reports) = queue(&sink);

        assert!(queue.reset().await.is_none());

        queue.start(Duration::ZERO).await;
        queue.enqueue(TrackPoint::new(7.0, 8.0), "gps", ms(0)).await.unwrap();
        time::sleep(ms(10)).await;

        assert_eq!(queue.reset().await.map(|p| p.lat), Some(7.0));
        assert!(queue.reset().await.is_none());
        assert_eq!(queue.state().await, QueueState::Idle);
        assert_eq!(queue.queue_size().await, 0);
    }
}
