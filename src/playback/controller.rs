use crate::input::{self, GpxEvent, GpxParser, IngestError};
use crate::playback::queue::{DeliveryObserver, DeliveryReport, DispatchQueue, QueueRole};
use crate::playback::{PlaybackConfig, PlaybackEvent, PlaybackSession, PlaybackState};
use crate::sink::LocationSink;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum repeat deliveries of the last point per pause
pub const HOLD_REPEAT_LIMIT: usize = 100;

/// Events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1024;

/// Points admitted between cooperative yields while loading
const INGEST_CHUNK: usize = 64;

/// Fan-out of state and events to observers
struct Publisher {
    events: broadcast::Sender<PlaybackEvent>,
    state: watch::Sender<PlaybackState>,
}

impl Publisher {
    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, session: &mut PlaybackSession, state: PlaybackState) {
        session.state = state;
        self.state.send_replace(state);
        self.emit(PlaybackEvent::StatusChange { state });
    }
}

/// Runs inside the firing queue's lock, so the state read here is the one
/// in force when the point went out
impl DeliveryObserver for Publisher {
    fn delivered(&self, report: DeliveryReport) {
        let state = match report.role {
            QueueRole::Hold => PlaybackState::Paused,
            QueueRole::Main => *self.state.borrow(),
        };
        self.emit(PlaybackEvent::delivered(state, &report.point));
    }
}

/// Background load of one track file into the main queue
struct IngestJob {
    path: PathBuf,
    config: PlaybackConfig,
    main: Arc<DispatchQueue>,
    session: Arc<Mutex<PlaybackSession>>,
    publisher: Arc<Publisher>,
    cancel: CancellationToken,
}

impl IngestJob {
    async fn run(self) {
        let document = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Loading of {:?} cancelled before read", self.path);
                return;
            }
            result = input::read_document(&self.path) => result,
        };

        let xml = match document {
            Ok(xml) => xml,
            Err(e) => return self.fail(e).await,
        };

        let mut admitted = 0usize;
        for event in GpxParser::new(&xml) {
            match event {
                GpxEvent::Start => debug!("Parsing {:?}", self.path),
                GpxEvent::Point(raw) => {
                    // One point per chunk; commands wait for at most this much
                    let mut session = self.session.lock().await;
                    if self.cancel.is_cancelled() {
                        debug!("Loading of {:?} cancelled", self.path);
                        return;
                    }

                    let (point, offset) = session.admit(raw, self.config.fallback_spacing);
                    debug!("Queueing point {}, {} at +{:?}", point.lat, point.lon, offset);
                    let provider = &self.config.provider;
                    if let Err(e) = self.main.enqueue(point, provider, offset).await {
                        warn!("Could not queue point: {}", e);
                    }
                    drop(session);

                    admitted += 1;
                    if admitted % INGEST_CHUNK == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                GpxEvent::Error(e) => return self.fail(e).await,
                GpxEvent::End => debug!("Finished parsing {:?}", self.path),
            }
        }

        self.finish().await;
    }

    async fn finish(&self) {
        let mut session = self.session.lock().await;
        if self.cancel.is_cancelled() {
            return;
        }

        let points = session.scheduled();
        info!("Loaded {} points from {:?}", points, self.path);
        self.publisher.emit(PlaybackEvent::FileLoadFinished { points });

        // State first so the earliest deliveries are labelled RUNNING
        self.publisher.set_state(&mut session, PlaybackState::Running);
        self.main.start(session.delay).await;
    }

    async fn fail(&self, e: IngestError) {
        let session = self.session.lock().await;
        if self.cancel.is_cancelled() {
            return;
        }

        error!("Failed to load {:?}: {}", self.path, e);
        self.main.reset().await;
        self.publisher.emit(PlaybackEvent::FileError {
            message: e.to_string(),
            state: session.state,
        });
    }
}

/// Plays a track file to a sink behind a start/pause/resume/stop state machine
pub struct PlaybackController {
    config: PlaybackConfig,
    sink: Arc<dyn LocationSink>,
    /// Advances through the route
    main: Arc<DispatchQueue>,
    /// Repeats the last location while paused
    hold: DispatchQueue,
    session: Arc<Mutex<PlaybackSession>>,
    publisher: Arc<Publisher>,
    /// Cancels the file load in flight, if any
    ingest: Mutex<Option<CancellationToken>>,
}

impl PlaybackController {
    /// Create a controller. Must be called inside a tokio runtime.
    pub fn new(config: PlaybackConfig, sink: Arc<dyn LocationSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(PlaybackState::Stopped);
        let publisher = Arc::new(Publisher { events, state });

        let main = DispatchQueue::new(QueueRole::Main, sink.clone(), publisher.clone());
        let hold = DispatchQueue::bounded(
            QueueRole::Hold,
            HOLD_REPEAT_LIMIT,
            sink.clone(),
            publisher.clone(),
        );

        let session = Arc::new(Mutex::new(PlaybackSession::new(config.initial_delay)));

        Self {
            config,
            sink,
            main: Arc::new(main),
            hold,
            session,
            publisher,
            ingest: Mutex::new(None),
        }
    }

    /// Receive status and delivery events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.publisher.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        *self.publisher.state.borrow()
    }

    /// Points still waiting in the main queue
    pub async fn queued_points(&self) -> usize {
        self.main.queue_size().await
    }

    /// Begin loading `path` in the background. Playback starts once the
    /// whole file has been read; a broken file leaves the state unchanged.
    pub async fn start_service(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut session = self.session.lock().await;

        self.cancel_ingest().await;
        self.hold.reset().await;
        self.main.reset().await;

        let previous = session.state;
        *session = PlaybackSession::new(self.config.initial_delay);
        if previous != PlaybackState::Stopped {
            self.publisher.set_state(&mut session, PlaybackState::Stopped);
        }

        info!("Loading track {:?}", path);
        self.publisher.emit(PlaybackEvent::FileLoadStarted {
            path: path.display().to_string(),
        });

        let cancel = CancellationToken::new();
        *self.ingest.lock().await = Some(cancel.clone());

        let job = IngestJob {
            path,
            config: self.config.clone(),
            main: self.main.clone(),
            session: self.session.clone(),
            publisher: self.publisher.clone(),
            cancel,
        };
        tokio::spawn(job.run());
    }

    /// Stop advancing through the route and keep re-sending the last
    /// location instead
    pub async fn pause(&self) {
        let mut session = self.session.lock().await;
        if !session.state.is_running() {
            debug!("Ignoring pause while {:?}", session.state);
            return;
        }

        info!("Pausing playback");
        let dropped = self.main.pause().await;
        debug!("Dropped {} pending points", dropped);
        self.publisher.set_state(&mut session, PlaybackState::Paused);

        self.hold.reset().await;
        let Some(point) = self.main.last_delivered().await else {
            debug!("Nothing delivered yet, not holding a location");
            return;
        };

        debug!("Holding location {}, {} speed {:.2}", point.lat, point.lon, point.speed);
        for i in 0..HOLD_REPEAT_LIMIT {
            let offset = self.config.hold_interval * i as u32;
            if let Err(e) = self.hold.enqueue(point.clone(), &self.config.provider, offset).await {
                warn!("Hold queue full: {}", e);
                break;
            }
        }
        self.hold.start(session.delay).await;
    }

    pub async fn resume(&self) {
        let mut session = self.session.lock().await;
        if session.state != PlaybackState::Paused {
            debug!("Ignoring resume while {:?}", session.state);
            return;
        }

        info!("Resuming playback");
        self.hold.reset().await;
        self.publisher.set_state(&mut session, PlaybackState::Resumed);
        self.main.resume().await;
    }

    /// Change the replay delay. Only honoured while paused; it applies to
    /// the next resume and to later pauses, not to a hold already running.
    pub async fn update_delay_time(&self, milliseconds: u64) {
        let mut session = self.session.lock().await;
        if session.state != PlaybackState::Paused {
            debug!("Ignoring delay update while {:?}", session.state);
            return;
        }

        info!("Updating replay delay to {}ms", milliseconds);
        let delay = Duration::from_millis(milliseconds);
        self.main.update_delay_time(delay).await;
        session.delay = delay;
    }

    /// End the session. The last known location is sent once more with
    /// zero speed so observers see the route come to rest.
    pub async fn stop_service(&self) {
        let mut session = self.session.lock().await;
        info!("Stopping playback");

        self.cancel_ingest().await;
        let held = self.hold.reset().await;
        let delivered = self.main.reset().await;

        let last = delivered.or(held).or_else(|| session.last_point().cloned());
        if let Some(point) = last {
            let point = point.at_rest();
            match self.sink.deliver(&self.config.provider, &point, Utc::now()).await {
                Ok(()) => {
                    let event = PlaybackEvent::delivered(PlaybackState::Stopped, &point);
                    self.publisher.emit(event);
                }
                Err(e) => warn!("Final location rejected by {}: {}", self.sink.name(), e),
            }
        }

        *session = PlaybackSession::new(self.config.initial_delay);
        self.publisher.set_state(&mut session, PlaybackState::Stopped);
    }

    async fn cancel_ingest(&self) {
        if let Some(token) = self.ingest.lock().await.take() {
            token.cancel();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Ok(mut ingest) = self.ingest.try_lock() {
            if let Some(token) = ingest.take() {
                token.cancel();
            }
        }
    }
}
