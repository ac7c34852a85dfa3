use crate::core::TrackPoint;
use crate::input::Enricher;
use crate::playback::PlaybackState;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

/// Everything one playback run needs to remember
///
/// Owned by the controller and replaced wholesale when a new file is
/// started or playback is stopped.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub state: PlaybackState,
    /// Delay applied when (re)starting delivery
    pub delay: Duration,
    /// Timestamp of the first timed point seen
    first_time: Option<DateTime<Utc>>,
    /// Offset that `first_time` maps to
    anchor: Duration,
    /// Offset of the most recently scheduled point
    last_offset: Option<Duration>,
    scheduled: usize,
    enricher: Enricher,
}

impl PlaybackSession {
    pub fn new(delay: Duration) -> Self {
        Self {
            state: PlaybackState::Stopped,
            delay,
            first_time: None,
            anchor: Duration::ZERO,
            last_offset: None,
            scheduled: 0,
            enricher: Enricher::new(),
        }
    }

    /// Enrich a freshly parsed point and work out where it falls on the
    /// replay timeline.
    ///
    /// The offset is `pointTime - firstPointTime`. Points without a readable
    /// timestamp are placed `fallback` after the previous one. Offsets never
    /// go backwards: a point that would land before the previous one is sent
    /// right after it.
    pub fn admit(&mut self, raw: TrackPoint, fallback: Duration) -> (TrackPoint, Duration) {
        let point = self.enricher.enrich(raw);
        let floor = self.last_offset.unwrap_or_default();
        let offset = self.offset_for(&point, fallback).max(floor);

        self.last_offset = Some(offset);
        self.scheduled += 1;
        (point, offset)
    }

    fn offset_for(&mut self, point: &TrackPoint, fallback: Duration) -> Duration {
        match point.recorded_time() {
            Some(Ok(time)) => {
                let first = match self.first_time {
                    Some(first) => first,
                    None => {
                        self.first_time = Some(time);
                        self.anchor = self.last_offset.map(|o| o + fallback).unwrap_or_default();
                        time
                    }
                };

                match (time - first).to_std() {
                    Ok(elapsed) => self.anchor + elapsed,
                    Err(_) => {
                        warn!("Point at {} is before first point {}, sending it next", time, first);
                        Duration::ZERO
                    }
                }
            }
            Some(Err(e)) => {
                warn!("{}, using fallback spacing", e);
                self.fallback_offset(fallback)
            }
            None => {
                debug!("Point {}, {} has no time, using fallback spacing", point.lat, point.lon);
                self.fallback_offset(fallback)
            }
        }
    }

    fn fallback_offset(&self, fallback: Duration) -> Duration {
        self.last_offset.map(|o| o + fallback).unwrap_or(fallback)
    }

    /// Last point that went through enrichment
    pub fn last_point(&self) -> Option<&TrackPoint> {
        self.enricher.previous()
    }

    /// Points placed on the timeline so far
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: Duration = Duration::from_millis(2000);

    fn timed(lat: f64, lon: f64, time: &str) -> TrackPoint {
        TrackPoint::new(lat, lon).with_time(time)
    }

    #[test]
    fn test_offsets_follow_recording() {
        let mut session = PlaybackSession::default();

        let (p0, o0) = session.admit(timed(0.0, 0.0, "2011-04-02T17:13:05Z"), FALLBACK);
        let (p1, o1) = session.admit(timed(0.0, 0.0001, "2011-04-02T17:13:06Z"), FALLBACK);
        let (_, o2) = session.admit(timed(0.0, 0.0002, "2011-04-02T17:13:10Z"), FALLBACK);

        assert_eq!(o0, Duration::ZERO);
        assert_eq!(o1, Duration::from_millis(1000));
        assert_eq!(o2, Duration::from_millis(5000));

        assert_eq!(p0.speed, 15.0);
        assert!((p1.heading - 90.0).abs() < 1e-9);
        assert_eq!(session.scheduled(), 3);
        assert_eq!(session.last_point().unwrap().lon, 0.0002);
    }

    #[test]
    fn test_unparseable_time_uses_fallback() {
        let mut session = PlaybackSession::default();

        session.admit(timed(0.0, 0.0, "2011-04-02T17:13:05Z"), FALLBACK);
        let (_, offset) = session.admit(timed(0.0, 0.0, "not a time"), FALLBACK);
        assert_eq!(offset, FALLBACK);

        let (_, offset) = session.admit(TrackPoint::new(0.0, 0.0), FALLBACK);
        assert_eq!(offset, FALLBACK * 2);
    }

    #[test]
    fn test_untimed_first_point() {
        let mut session = PlaybackSession::default();

        let (_, o0) = session.admit(TrackPoint::new(0.0, 0.0), FALLBACK);
        let (_, o1) = session.admit(timed(0.0, 0.0, "2011-04-02T17:13:05Z"), FALLBACK);
        let (_, o2) = session.admit(timed(0.0, 0.0, "2011-04-02T17:13:06Z"), FALLBACK);

        assert_eq!(o0, FALLBACK);
        assert_eq!(o1, FALLBACK * 2);
        assert_eq!(o2, FALLBACK * 2 + Duration::from_millis(1000));
    }

    #[test]
    fn test_point_before_first_follows_previous() {
        let mut session = PlaybackSession::default();

        session.admit(timed(0.0, 0.0, "2011-04-02T17:13:05Z"), FALLBACK);
        session.admit(timed(0.0, 0.0, "2011-04-02T17:13:07Z"), FALLBACK);
        let (point, offset) = session.admit(timed(1.0, 0.0, "2011-04-02T17:13:00Z"), FALLBACK);

        assert_eq!(offset, Duration::from_millis(2000));
        assert_eq!(session.last_point(), Some(&point));
        assert_eq!(session.scheduled(), 3);
    }

    #[test]
    fn test_untimed_point_between_timed_points_keeps_order() {
        let mut session = PlaybackSession::default();

        let (_, o0) = session.admit(timed(0.0, 0.0, "2011-04-02T17:13:05Z"), FALLBACK);
        let (_, o1) = session.admit(TrackPoint::new(0.0, 0.0001), FALLBACK);
        let (_, o2) = session.admit(timed(0.0, 0.0002, "2011-04-02T17:13:06Z"), FALLBACK);
        let (_, o3) = session.admit(timed(0.0, 0.0003, "2011-04-02T17:13:09Z"), FALLBACK);

        assert_eq!(o0, Duration::ZERO);
        assert_eq!(o1, FALLBACK);
        // Recorded at +1s, but the untimed point before it goes out at +2s
        assert_eq!(o2, FALLBACK);
        assert_eq!(o3, Duration::from_millis(4000));
    }
}
