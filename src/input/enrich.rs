use crate::core::TrackPoint;

/// Heading assigned to the first point of a session
pub const FIRST_POINT_HEADING: f64 = 0.0;

/// Speed assigned to the first point of a session (assumed initial motion)
pub const FIRST_POINT_SPEED: f64 = 15.0;

/// Scale applied to the planar coordinate distance to get a speed value
pub const SPEED_SCALE: f64 = 100_000.0;

/// Derives heading and speed for each point from the one before it
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    previous: Option<TrackPoint>,
}

impl Enricher {
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Fill in heading/speed and remember the point for the next call
    pub fn enrich(&mut self, mut point: TrackPoint) -> TrackPoint {
        match &self.previous {
            Some(prev) => {
                point.heading = heading_between(prev, &point);
                point.speed = speed_between(prev, &point);
            }
            None => {
                point.heading = FIRST_POINT_HEADING;
                point.speed = FIRST_POINT_SPEED;
            }
        }

        self.previous = Some(point.clone());
        point
    }

    /// Last point passed through the enricher
    pub fn previous(&self) -> Option<&TrackPoint> {
        self.previous.as_ref()
    }
}

/// Planar angle from `from` to `to` in degrees, in (-180, 180].
///
/// Not a compass bearing: 0° points along increasing latitude and the result
/// is not normalized.
pub fn heading_between(from: &TrackPoint, to: &TrackPoint) -> f64 {
    (to.lon - from.lon).atan2(to.lat - from.lat).to_degrees()
}

/// Euclidean distance in degrees between the two points, scaled
pub fn speed_between(from: &TrackPoint, to: &TrackPoint) -> f64 {
    let d_lon = from.lon - to.lon;
    let d_lat = from.lat - to.lat;
    (d_lon * d_lon + d_lat * d_lat).sqrt() * SPEED_SCALE
}
