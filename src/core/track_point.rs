use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Timestamp layout used by GPX recorders (`yyyy-MM-ddTHH:mm:ssZ`)
pub const GPX_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The recorded timestamp of a point could not be understood
#[derive(Debug, Clone, Error, PartialEq)]
#[error("unable to parse time: {value}")]
pub struct TimeParseError {
    pub value: String,
}

/// A single recorded position sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Latitude in decimal degrees
    pub lat: f64,

    /// Longitude in decimal degrees
    pub lon: f64,

    /// Elevation (if recorded)
    pub ele: Option<f64>,

    /// Raw recorded timestamp
    pub time: Option<String>,

    /// Satellite count as written by the recorder
    pub sat: Option<String>,

    /// Fix type as written by the recorder
    pub fix: Option<String>,

    /// Heading derived from the previous point, in degrees
    pub heading: f64,

    /// Speed derived from the previous point (planar, scaled)
    pub speed: f64,
}

impl TrackPoint {
    /// Create a point with only coordinates set
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Default::default()
        }
    }

    /// Builder-style helper for attaching a timestamp
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    /// Parse the recorded timestamp.
    ///
    /// Returns `None` when the point carries no timestamp at all.
    pub fn recorded_time(&self) -> Option<Result<DateTime<Utc>, TimeParseError>> {
        self.time.as_deref().map(parse_gpx_time)
    }

    /// Copy of this point with speed forced to zero
    pub fn at_rest(&self) -> Self {
        Self {
            speed: 0.0,
            ..self.clone()
        }
    }
}

/// Parse a GPX timestamp, falling back to RFC 3339 for recorders that write
/// fractional seconds or explicit offsets
pub fn parse_gpx_time(value: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let value = value.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, GPX_TIME_FORMAT) {
        return Ok(naive.and_utc());
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimeParseError { value: value.to_string() })
}
