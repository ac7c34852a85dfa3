use crate::core::TrackPoint;
use crate::playback::PlaybackState;
use serde::{Deserialize, Serialize};

/// Status published by the controller to whoever is observing playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PlaybackEvent {
    FileLoadStarted { path: String },
    FileLoadFinished { points: usize },
    FileError { message: String, state: PlaybackState },
    StatusChange { state: PlaybackState },
    /// A location reached the sink
    PointDelivered {
        state: String,
        speed: f64,
        latitude: f64,
        longitude: f64,
    },
}

impl PlaybackEvent {
    pub fn delivered(state: PlaybackState, point: &TrackPoint) -> Self {
        PlaybackEvent::PointDelivered {
            state: state.label().to_string(),
            speed: point.speed,
            latitude: point.lat,
            longitude: point.lon,
        }
    }
}
