//! Real-time replay of recorded GPX tracks to a location sink

pub mod control;
pub mod core;
pub mod input;
pub mod playback;
pub mod settings;
pub mod sink;

pub use crate::core::TrackPoint;
pub use playback::{PlaybackConfig, PlaybackController, PlaybackEvent, PlaybackState};
pub use settings::Settings;
pub use sink::{LocationSink, LogSink};
