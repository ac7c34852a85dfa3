pub mod controller;
pub mod events;
pub mod queue;
pub mod session;

pub use controller::{PlaybackController, HOLD_REPEAT_LIMIT};
pub use events::PlaybackEvent;
pub use queue::{
    DeliveryObserver, DeliveryReport, DispatchQueue, DispatchUnit, QueueError, QueueRole,
    QueueState,
};
pub use session::PlaybackSession;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackState {
    Running,
    Stopped,
    Paused,
    /// Reported right after a resume; behaves like `Running`
    Resumed,
}

impl PlaybackState {
    /// Route is advancing
    pub fn is_running(self) -> bool {
        matches!(self, PlaybackState::Running | PlaybackState::Resumed)
    }

    /// Label attached to delivered points
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Running | PlaybackState::Resumed => "RUNNING",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Stopped => "STOPPED",
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Provider id handed to the sink with every location
    pub provider: String,
    /// Delay between the end of loading and the first point
    pub initial_delay: Duration,
    /// Spacing of the repeated locations sent while paused
    pub hold_interval: Duration,
    /// Spacing used for points whose timestamp is missing or unreadable
    pub fallback_spacing: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            provider: "gps".to_string(),
            initial_delay: Duration::ZERO,
            hold_interval: Duration::from_millis(1000),
            fallback_spacing: Duration::from_millis(2000),
        }
    }
}
