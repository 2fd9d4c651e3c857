use serde::{Deserialize, Serialize};

/// Lifecycle status of the playback controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
}

/// Snapshot of the playback state, as reported to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub current_media_url: Option<String>,
    pub position_seconds: f64,
    pub status: PlaybackStatus,
}
