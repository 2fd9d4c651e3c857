//! Playback controller and the media engines it drives.

pub mod controller;
pub mod engine;
pub mod mpv;

pub use controller::{LoadOutcome, PendingLoad, PlaybackController, PlaybackError};
pub use engine::{DecodeMode, EngineError, EngineFactory, MediaEngine};
