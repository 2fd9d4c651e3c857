//! Backend service handlers for bridge calls.
//!
//! Each handler operates on the shared `AppContext`, performs its side
//! effects through the component instances in the state, and answers with a
//! typed value. Internal errors are converted into bridge faults here and go
//! no further.

pub mod config_service;
pub mod playback_service;
pub mod process_service;
pub mod session_service;
pub mod store_service;
pub mod window_service;

use jellyplayer_bridge::{BridgeFault, BridgeValue, FaultKind};

use crate::playback::PlaybackError;
use crate::restart::RestartError;
use crate::store::StoreError;
use crate::window::WindowError;

/// Represents a type that is used in all handlers as an application context.
pub(crate) type AppContextHandle = std::sync::Arc<crate::app::AppContext>;

/// Result of a handler that answers synchronously.
pub(crate) type CallResult = Result<BridgeValue, CallError>;

/// Everything a handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Restart(#[from] RestartError),
}

impl CallError {
    pub fn kind(&self) -> FaultKind {
        match self {
            CallError::Store(_) => FaultKind::Unavailable,
            CallError::Playback(e) => playback_fault(e),
            CallError::Window(WindowError::InvalidTransition { .. }) => {
                FaultKind::InvalidTransition
            }
            CallError::Window(WindowError::Surface(_)) => FaultKind::Unavailable,
            CallError::Window(WindowError::Playback(e)) => playback_fault(e),
            CallError::Restart(_) => FaultKind::Unavailable,
        }
    }
}

fn playback_fault(error: &PlaybackError) -> FaultKind {
    match error {
        PlaybackError::InvalidTransition { .. }
        | PlaybackError::NoSurface
        | PlaybackError::SurfaceBusy => FaultKind::InvalidTransition,
        PlaybackError::EngineInit(_) => FaultKind::EngineInitFailure,
        PlaybackError::Engine(_) => FaultKind::Unavailable,
        PlaybackError::Interrupted => FaultKind::Cancelled,
    }
}

impl From<CallError> for BridgeFault {
    fn from(error: CallError) -> Self {
        BridgeFault::new(error.kind(), error.to_string())
    }
}
