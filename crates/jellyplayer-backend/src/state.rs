use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;

use crate::playback::PlaybackController;
use crate::resolver::SessionResolver;
use crate::restart::RestartCoordinator;
use crate::store::Store;
use crate::window::WindowManager;

/// The core application state: configuration plus the component instances
/// every service talks to.
///
/// Components synchronize themselves, so the state is shared behind a plain
/// [`Arc`] (see [`SharedState`]).
pub struct State {
    /// The loaded application configuration.
    pub config: jellyplayer_bridge::config::Config,
    pub store: Arc<Store>,
    pub resolver: SessionResolver,
    pub playback: Arc<tokio::sync::Mutex<PlaybackController>>,
    pub windows: Arc<WindowManager>,
    pub restart: RestartCoordinator,
    /// Reachability probe currently in flight. Replaced, and aborted, by
    /// the next probe.
    pub active_probe: Mutex<Option<AbortHandle>>,
}

/// Shared reference to the application [`State`].
pub type SharedState = Arc<State>;
