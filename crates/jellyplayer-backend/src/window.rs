//! Login and player surfaces, and the one-way handover between them.
//!
//! Exactly one of the two surfaces is on screen in a steady state. The login
//! surface is hidden before the player surface is created, and the player
//! surface is destroyed before the login surface comes back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use jellyplayer_bridge::MessageFromBackend;
use jellyplayer_bridge::playback::PlaybackStatus;
use jellyplayer_bridge::window::WindowState;
use tokio::sync::{broadcast, mpsc};

use crate::playback::{PlaybackController, PlaybackError};

/// A native area the media engine draws into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSurface {
    pub id: u64,
    /// Native window handle to embed into; `None` lets the engine open its
    /// own top-level window.
    pub native_handle: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("failed to create player surface: {0}")]
    Create(String),
    #[error("login surface is unreachable")]
    LoginUnavailable,
}

/// Window system seam: shows and hides the login surface, creates and
/// destroys player surfaces.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Resolves once the change has been handed to the window system.
    async fn set_login_visible(&self, visible: bool) -> Result<(), SurfaceError>;
    fn create_player_surface(&self) -> Result<PlayerSurface, SurfaceError>;
    fn destroy_player_surface(&self, surface: PlayerSurface);
}

/// Surface host for a web view owned by the frontend.
///
/// Login visibility is forwarded to the frontend as an event, waiting for
/// room on the channel rather than dropping the change. Player
/// surfaces carry no native handle, so the engine opens its own maximized
/// window and closes it when it shuts down.
pub struct BridgeSurfaceHost {
    tx: mpsc::Sender<MessageFromBackend>,
    next_surface_id: AtomicU64,
}

impl BridgeSurfaceHost {
    pub fn new(tx: mpsc::Sender<MessageFromBackend>) -> Self {
        Self {
            tx,
            next_surface_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl SurfaceHost for BridgeSurfaceHost {
    async fn set_login_visible(&self, visible: bool) -> Result<(), SurfaceError> {
        self.tx
            .send(MessageFromBackend::LoginSurfaceVisibility { visible })
            .await
            .map_err(|_| SurfaceError::LoginUnavailable)
    }

    fn create_player_surface(&self) -> Result<PlayerSurface, SurfaceError> {
        Ok(PlayerSurface {
            id: self.next_surface_id.fetch_add(1, Ordering::Relaxed),
            native_handle: None,
        })
    }

    fn destroy_player_surface(&self, surface: PlayerSurface) {
        log::debug!("Released player surface {}", surface.id);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("`{operation}` is not valid while {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: WindowState,
    },
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns which surface is visible and performs the transitions.
pub struct WindowManager {
    state: Mutex<WindowState>,
    surfaces: Arc<dyn SurfaceHost>,
    playback: Arc<tokio::sync::Mutex<PlaybackController>>,
    changes: broadcast::Sender<WindowState>,
}

impl WindowManager {
    pub fn new(
        surfaces: Arc<dyn SurfaceHost>,
        playback: Arc<tokio::sync::Mutex<PlaybackController>>,
    ) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            state: Mutex::new(WindowState::LoginVisible),
            surfaces,
            playback,
            changes,
        }
    }

    pub fn state(&self) -> WindowState {
        *lock(&self.state)
    }

    /// Steady states reached by the manager.
    pub fn subscribe(&self) -> broadcast::Receiver<WindowState> {
        self.changes.subscribe()
    }

    /// Hands the screen over from the login surface to a new player surface
    /// playing `url`.
    ///
    /// Only valid from `LoginVisible`; a call arriving while another
    /// transition runs is rejected. On failure the player surface is torn
    /// down again and the login surface restored.
    ///
    /// If the login surface cannot be shown again, no steady state is
    /// reached and the manager stays `Transitioning`.
    pub async fn launch_player(&self, url: &str) -> Result<(), WindowError> {
        self.begin("launchPlayer", WindowState::LoginVisible)?;
        log::info!("Switching to the player surface");

        if let Err(e) = self.surfaces.set_login_visible(false).await {
            log::error!("Failed to hide the login surface: {e}");
            self.finish(WindowState::LoginVisible);
            return Err(e.into());
        }

        match self.open_player(url).await {
            Ok(()) => {
                self.finish(WindowState::PlayerVisible);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to launch player: {e}");
                if self.close_player_surface().await.is_ok() {
                    self.finish(WindowState::LoginVisible);
                }
                Err(e)
            }
        }
    }

    /// Stops playback, destroys the player surface and brings the login
    /// surface back.
    pub async fn close_player(&self) -> Result<(), WindowError> {
        self.begin("closePlayer", WindowState::PlayerVisible)?;
        log::info!("Switching back to the login surface");
        self.close_player_surface().await?;
        self.finish(WindowState::LoginVisible);
        Ok(())
    }

    async fn open_player(&self, url: &str) -> Result<(), WindowError> {
        let surface = self.surfaces.create_player_surface()?;

        let bound = self.playback.lock().await.bind_surface(surface.clone());
        if let Err(e) = bound {
            self.surfaces.destroy_player_surface(surface);
            return Err(e.into());
        }
        PlaybackController::play(&self.playback, url).await?;
        Ok(())
    }

    /// Tears the player surface down and shows the login surface.
    async fn close_player_surface(&self) -> Result<(), SurfaceError> {
        let mut playback = self.playback.lock().await;
        if matches!(
            playback.status(),
            PlaybackStatus::Loading | PlaybackStatus::Playing | PlaybackStatus::Paused
        ) {
            if let Err(e) = playback.stop().await {
                log::warn!("Failed to stop playback: {e}");
            }
        }
        if playback.status() == PlaybackStatus::Stopped {
            let _ = playback.reset();
        }
        match playback.unbind_surface() {
            Ok(Some(surface)) => self.surfaces.destroy_player_surface(surface),
            Ok(None) => {}
            Err(e) => log::warn!("Player surface is still in use: {e}"),
        }
        drop(playback);

        self.surfaces.set_login_visible(true).await.map_err(|e| {
            log::error!("Failed to show the login surface, no surface is visible: {e}");
            e
        })
    }

    /// Enters `Transitioning` if the manager is in `expected`.
    fn begin(&self, operation: &'static str, expected: WindowState) -> Result<(), WindowError> {
        let mut state = lock(&self.state);
        if *state != expected {
            return Err(WindowError::InvalidTransition {
                operation,
                state: *state,
            });
        }
        *state = WindowState::Transitioning;
        Ok(())
    }

    fn finish(&self, state: WindowState) {
        *lock(&self.state) = state;
        let _ = self.changes.send(state);
    }
}
