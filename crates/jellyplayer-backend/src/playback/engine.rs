use async_trait::async_trait;

use crate::window::PlayerSurface;

/// Decode path requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Hardware,
    Software,
}

/// Errors raised by a media engine instance.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine process could not be started.
    #[error("failed to start engine: {0}")]
    Spawn(#[from] std::io::Error),
    /// The control connection to the engine could not be established or broke.
    #[error("engine control connection failed: {0}")]
    Ipc(String),
    /// The engine exited while it was still needed.
    #[error("engine exited unexpectedly")]
    Exited,
    /// The engine did not answer within the allotted time.
    #[error("engine did not answer in time")]
    Timeout,
    /// The engine could not open the requested media.
    #[error("engine failed to load media: {0}")]
    Load(String),
    /// The engine rejected a command.
    #[error("engine rejected command: {0}")]
    Command(String),
}

/// One running media engine, bound to a single player surface.
///
/// Calls configure the engine and return; decoding and rendering happen on
/// the engine's own threads.
#[async_trait]
pub trait MediaEngine: Send {
    /// Replaces the current media with `url` and resolves once the engine
    /// reports it loaded.
    async fn load(&mut self, url: &str) -> Result<(), EngineError>;

    async fn set_paused(&mut self, paused: bool) -> Result<(), EngineError>;

    /// Seeks to an absolute position in seconds.
    async fn seek(&mut self, seconds: f64) -> Result<(), EngineError>;

    /// Current position in seconds.
    async fn position(&mut self) -> Result<f64, EngineError>;

    /// Media duration in seconds, `None` for live or not yet known media.
    async fn duration(&mut self) -> Result<Option<f64>, EngineError>;

    /// Stops the engine and releases everything it holds on the surface.
    async fn shutdown(&mut self);
}

/// Creates engine instances drawing into a given surface.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        surface: &PlayerSurface,
        mode: DecodeMode,
    ) -> Result<Box<dyn MediaEngine>, EngineError>;
}
