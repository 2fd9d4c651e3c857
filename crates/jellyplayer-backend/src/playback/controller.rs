use std::sync::Arc;
use std::time::Duration;

use jellyplayer_bridge::config::PlayerConfig;
use jellyplayer_bridge::playback::{PlaybackSnapshot, PlaybackStatus};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::time::timeout;

use super::engine::{DecodeMode, EngineError, EngineFactory, MediaEngine};
use crate::window::PlayerSurface;

/// Errors returned by [`PlaybackController`] operations.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("`{operation}` is not valid while {status:?}")]
    InvalidTransition {
        operation: &'static str,
        status: PlaybackStatus,
    },
    #[error("no player surface is bound")]
    NoSurface,
    #[error("an engine is still bound to the player surface, stop it first")]
    SurfaceBusy,
    /// Neither decode path could be started, or the media never became ready.
    #[error("media engine failed to initialize: {0}")]
    EngineInit(EngineError),
    #[error("media engine failed: {0}")]
    Engine(#[from] EngineError),
    /// `stop` arrived while the media was still loading.
    #[error("loading was interrupted by stop")]
    Interrupted,
}

/// Owns the player surface binding and at most one engine instance.
///
/// State machine: `Idle → Loading → Playing ⇄ Paused → Stopped → Idle`.
/// Every transition is broadcast to subscribers.
///
/// Loading runs in three steps so the controller can be shared behind a lock
/// without holding it while the media opens: [`Self::begin_play`] enters
/// `Loading` and hands the engine to a [`PendingLoad`], the load runs
/// unlocked, and [`Self::finish_play`] commits its outcome.
pub struct PlaybackController {
    factory: Arc<dyn EngineFactory>,
    config: PlayerConfig,
    surface: Option<PlayerSurface>,
    engine: Option<Box<dyn MediaEngine>>,
    decode_mode: Option<DecodeMode>,
    /// Set while a [`PendingLoad`] holds the engine.
    loading: Option<LoadSlot>,
    state: PlaybackSnapshot,
    transitions: broadcast::Sender<PlaybackSnapshot>,
}

enum LoadSlot {
    Running(oneshot::Sender<()>),
    /// `stop` was called, the load is winding down.
    Interrupted,
}

/// A media load in flight, detached from the controller.
#[must_use = "a pending load must be run and handed back to `finish_play`"]
pub struct PendingLoad {
    url: String,
    surface: PlayerSurface,
    engine: Option<Box<dyn MediaEngine>>,
    factory: Arc<dyn EngineFactory>,
    ready_timeout: Duration,
    previous: PlaybackSnapshot,
    interrupt: oneshot::Receiver<()>,
}

/// What a [`PendingLoad`] ended with.
pub struct LoadOutcome {
    url: String,
    previous: PlaybackSnapshot,
    result: LoadResult,
}

enum LoadResult {
    Ready {
        engine: Box<dyn MediaEngine>,
        created: Option<DecodeMode>,
    },
    /// No engine could be started. Nothing is left to shut down.
    StartFailed(EngineError),
    /// The engine was started but the media did not load. The engine has
    /// been shut down.
    LoadFailed(EngineError),
    Interrupted,
}

impl PlaybackController {
    pub fn new(factory: Arc<dyn EngineFactory>, config: PlayerConfig) -> Self {
        let (transitions, _) = broadcast::channel(32);
        Self {
            factory,
            config,
            surface: None,
            engine: None,
            decode_mode: None,
            loading: None,
            state: PlaybackSnapshot::default(),
            transitions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackSnapshot> {
        self.transitions.subscribe()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    /// Decode path of the running engine, if any.
    pub fn decode_mode(&self) -> Option<DecodeMode> {
        self.decode_mode
    }

    /// Binds the surface future engines draw into.
    pub fn bind_surface(&mut self, surface: PlayerSurface) -> Result<(), PlaybackError> {
        if self.engine_in_use() {
            return Err(PlaybackError::SurfaceBusy);
        }
        log::debug!("Binding player surface {}", surface.id);
        self.surface = Some(surface);
        Ok(())
    }

    /// Releases the surface binding so the surface can be destroyed.
    pub fn unbind_surface(&mut self) -> Result<Option<PlayerSurface>, PlaybackError> {
        if self.engine_in_use() {
            return Err(PlaybackError::SurfaceBusy);
        }
        Ok(self.surface.take())
    }

    /// Starts `url` on the controller behind `controller`, reusing the
    /// running engine when there is one. The lock is released while the
    /// media loads, so other calls are served in the meantime.
    ///
    /// Ends in `Playing`, or reports [`PlaybackError::EngineInit`] and leaves
    /// the controller where it started (engine creation failed) or in
    /// `Stopped` (the media never became ready). A `stop` during the load
    /// makes it report [`PlaybackError::Interrupted`].
    pub async fn play(controller: &Mutex<Self>, url: &str) -> Result<(), PlaybackError> {
        let pending = controller.lock().await.begin_play(url)?;
        let outcome = pending.run().await;
        controller.lock().await.finish_play(outcome).await
    }

    /// Enters `Loading` for `url` and detaches the load.
    pub fn begin_play(&mut self, url: &str) -> Result<PendingLoad, PlaybackError> {
        if self.state.status == PlaybackStatus::Loading {
            return Err(self.invalid("play"));
        }
        if self.loading.is_some() {
            // an interrupted load is still shutting its engine down
            return Err(PlaybackError::SurfaceBusy);
        }
        let surface = self.surface.clone().ok_or(PlaybackError::NoSurface)?;
        let previous = self.state.clone();
        let (interrupt_tx, interrupt) = oneshot::channel();
        self.loading = Some(LoadSlot::Running(interrupt_tx));

        self.state.current_media_url = Some(url.to_string());
        self.state.position_seconds = 0.0;
        self.transition(PlaybackStatus::Loading);

        Ok(PendingLoad {
            url: url.to_string(),
            surface,
            engine: self.engine.take(),
            factory: self.factory.clone(),
            ready_timeout: self.config.ready_timeout(),
            previous,
            interrupt,
        })
    }

    /// Commits the outcome of a load started by [`Self::begin_play`].
    pub async fn finish_play(&mut self, outcome: LoadOutcome) -> Result<(), PlaybackError> {
        let interrupted = matches!(self.loading.take(), Some(LoadSlot::Interrupted));
        let LoadOutcome {
            url,
            previous,
            result,
        } = outcome;

        match result {
            // the media became ready just as `stop` came in
            LoadResult::Ready { mut engine, .. } if interrupted => {
                engine.shutdown().await;
                self.decode_mode = None;
                Err(PlaybackError::Interrupted)
            }
            LoadResult::Ready { engine, created } => {
                log::info!("Playing {url}");
                self.engine = Some(engine);
                if created.is_some() {
                    self.decode_mode = created;
                }
                self.transition(PlaybackStatus::Playing);
                Ok(())
            }
            LoadResult::StartFailed(e) if !interrupted => {
                self.state = previous;
                self.emit();
                Err(PlaybackError::EngineInit(e))
            }
            LoadResult::LoadFailed(e) if !interrupted => {
                log::error!("Engine failed to load {url}: {e}");
                self.decode_mode = None;
                self.transition(PlaybackStatus::Stopped);
                Err(PlaybackError::EngineInit(e))
            }
            LoadResult::StartFailed(_) | LoadResult::LoadFailed(_) | LoadResult::Interrupted => {
                log::info!("Loading {url} was interrupted");
                self.decode_mode = None;
                Err(PlaybackError::Interrupted)
            }
        }
    }

    /// Seeks to `timestamp` seconds, clamped into the media duration.
    pub async fn seek(&mut self, timestamp: f64) -> Result<(), PlaybackError> {
        if !matches!(
            self.state.status,
            PlaybackStatus::Playing | PlaybackStatus::Paused
        ) {
            return Err(self.invalid("seek"));
        }
        let query_timeout = self.config.position_query_timeout();
        let Some(engine) = self.engine.as_mut() else {
            return Err(self.invalid("seek"));
        };

        let duration = match timeout(query_timeout, engine.duration()).await {
            Ok(Ok(duration)) => duration,
            _ => None,
        };
        let mut target = timestamp.max(0.0);
        if let Some(duration) = duration {
            target = target.min(duration);
        }

        engine.seek(target).await?;
        self.state.position_seconds = target;
        self.emit();
        Ok(())
    }

    /// Last known position, refreshed from the engine within the configured
    /// bound.
    pub async fn query_position(&mut self) -> Result<f64, PlaybackError> {
        if self.state.status == PlaybackStatus::Idle {
            return Err(self.invalid("queryPosition"));
        }

        if let Some(engine) = self.engine.as_mut() {
            match timeout(self.config.position_query_timeout(), engine.position()).await {
                Ok(Ok(position)) => self.state.position_seconds = position,
                Ok(Err(e)) => log::debug!("Position query failed, using last known: {e}"),
                Err(_) => log::debug!("Position query timed out, using last known"),
            }
        }
        Ok(self.state.position_seconds)
    }

    pub async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.set_paused(true, "pause", PlaybackStatus::Playing, PlaybackStatus::Paused)
            .await
    }

    pub async fn resume(&mut self) -> Result<(), PlaybackError> {
        self.set_paused(false, "resume", PlaybackStatus::Paused, PlaybackStatus::Playing)
            .await
    }

    /// Tears the engine down and moves to `Stopped`. The surface stays bound.
    ///
    /// While `Loading`, the pending load is interrupted and shuts its engine
    /// down itself.
    pub async fn stop(&mut self) -> Result<(), PlaybackError> {
        if !matches!(
            self.state.status,
            PlaybackStatus::Loading | PlaybackStatus::Playing | PlaybackStatus::Paused
        ) {
            return Err(self.invalid("stop"));
        }
        if matches!(self.loading, Some(LoadSlot::Running(_))) {
            if let Some(LoadSlot::Running(interrupt)) = self.loading.replace(LoadSlot::Interrupted) {
                let _ = interrupt.send(());
            }
        }
        self.teardown_engine().await;
        self.transition(PlaybackStatus::Stopped);
        Ok(())
    }

    /// Returns from `Stopped` to `Idle`, forgetting the last media.
    pub fn reset(&mut self) -> Result<(), PlaybackError> {
        if self.state.status != PlaybackStatus::Stopped {
            return Err(self.invalid("reset"));
        }
        self.state = PlaybackSnapshot::default();
        self.emit();
        Ok(())
    }

    async fn set_paused(
        &mut self,
        paused: bool,
        operation: &'static str,
        from: PlaybackStatus,
        to: PlaybackStatus,
    ) -> Result<(), PlaybackError> {
        if self.state.status != from {
            return Err(self.invalid(operation));
        }
        let Some(engine) = self.engine.as_mut() else {
            return Err(self.invalid(operation));
        };
        engine.set_paused(paused).await?;
        self.transition(to);
        Ok(())
    }

    async fn teardown_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown().await;
        }
        self.decode_mode = None;
    }

    fn engine_in_use(&self) -> bool {
        self.engine.is_some() || self.loading.is_some()
    }

    fn invalid(&self, operation: &'static str) -> PlaybackError {
        PlaybackError::InvalidTransition {
            operation,
            status: self.state.status,
        }
    }

    fn transition(&mut self, status: PlaybackStatus) {
        log::debug!("Playback {:?} -> {status:?}", self.state.status);
        self.state.status = status;
        self.emit();
    }

    fn emit(&self) {
        // no subscribers is fine
        let _ = self.transitions.send(self.state.clone());
    }
}

impl PendingLoad {
    /// Starts an engine if none was running and waits, within the ready
    /// timeout, for the media to load. Resolves early when `stop` interrupts.
    pub async fn run(mut self) -> LoadOutcome {
        let result = self.load().await;
        LoadOutcome {
            url: self.url,
            previous: self.previous,
            result,
        }
    }

    async fn load(&mut self) -> LoadResult {
        let (mut engine, created) = match self.engine.take() {
            Some(engine) => (engine, None),
            None => {
                let started = tokio::select! {
                    started = start_engine(self.factory.as_ref(), &self.surface) => started,
                    _ = &mut self.interrupt => return LoadResult::Interrupted,
                };
                match started {
                    Ok((engine, mode)) => (engine, Some(mode)),
                    Err(e) => return LoadResult::StartFailed(e),
                }
            }
        };

        let loaded = tokio::select! {
            loaded = timeout(self.ready_timeout, engine.load(&self.url)) => {
                Some(loaded.unwrap_or(Err(EngineError::Timeout)))
            }
            _ = &mut self.interrupt => None,
        };

        match loaded {
            Some(Ok(())) => LoadResult::Ready { engine, created },
            Some(Err(e)) => {
                engine.shutdown().await;
                LoadResult::LoadFailed(e)
            }
            None => {
                engine.shutdown().await;
                LoadResult::Interrupted
            }
        }
    }
}

/// Creates an engine, falling back to software decoding when the hardware
/// path cannot be started.
async fn start_engine(
    factory: &dyn EngineFactory,
    surface: &PlayerSurface,
) -> Result<(Box<dyn MediaEngine>, DecodeMode), EngineError> {
    match factory.create(surface, DecodeMode::Hardware).await {
        Ok(engine) => Ok((engine, DecodeMode::Hardware)),
        Err(hardware_error) => {
            log::warn!("Hardware decoding unavailable ({hardware_error}), using software");
            let engine = factory.create(surface, DecodeMode::Software).await?;
            Ok((engine, DecodeMode::Software))
        }
    }
}
