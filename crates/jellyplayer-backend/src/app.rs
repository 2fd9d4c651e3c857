//! Application context and message dispatching utilities.
//!
//! The context contains the shared state and provides helpers for sending
//! responses and notifications back to the frontend bridge.

use std::sync::{Arc, Mutex};

use jellyplayer_bridge::config::Config;
use jellyplayer_bridge::{BridgeCall, BridgeReply, MessageFromBackend, MessageToBackend};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::oneshot;

use crate::playback::{EngineFactory, PlaybackController};
use crate::resolver::{ReachabilityProbe, SessionResolver};
use crate::restart::{Invocation, Relauncher, RestartCoordinator};
use crate::services::{self, CallResult};
use crate::state::{SharedState, State};
use crate::store::Store;
use crate::window::{SurfaceHost, WindowManager};

/// The replaceable edges of the backend: network, media engine, window
/// system and process control.
pub struct Seams {
    pub probe: Arc<dyn ReachabilityProbe>,
    pub engines: Arc<dyn EngineFactory>,
    pub surfaces: Arc<dyn SurfaceHost>,
    pub relauncher: Arc<dyn Relauncher>,
}

/// Shared application context passed to services and message handlers.
pub(crate) struct AppContext {
    /// Runtime application state shared across services.
    pub state: SharedState,
    /// Outbound channel to the frontend bridge.
    pub tx: Sender<MessageFromBackend>,
}

impl AppContext {
    /// Builds every component around `store` and starts forwarding their
    /// state changes to the frontend.
    pub fn assemble(
        config: Config,
        store: Arc<Store>,
        seams: Seams,
        invocation: Invocation,
        tx: Sender<MessageFromBackend>,
    ) -> Arc<Self> {
        let controller = PlaybackController::new(seams.engines, config.player.clone());
        let playback_changes = controller.subscribe();
        let playback = Arc::new(tokio::sync::Mutex::new(controller));

        let windows = Arc::new(WindowManager::new(seams.surfaces, playback.clone()));
        let window_changes = windows.subscribe();

        let state = Arc::new(State {
            resolver: SessionResolver::new(store.clone(), seams.probe),
            restart: RestartCoordinator::new(
                store.clone(),
                seams.relauncher,
                invocation,
                tx.clone(),
            ),
            config,
            store,
            playback,
            windows,
            active_probe: Mutex::new(None),
        });

        let context = Arc::new(Self { state, tx });
        context.forward(playback_changes, MessageFromBackend::PlaybackStateChanged);
        context.forward(window_changes, MessageFromBackend::WindowStateChanged);
        context
    }

    /// Read and dispatch messages from the frontend bridge until it closes.
    pub async fn consume_bridge_messages(self: &Arc<Self>, mut rx: Receiver<MessageToBackend>) {
        while let Some(message) = rx.recv().await {
            self.dispatch_message(message).await;
        }
        log::info!("Frontend bridge closed");
    }

    /// Dispatches the received message from frontend down to individual
    /// service handlers.
    async fn dispatch_message(self: &Arc<Self>, message: MessageToBackend) {
        match message {
            MessageToBackend::ConfigurationRequest => {
                log::debug!("Got a configuration request");
                services::config_service::handle_config_request(self.clone()).await;
            }
            MessageToBackend::Call { call, reply } => {
                // operation names only, arguments may carry credentials
                log::debug!("Got a bridge call `{}`", call.name());
                self.dispatch_call(call, reply).await;
            }
        }
    }

    async fn dispatch_call(self: &Arc<Self>, call: BridgeCall, reply: oneshot::Sender<BridgeReply>) {
        use services::{
            playback_service, process_service, session_service, store_service, window_service,
        };

        let context = self.clone();
        let result: CallResult = match call {
            BridgeCall::ResolveStartup => {
                return session_service::handle_resolve_startup(context, reply).await;
            }
            BridgeCall::ValidateAndCommitServer { url } => {
                return session_service::handle_validate_server(context, url, reply).await;
            }
            BridgeCall::Play { url } => {
                return playback_service::handle_play(context, url, reply).await;
            }
            BridgeCall::LaunchPlayer { url } => {
                tokio::spawn(async move {
                    let result = window_service::handle_launch_player(context, &url).await;
                    let _ = reply.send(result.map_err(Into::into));
                });
                return;
            }
            BridgeCall::ClosePlayer => {
                tokio::spawn(async move {
                    let result = window_service::handle_close_player(context).await;
                    let _ = reply.send(result.map_err(Into::into));
                });
                return;
            }
            BridgeCall::GetAuthInfo => store_service::handle_get_auth_info(context).await,
            BridgeCall::SetAuthInfo { user_name, secret } => {
                store_service::handle_set_auth_info(context, user_name, secret.expose()).await
            }
            BridgeCall::GetFlag { key } => store_service::handle_get_flag(context, &key).await,
            BridgeCall::GetString { key } => store_service::handle_get_string(context, &key).await,
            BridgeCall::ClearAndRestart => process_service::handle_clear_and_restart(context).await,
            BridgeCall::Restart => process_service::handle_restart(context).await,
            BridgeCall::Pause => playback_service::handle_pause(context).await,
            BridgeCall::Resume => playback_service::handle_resume(context).await,
            BridgeCall::Stop => playback_service::handle_stop(context).await,
            BridgeCall::Seek { timestamp_seconds } => {
                playback_service::handle_seek(context, timestamp_seconds).await
            }
            BridgeCall::QueryPosition => playback_service::handle_query_position(context).await,
            BridgeCall::PlaybackState => playback_service::handle_playback_state(context).await,
            BridgeCall::WindowState => window_service::handle_window_state(context).await,
        };

        if let Err(e) = &result {
            log::warn!("Bridge call failed: {e}");
        }
        let _ = reply.send(result.map_err(Into::into));
    }

    /// Relays every value broadcast on `changes` to the frontend as an event.
    fn forward<T>(self: &Arc<Self>, mut changes: broadcast::Receiver<T>, event: fn(T) -> MessageFromBackend)
    where
        T: Clone + Send + 'static,
    {
        let context = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(value) => context.send(event(value)).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Dropped {skipped} state change event(s)");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Send a message to the frontend bridge.
    pub async fn send(&self, message: MessageFromBackend) {
        if self.tx.send(message).await.is_err() {
            log::debug!("Frontend is gone, dropping backend event");
        }
    }

    /// Send a notification message to the frontend bridge.
    pub async fn send_notification(
        &self,
        notification_type: jellyplayer_bridge::notification::NotificationType,
        content: impl Into<String>,
    ) {
        self.send(MessageFromBackend::NotificationMessage(
            jellyplayer_bridge::notification::NotificationMessage {
                notification_type,
                message: content.into(),
            },
        ))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jellyplayer_bridge::notification::NotificationType;
    use jellyplayer_bridge::playback::PlaybackStatus;
    use jellyplayer_bridge::session::{SessionKey, StartupDecision};
    use jellyplayer_bridge::window::WindowState;
    use jellyplayer_bridge::{BridgeFault, BridgeValue, FaultKind, ProbeState, Secret};
    use tokio::sync::mpsc;

    use super::*;
    use crate::playback::controller::tests::{Script, ScriptedFactory};
    use crate::resolver::tests::ScriptedProbe;
    use crate::restart::tests::{RecordingRelauncher, invocation};
    use crate::window::tests::RecordingSurfaceHost;

    struct Harness {
        context: Arc<AppContext>,
        events: mpsc::Receiver<MessageFromBackend>,
        relauncher: Arc<RecordingRelauncher>,
    }

    fn harness(probe: ScriptedProbe, engines: ScriptedFactory) -> Harness {
        let mut config = Config::default();
        config.player.ready_timeout_ms = 50;
        config.player.position_query_timeout_ms = 50;
        harness_with(probe, engines, config)
    }

    fn harness_with(probe: ScriptedProbe, engines: ScriptedFactory, config: Config) -> Harness {
        let (tx, events) = mpsc::channel(64);
        let relauncher = Arc::new(RecordingRelauncher::default());

        let context = AppContext::assemble(
            config,
            Arc::new(Store::in_memory()),
            Seams {
                probe: Arc::new(probe),
                engines: Arc::new(engines),
                surfaces: Arc::new(RecordingSurfaceHost::new()),
                relauncher: relauncher.clone(),
            },
            invocation(),
            tx,
        );
        Harness {
            context,
            events,
            relauncher,
        }
    }

    impl Harness {
        /// Dispatches `call` and returns the receiving end of its reply.
        async fn send(&self, call: BridgeCall) -> oneshot::Receiver<BridgeReply> {
            let (reply, answer) = oneshot::channel();
            self.context
                .dispatch_message(MessageToBackend::Call { call, reply })
                .await;
            answer
        }

        async fn call(&self, call: BridgeCall) -> BridgeReply {
            self.send(call)
                .await
                .await
                .unwrap_or_else(|_| Err(BridgeFault::cancelled()))
        }

        fn drain_events(&mut self) -> Vec<MessageFromBackend> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        fn probe_states(&mut self) -> Vec<ProbeState> {
            self.drain_events()
                .into_iter()
                .filter_map(|event| match event {
                    MessageFromBackend::ProbeStateChanged(state) => Some(state),
                    _ => None,
                })
                .collect()
        }
    }

    fn fault_kind(reply: BridgeReply) -> FaultKind {
        reply.unwrap_err().kind
    }

    #[tokio::test]
    async fn configuration_is_delivered_on_request() {
        let mut harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());
        harness
            .context
            .dispatch_message(MessageToBackend::ConfigurationRequest)
            .await;

        assert!(matches!(
            harness.events.recv().await,
            Some(MessageFromBackend::ConfigurationResponse(config)) if config.player.ready_timeout_ms == 50
        ));
    }

    #[tokio::test]
    async fn auth_info_round_trips_and_enables_open_home() {
        let harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());

        assert_eq!(
            harness.call(BridgeCall::GetAuthInfo).await,
            Ok(BridgeValue::AuthInfo(None, None))
        );
        assert_eq!(
            harness
                .call(BridgeCall::GetFlag {
                    key: "openHomeEnabled".into()
                })
                .await,
            Ok(BridgeValue::Bool(false))
        );

        harness
            .call(BridgeCall::SetAuthInfo {
                user_name: "alice".into(),
                secret: Secret::new("hunter2"),
            })
            .await
            .unwrap();

        assert_eq!(
            harness.call(BridgeCall::GetAuthInfo).await,
            Ok(BridgeValue::AuthInfo(
                Some("alice".into()),
                Some("hunter2".into())
            ))
        );
        assert_eq!(
            harness
                .call(BridgeCall::GetFlag {
                    key: "openHomeEnabled".into()
                })
                .await,
            Ok(BridgeValue::Bool(true))
        );
        assert_eq!(
            harness
                .call(BridgeCall::GetString {
                    key: "UserName".into()
                })
                .await,
            Ok(BridgeValue::Text(Some("alice".into())))
        );
    }

    #[tokio::test]
    async fn validated_server_makes_startup_ready() {
        let mut harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());

        assert_eq!(
            harness.call(BridgeCall::ResolveStartup).await,
            Ok(BridgeValue::Startup(StartupDecision::NoServerConfigured))
        );
        assert_eq!(
            harness
                .call(BridgeCall::ValidateAndCommitServer {
                    url: "http://media.local:8096".into()
                })
                .await,
            Ok(BridgeValue::Bool(true))
        );
        assert_eq!(
            harness.call(BridgeCall::ResolveStartup).await,
            Ok(BridgeValue::Startup(StartupDecision::ServerReady))
        );

        // the first resolution had no server to probe
        assert_eq!(
            harness.probe_states(),
            vec![
                ProbeState::Pending,
                ProbeState::Finished { reachable: true },
                ProbeState::Pending,
                ProbeState::Finished { reachable: true },
            ]
        );
    }

    #[tokio::test]
    async fn unconfigured_startup_sends_no_probe_events() {
        let mut harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());

        assert_eq!(
            harness.call(BridgeCall::ResolveStartup).await,
            Ok(BridgeValue::Startup(StartupDecision::NoServerConfigured))
        );
        assert_eq!(harness.probe_states(), vec![]);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_false_result() {
        let harness = harness(
            ScriptedProbe::new(Err(crate::resolver::ProbeFailure::Timeout)),
            ScriptedFactory::working(),
        );

        assert_eq!(
            harness
                .call(BridgeCall::ValidateAndCommitServer {
                    url: "http://media.local:8096".into()
                })
                .await,
            Ok(BridgeValue::Bool(false))
        );
        assert_eq!(
            harness.context.state.store.get(SessionKey::Server).await,
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn newer_probe_cancels_the_one_in_flight() {
        let mut harness = harness(
            ScriptedProbe::reachable().with_delay(Duration::from_secs(1)),
            ScriptedFactory::working(),
        );

        let first = harness
            .send(BridgeCall::ValidateAndCommitServer {
                url: "http://old.local".into(),
            })
            .await;
        // let the first probe start before superseding it
        tokio::task::yield_now().await;
        let second = harness
            .send(BridgeCall::ValidateAndCommitServer {
                url: "http://new.local".into(),
            })
            .await;

        assert_eq!(first.await.unwrap().unwrap_err().kind, FaultKind::Cancelled);
        assert_eq!(second.await.unwrap(), Ok(BridgeValue::Bool(true)));
        assert_eq!(
            harness.context.state.store.get(SessionKey::Server).await,
            Some("http://new.local".into())
        );
        assert_eq!(
            harness.probe_states(),
            vec![
                ProbeState::Pending,
                ProbeState::Cancelled,
                ProbeState::Pending,
                ProbeState::Finished { reachable: true },
            ]
        );
    }

    #[tokio::test]
    async fn playback_calls_outside_their_states_are_invalid_transitions() {
        let harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());

        let seek = harness
            .call(BridgeCall::Seek {
                timestamp_seconds: 10.0,
            })
            .await;
        assert_eq!(fault_kind(seek), FaultKind::InvalidTransition);
        assert_eq!(
            fault_kind(harness.call(BridgeCall::Pause).await),
            FaultKind::InvalidTransition
        );
        assert_eq!(
            fault_kind(harness.call(BridgeCall::QueryPosition).await),
            FaultKind::InvalidTransition
        );
        // no player surface yet
        assert_eq!(
            fault_kind(
                harness
                    .call(BridgeCall::Play {
                        url: "http://media.local/a.mkv".into()
                    })
                    .await
            ),
            FaultKind::InvalidTransition
        );
    }

    #[tokio::test]
    async fn launch_player_then_control_playback() {
        let mut harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());

        assert_eq!(
            harness
                .call(BridgeCall::LaunchPlayer {
                    url: "http://media.local/a.mkv".into()
                })
                .await,
            Ok(BridgeValue::Unit)
        );
        assert_eq!(
            harness.call(BridgeCall::WindowState).await,
            Ok(BridgeValue::Window(WindowState::PlayerVisible))
        );

        harness
            .call(BridgeCall::Seek {
                timestamp_seconds: 30.0,
            })
            .await
            .unwrap();
        harness.call(BridgeCall::Pause).await.unwrap();
        assert_eq!(
            harness.call(BridgeCall::QueryPosition).await,
            Ok(BridgeValue::Number(30.0))
        );

        let Ok(BridgeValue::Playback(snapshot)) = harness.call(BridgeCall::PlaybackState).await
        else {
            panic!("expected a playback snapshot");
        };
        assert_eq!(snapshot.status, PlaybackStatus::Paused);
        assert_eq!(
            snapshot.current_media_url.as_deref(),
            Some("http://media.local/a.mkv")
        );

        assert_eq!(
            fault_kind(
                harness
                    .call(BridgeCall::LaunchPlayer {
                        url: "http://media.local/b.mkv".into()
                    })
                    .await
            ),
            FaultKind::InvalidTransition
        );

        harness.call(BridgeCall::ClosePlayer).await.unwrap();
        assert_eq!(
            harness.call(BridgeCall::WindowState).await,
            Ok(BridgeValue::Window(WindowState::LoginVisible))
        );

        // forwarders run on their own tasks
        tokio::task::yield_now().await;
        let events = harness.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            MessageFromBackend::WindowStateChanged(WindowState::PlayerVisible)
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            MessageFromBackend::PlaybackStateChanged(snapshot) if snapshot.status == PlaybackStatus::Playing
        )));
    }

    /// Harness whose engines never report the media loaded and whose ready
    /// timeout outlasts any test.
    fn loading_harness() -> Harness {
        let mut config = Config::default();
        config.player.ready_timeout_ms = 10_000;
        config.player.position_query_timeout_ms = 50;
        harness_with(
            ScriptedProbe::reachable(),
            ScriptedFactory::new(Script::NeverReady, Script::NeverReady),
            config,
        )
    }

    #[tokio::test]
    async fn calls_are_served_while_the_player_is_loading() {
        let mut harness = loading_harness();
        let launch = harness
            .send(BridgeCall::LaunchPlayer {
                url: "http://media.local/a.mkv".into(),
            })
            .await;
        loop {
            match harness.events.recv().await {
                Some(MessageFromBackend::PlaybackStateChanged(snapshot))
                    if snapshot.status == PlaybackStatus::Loading =>
                {
                    break;
                }
                Some(_) => {}
                None => panic!("backend events closed"),
            }
        }

        let (position, flag, state) = tokio::time::timeout(Duration::from_secs(1), async {
            (
                harness.call(BridgeCall::QueryPosition).await,
                harness
                    .call(BridgeCall::GetFlag {
                        key: "serverReachable".into(),
                    })
                    .await,
                harness.call(BridgeCall::PlaybackState).await,
            )
        })
        .await
        .expect("calls wait for the media to load");
        assert_eq!(position, Ok(BridgeValue::Number(0.0)));
        assert_eq!(flag, Ok(BridgeValue::Bool(false)));
        assert!(matches!(
            state,
            Ok(BridgeValue::Playback(snapshot)) if snapshot.status == PlaybackStatus::Loading
        ));
        let seek = harness
            .call(BridgeCall::Seek {
                timestamp_seconds: 10.0,
            })
            .await;
        assert_eq!(fault_kind(seek), FaultKind::InvalidTransition);

        // stop cuts the load short and the launch rolls back
        assert_eq!(harness.call(BridgeCall::Stop).await, Ok(BridgeValue::Unit));
        let launched = tokio::time::timeout(Duration::from_secs(1), launch)
            .await
            .expect("launch ends once stopped")
            .unwrap();
        assert_eq!(fault_kind(launched), FaultKind::Cancelled);
        assert_eq!(
            harness.call(BridgeCall::WindowState).await,
            Ok(BridgeValue::Window(WindowState::LoginVisible))
        );
    }

    #[tokio::test]
    async fn play_is_loading_before_the_next_call() {
        let harness = loading_harness();
        harness
            .context
            .state
            .playback
            .lock()
            .await
            .bind_surface(crate::window::PlayerSurface {
                id: 7,
                native_handle: None,
            })
            .unwrap();

        let play = harness
            .send(BridgeCall::Play {
                url: "http://media.local/a.mkv".into(),
            })
            .await;
        let Ok(BridgeValue::Playback(snapshot)) = harness.call(BridgeCall::PlaybackState).await
        else {
            panic!("expected a playback snapshot");
        };
        assert_eq!(snapshot.status, PlaybackStatus::Loading);
        assert_eq!(
            fault_kind(
                harness
                    .call(BridgeCall::Play {
                        url: "http://media.local/b.mkv".into()
                    })
                    .await
            ),
            FaultKind::InvalidTransition
        );

        assert_eq!(harness.call(BridgeCall::Stop).await, Ok(BridgeValue::Unit));
        assert_eq!(fault_kind(play.await.unwrap()), FaultKind::Cancelled);
        let Ok(BridgeValue::Playback(snapshot)) = harness.call(BridgeCall::PlaybackState).await
        else {
            panic!("expected a playback snapshot");
        };
        assert_eq!(snapshot.status, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn launch_without_any_decode_path_reports_engine_failure() {
        let harness = harness(
            ScriptedProbe::reachable(),
            ScriptedFactory::new(Script::FailsToStart, Script::FailsToStart),
        );

        assert_eq!(
            fault_kind(
                harness
                    .call(BridgeCall::LaunchPlayer {
                        url: "http://media.local/a.mkv".into()
                    })
                    .await
            ),
            FaultKind::EngineInitFailure
        );
        assert_eq!(
            harness.call(BridgeCall::WindowState).await,
            Ok(BridgeValue::Window(WindowState::LoginVisible))
        );
    }

    #[tokio::test]
    async fn software_fallback_warns_the_user() {
        let mut harness = harness(
            ScriptedProbe::reachable(),
            ScriptedFactory::new(Script::FailsToStart, Script::Works),
        );

        harness
            .call(BridgeCall::LaunchPlayer {
                url: "http://media.local/a.mkv".into(),
            })
            .await
            .unwrap();

        assert!(harness.drain_events().iter().any(|event| matches!(
            event,
            MessageFromBackend::NotificationMessage(notification)
                if notification.notification_type == NotificationType::Warning
        )));
    }

    #[tokio::test]
    async fn clear_and_restart_erases_the_session_and_relaunches() {
        let mut harness = harness(ScriptedProbe::reachable(), ScriptedFactory::working());
        harness
            .call(BridgeCall::ValidateAndCommitServer {
                url: "http://media.local:8096".into(),
            })
            .await
            .unwrap();

        assert_eq!(
            harness.call(BridgeCall::ClearAndRestart).await,
            Ok(BridgeValue::Unit)
        );

        assert_eq!(harness.relauncher.invocations.lock().unwrap().len(), 1);
        assert_eq!(
            harness.call(BridgeCall::ResolveStartup).await,
            Ok(BridgeValue::Startup(StartupDecision::NoServerConfigured))
        );
        assert!(
            harness
                .drain_events()
                .iter()
                .any(|event| matches!(event, MessageFromBackend::ShutdownRequested))
        );
    }
}
