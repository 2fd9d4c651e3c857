//! Frontend host: the UI-side half of the bridge.
//!
//! The web UI runs in an external web view. This crate gives it a loopback
//! endpoint to call the backend and receive its events, starts the processes
//! serving and hosting the UI, and runs the event loop whose end terminates
//! the application.

use std::future::IntoFuture;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Context;
use jellyplayer_bridge::config::{Config, LoggingConfig};
use jellyplayer_bridge::notification::NotificationType;
use jellyplayer_bridge::{BridgeCall, BridgeFault, BridgeReply, MessageFromBackend, MessageToBackend};
use tokio::sync::{mpsc, oneshot};

use crate::events::EventHub;
use crate::server::ServerState;
use crate::ui_process::UiProcesses;

pub mod events;
pub mod server;
pub mod ui_process;

/// Typed client for the backend end of the bridge.
#[derive(Clone)]
pub struct BackendBridge {
    pub to_backend: mpsc::Sender<MessageToBackend>,
}

impl BackendBridge {
    pub async fn request_config(&self) -> anyhow::Result<()> {
        self.to_backend
            .send(MessageToBackend::ConfigurationRequest)
            .await
            .context("failed to request config")
    }

    /// Performs `call` and waits for its reply.
    ///
    /// A backend that drops the request answers `Cancelled`; a backend that
    /// is gone answers `Unavailable`.
    pub async fn call(&self, call: BridgeCall) -> BridgeReply {
        let (reply, answer) = oneshot::channel();
        if self
            .to_backend
            .send(MessageToBackend::Call { call, reply })
            .await
            .is_err()
        {
            return Err(BridgeFault::unavailable("backend is not running"));
        }
        answer.await.unwrap_or_else(|_| Err(BridgeFault::cancelled()))
    }
}

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// The backend asked for termination, a relaunch may follow.
    Shutdown,
    Interrupted,
    /// The web view host exited with this code.
    HostExited(i32),
}

impl LoopExit {
    fn exit_code(self) -> ExitCode {
        match self {
            LoopExit::Shutdown => ExitCode::SUCCESS,
            LoopExit::Interrupted => ExitCode::from(130),
            LoopExit::HostExited(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        }
    }
}

/// Runs the frontend until the backend requests shutdown, the web view host
/// exits or the process is interrupted. The returned code is the process
/// exit code.
pub fn run(
    rx: mpsc::Receiver<MessageFromBackend>,
    tx: mpsc::Sender<MessageToBackend>,
) -> anyhow::Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(event_loop(rx, tx))
}

async fn event_loop(
    mut rx: mpsc::Receiver<MessageFromBackend>,
    tx: mpsc::Sender<MessageToBackend>,
) -> anyhow::Result<ExitCode> {
    let bridge = BackendBridge { to_backend: tx };
    bridge.request_config().await?;
    let config = wait_for_config(&mut rx).await?;
    apply_log_level(&config.logging);

    let events = EventHub::default();
    let listener = tokio::net::TcpListener::bind(config.bridge.listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.bridge.listen_addr))?;
    let bridge_addr = listener.local_addr()?;
    log::info!("Bridge listening on http://{bridge_addr}");

    let router = server::router(ServerState::new(
        bridge.clone(),
        events.clone(),
        config.ui.url.as_deref(),
    ));
    let server = tokio::spawn(axum::serve(listener, router).into_future());

    let mut processes = UiProcesses::spawn(&config.ui, bridge_addr)?;

    let exit = loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(MessageFromBackend::ShutdownRequested) => {
                    log::info!("Backend requested shutdown");
                    events.publish(&MessageFromBackend::ShutdownRequested);
                    break Ok(LoopExit::Shutdown);
                }
                Some(message) => relay(&events, message),
                None => break Err(anyhow::anyhow!("backend stopped unexpectedly")),
            },
            status = processes.host_exited() => {
                let code = status.context("failed to wait for the web view host")?.code().unwrap_or(1);
                log::info!("Web view host exited with code {code}");
                break Ok(LoopExit::HostExited(code));
            },
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("failed to listen for interrupts")?;
                log::info!("Interrupted");
                break Ok(LoopExit::Interrupted);
            },
        }
    };

    processes.shutdown().await;
    server.abort();
    exit.map(LoopExit::exit_code)
}

async fn wait_for_config(rx: &mut mpsc::Receiver<MessageFromBackend>) -> anyhow::Result<Config> {
    while let Some(message) = rx.recv().await {
        match message {
            MessageFromBackend::ConfigurationResponse(config) => return Ok(config),
            MessageFromBackend::NotificationMessage(notification)
                if notification.notification_type == NotificationType::Error =>
            {
                anyhow::bail!("backend failed to start: {}", notification.message);
            }
            other => log::debug!("Ignoring {other:?} before configuration"),
        }
    }
    anyhow::bail!("backend stopped before delivering the configuration")
}

fn relay(events: &EventHub, message: MessageFromBackend) {
    match &message {
        MessageFromBackend::NotificationMessage(notification) => {
            log::info!(
                "Notification ({:?}): {}",
                notification.notification_type,
                notification.message
            );
        }
        other => log::debug!("Got a message from backend: {other:?}"),
    }
    events.publish(&message);
}

/// Applies the configured level. The logger is installed accepting every
/// level, so raising verbosity here takes effect.
fn apply_log_level(config: &LoggingConfig) {
    match log::LevelFilter::from_str(&config.level) {
        Ok(level) => log::set_max_level(level),
        Err(_) => log::warn!("Unknown log level {:?}, keeping the default", config.level),
    }
}
