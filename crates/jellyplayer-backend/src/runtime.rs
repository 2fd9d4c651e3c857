//! Backend runtime setup and orchestration.
//!
//! This module wires together configuration, the session store, the
//! production seams and the message dispatch loop that listens to frontend
//! bridge requests.

use std::{sync::Arc, thread};

use jellyplayer_bridge::notification::NotificationType;
use jellyplayer_bridge::{MessageFromBackend, MessageToBackend};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::app::{AppContext, Seams};
use crate::config::{ConfigError, STORE_FILE_NAME};
use crate::playback::mpv::MpvEngineFactory;
use crate::resolver::HttpProbe;
use crate::restart::{DeferredRelauncher, Invocation, RelaunchTicket, RestartError};
use crate::store::{Store, StoreError};
use crate::window::BridgeSurfaceHost;

#[derive(Debug, thiserror::Error)]
enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Restart(#[from] RestartError),
    #[error("failed to build tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Initialize backend state and start processing frontend messages.
async fn setup_backend(
    rx: Receiver<MessageToBackend>,
    tx: Sender<MessageFromBackend>,
    relauncher: DeferredRelauncher,
) -> Result<(), SetupError> {
    let (config, data_path) = crate::config::load_config().await?;
    let store = Arc::new(Store::open(data_path.join(STORE_FILE_NAME)).await?);

    let request_client = reqwest::Client::new();
    let seams = Seams {
        probe: Arc::new(HttpProbe::new(request_client, config.server.clone())),
        engines: Arc::new(MpvEngineFactory::new(config.player.clone())),
        surfaces: Arc::new(BridgeSurfaceHost::new(tx.clone())),
        relauncher: Arc::new(relauncher),
    };

    let context = AppContext::assemble(config, store.clone(), seams, Invocation::current()?, tx);
    context.consume_bridge_messages(rx).await;

    let _ = context.state.playback.lock().await.stop().await;
    store.flush().await?;
    Ok(())
}

async fn report_setup_failure(tx: &Sender<MessageFromBackend>, error: &SetupError) {
    log::error!("Backend failed: {error}");
    let _ = tx
        .send(MessageFromBackend::NotificationMessage(
            jellyplayer_bridge::notification::NotificationMessage {
                notification_type: NotificationType::Error,
                message: error.to_string(),
            },
        ))
        .await;
}

/// The running backend thread.
pub struct BackendHandle {
    thread: thread::JoinHandle<()>,
    relaunch: RelaunchTicket,
}

impl BackendHandle {
    /// Waits for the backend to wind down, which it does once every frontend
    /// sender of the bridge is dropped. Returns the ticket carrying any
    /// relaunch a restart call requested.
    pub fn join(self) -> RelaunchTicket {
        if self.thread.join().is_err() {
            log::error!("Backend thread panicked");
        }
        self.relaunch
    }
}

/// Spawn the backend runtime and begin processing bridge messages.
pub fn run(rx: Receiver<MessageToBackend>, tx: Sender<MessageFromBackend>) -> BackendHandle {
    let relauncher = DeferredRelauncher::default();
    let relaunch = relauncher.ticket();

    let thread = thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                // dropping the channels tells the frontend the backend is gone
                log::error!("Backend failed: {}", SetupError::Runtime(e));
                return;
            }
        };
        runtime.block_on(async {
            let failure_tx = tx.clone();
            if let Err(e) = setup_backend(rx, tx, relauncher).await {
                report_setup_failure(&failure_tx, &e).await;
            }
        });
    });

    BackendHandle { thread, relaunch }
}
