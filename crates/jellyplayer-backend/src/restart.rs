//! Restarting the whole application: flush, schedule a relaunch, ask the UI
//! loop to end. The new process is started by the binary once its UI loop
//! has returned, see [`RelaunchTicket`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use jellyplayer_bridge::MessageFromBackend;
use tokio::sync::mpsc;

use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    #[error("failed to determine the running executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to schedule relaunch: {0}")]
    Schedule(String),
}

/// Executable path and arguments a process was started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Invocation of the running process.
    pub fn current() -> Result<Self, RestartError> {
        Ok(Self {
            program: std::env::current_exe().map_err(RestartError::CurrentExe)?,
            args: std::env::args_os().skip(1).collect(),
        })
    }

    /// Starts the invocation as an independent process and does not wait
    /// for it.
    pub fn spawn_detached(&self) -> std::io::Result<()> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .map(|_| ())
    }
}

/// Schedules a new instance of the application.
pub trait Relauncher: Send + Sync {
    fn relaunch(&self, invocation: Invocation) -> Result<(), RestartError>;
}

/// Relauncher that only records the request. The [`RelaunchTicket`] taken
/// from it starts the process later.
#[derive(Debug, Clone, Default)]
pub struct DeferredRelauncher {
    slot: Arc<Mutex<Option<Invocation>>>,
}

impl DeferredRelauncher {
    pub fn ticket(&self) -> RelaunchTicket {
        RelaunchTicket {
            slot: self.slot.clone(),
        }
    }
}

impl Relauncher for DeferredRelauncher {
    fn relaunch(&self, invocation: Invocation) -> Result<(), RestartError> {
        log::info!("Relaunch of {:?} scheduled", invocation.program);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(invocation);
        Ok(())
    }
}

/// Handle held by the binary to perform a scheduled relaunch.
#[derive(Debug, Clone)]
pub struct RelaunchTicket {
    slot: Arc<Mutex<Option<Invocation>>>,
}

impl RelaunchTicket {
    /// Takes the scheduled invocation, if a restart was requested.
    pub fn take(&self) -> Option<Invocation> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Starts the scheduled relaunch. Must only be called once the UI event
    /// loop has exited. Returns whether a process was started.
    pub fn spawn_if_requested(&self) -> std::io::Result<bool> {
        match self.take() {
            Some(invocation) => {
                log::info!("Relaunching {:?}", invocation.program);
                invocation.spawn_detached()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Performs `restart` and `clearAndRestart`.
pub struct RestartCoordinator {
    store: Arc<Store>,
    relauncher: Arc<dyn Relauncher>,
    invocation: Invocation,
    tx: mpsc::Sender<MessageFromBackend>,
}

impl RestartCoordinator {
    pub fn new(
        store: Arc<Store>,
        relauncher: Arc<dyn Relauncher>,
        invocation: Invocation,
        tx: mpsc::Sender<MessageFromBackend>,
    ) -> Self {
        Self {
            store,
            relauncher,
            invocation,
            tx,
        }
    }

    /// Flushes the store, schedules the relaunch and asks the UI loop to end.
    ///
    /// Nothing is scheduled when the flush fails.
    pub async fn restart(&self) -> Result<(), RestartError> {
        self.store.flush().await?;
        self.relauncher.relaunch(self.invocation.clone())?;
        if self
            .tx
            .send(MessageFromBackend::ShutdownRequested)
            .await
            .is_err()
        {
            log::warn!("Frontend is gone, nothing to shut down");
        }
        Ok(())
    }

    /// Erases the session, then restarts.
    pub async fn reset_and_restart(&self) -> Result<(), RestartError> {
        self.store.clear().await?;
        self.restart().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use jellyplayer_bridge::session::SessionKey;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingRelauncher {
        pub invocations: Mutex<Vec<Invocation>>,
    }

    impl Relauncher for RecordingRelauncher {
        fn relaunch(&self, invocation: Invocation) -> Result<(), RestartError> {
            self.invocations.lock().unwrap().push(invocation);
            Ok(())
        }
    }

    pub(crate) fn invocation() -> Invocation {
        Invocation {
            program: PathBuf::from("/opt/jellyplayer/jellyplayer"),
            args: vec![OsString::from("--fullscreen")],
        }
    }

    #[tokio::test]
    async fn restart_relaunches_then_requests_shutdown() {
        let store = Arc::new(Store::in_memory());
        let relauncher = Arc::new(RecordingRelauncher::default());
        let (tx, mut rx) = mpsc::channel(4);
        let coordinator =
            RestartCoordinator::new(store, relauncher.clone(), invocation(), tx);

        coordinator.restart().await.unwrap();

        assert_eq!(*relauncher.invocations.lock().unwrap(), vec![invocation()]);
        assert!(matches!(
            rx.recv().await,
            Some(MessageFromBackend::ShutdownRequested)
        ));
    }

    #[tokio::test]
    async fn reset_erases_the_session_before_restarting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let store = Arc::new(Store::open(&path).await.unwrap());
        store
            .set(SessionKey::Server, "http://media.local:8096")
            .await
            .unwrap();
        store.set(SessionKey::ServerReachable, true).await.unwrap();

        let relauncher = Arc::new(RecordingRelauncher::default());
        let (tx, _rx) = mpsc::channel(4);
        let coordinator =
            RestartCoordinator::new(store.clone(), relauncher.clone(), invocation(), tx);

        coordinator.reset_and_restart().await.unwrap();

        assert_eq!(relauncher.invocations.lock().unwrap().len(), 1);
        let reopened = Store::open(&path).await.unwrap();
        assert_eq!(reopened.get(SessionKey::Server).await, None);
        assert!(!reopened.get_bool(SessionKey::ServerReachable).await);
    }

    #[tokio::test]
    async fn restart_survives_a_missing_frontend() {
        let relauncher = Arc::new(RecordingRelauncher::default());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let coordinator = RestartCoordinator::new(
            Arc::new(Store::in_memory()),
            relauncher.clone(),
            invocation(),
            tx,
        );

        coordinator.restart().await.unwrap();
        assert_eq!(relauncher.invocations.lock().unwrap().len(), 1);
    }

    #[test]
    fn deferred_relaunch_is_handed_to_the_ticket_once() {
        let relauncher = DeferredRelauncher::default();
        let ticket = relauncher.ticket();
        assert_eq!(ticket.take(), None);

        relauncher.relaunch(invocation()).unwrap();
        assert_eq!(ticket.take(), Some(invocation()));
        assert_eq!(ticket.take(), None);
    }
}
