//! Command bridge between the web view host and the native backend.
//!
//! This crate defines the types and protocols used to connect the sandboxed
//! web UI (through its frontend host) with the asynchronous backend that owns
//! the session store, the reachability resolver, the playback engine and the
//! window surfaces.
//!
//! The design mirrors a request/response gateway with a side channel:
//! - The frontend sends [`BridgeCall`]s, each carrying a one-shot reply
//!   channel, so every call from the UI gets exactly one typed answer.
//! - The backend pushes events (playback transitions, probe progress, window
//!   changes, notifications) that are not answers to a specific call.
//!
//! Communication happens over bounded [`tokio::sync::mpsc`] channels wrapped
//! in [`BridgeChannels`].

pub mod call;
pub mod config;
pub mod notification;
pub mod playback;
pub mod session;
pub mod window;

use serde::Serialize;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;

pub use call::{
    BridgeCall, BridgeFault, BridgeReply, BridgeValue, FaultKind, Secret, WireCall, WireReply,
};

/// Version of the operation table exposed to the web UI. Calls that name a
/// different version are rejected before dispatch.
pub const BRIDGE_PROTOCOL_VERSION: u32 = 1;

/// Progress of a reachability probe started by a bridge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state")]
pub enum ProbeState {
    /// A probe is in flight; the UI should render a pending indicator.
    Pending,
    /// The probe completed; `reachable` is the classified outcome.
    Finished { reachable: bool },
    /// The probe was superseded by a newer one and its result discarded.
    Cancelled,
}

/// Messages emitted by the backend to inform the frontend of state updates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum MessageFromBackend {
    /// Generic message for all notifications in the application.
    NotificationMessage(notification::NotificationMessage),
    /// Response to the configuration request from the frontend.
    ConfigurationResponse(config::Config),
    /// The playback controller changed state.
    PlaybackStateChanged(playback::PlaybackSnapshot),
    /// A reachability probe changed state.
    ProbeStateChanged(ProbeState),
    /// The window lifecycle manager reached a new steady state.
    WindowStateChanged(window::WindowState),
    /// The login surface (the web view itself) must be shown or hidden.
    LoginSurfaceVisibility { visible: bool },
    /// The backend asks the UI event loop to terminate (restart or reset).
    ShutdownRequested,
}

/// Commands issued by the frontend to control or query the backend.
#[derive(Debug)]
pub enum MessageToBackend {
    /// Request for the application configuration.
    ConfigurationRequest,
    /// One operation from the bridge table, answered through `reply`.
    Call {
        call: BridgeCall,
        reply: oneshot::Sender<BridgeReply>,
    },
}

/// Paired `tokio::mpsc` channels for bidirectional communication between
/// frontend and backend.
pub struct BridgeChannels {
    /// Receiver used by the frontend to get messages from the backend.
    pub frontend_rx: Receiver<MessageFromBackend>,
    /// Sender used by the frontend to send commands to the backend.
    pub frontend_tx: Sender<MessageToBackend>,

    /// Receiver used by the backend to get commands from the frontend.
    pub backend_rx: Receiver<MessageToBackend>,
    /// Sender used by the backend to send events/responses to the frontend.
    pub backend_tx: Sender<MessageFromBackend>,
}

impl BridgeChannels {
    /// Creates a new pair of bridged channels with the given buffer capacity.
    pub fn new(buffer: usize) -> Self {
        let (to_backend_tx, to_backend_rx) = mpsc::channel(buffer);
        let (to_frontend_tx, to_frontend_rx) = mpsc::channel(buffer);
        Self {
            frontend_tx: to_backend_tx,
            frontend_rx: to_frontend_rx,
            backend_rx: to_backend_rx,
            backend_tx: to_frontend_tx,
        }
    }
}

impl Default for BridgeChannels {
    fn default() -> Self {
        Self::new(64)
    }
}
