//! Loopback HTTP endpoint the web view talks to.
//!
//! - `GET /bridge/version`: protocol version of the operation table.
//! - `POST /bridge/call`: one bridge call, `{"op": "...", "args": [...]}`.
//! - `GET /bridge/events`: websocket carrying backend events as JSON text.
//!
//! Browsers attach an `Origin` to both calls and websocket handshakes. Only
//! the web UI's own origin is served; requests without one come from native
//! clients on this machine.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use jellyplayer_bridge::{BRIDGE_PROTOCOL_VERSION, BridgeCall, BridgeFault, WireCall, WireReply};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::BackendBridge;
use crate::events::EventHub;

#[derive(Clone)]
pub struct ServerState {
    pub bridge: BackendBridge,
    pub events: EventHub,
    /// Origin of the web UI, `None` when no UI address is configured.
    pub ui_origin: Option<HeaderValue>,
}

impl ServerState {
    pub fn new(bridge: BackendBridge, events: EventHub, ui_url: Option<&str>) -> Self {
        let ui_origin = ui_url.and_then(origin_of).and_then(|origin| {
            HeaderValue::from_str(&origin)
                .map_err(|e| log::warn!("Ignoring unusable web UI origin {origin:?}: {e}"))
                .ok()
        });
        Self {
            bridge,
            events,
            ui_origin,
        }
    }

    fn admits(&self, headers: &HeaderMap) -> bool {
        match headers.get(header::ORIGIN) {
            None => true,
            Some(origin) => self.ui_origin.as_ref() == Some(origin),
        }
    }
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    protocol: u32,
}

/// Builds the bridge router. When the web UI origin is known, cross-origin
/// requests from that origin are allowed.
pub fn router(state: ServerState) -> Router {
    let cors = state.ui_origin.clone().map(|origin| {
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(Any)
    });
    let router = Router::new()
        .route("/bridge/version", get(version))
        .route("/bridge/call", post(call))
        .route("/bridge/events", get(events))
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// `scheme://host[:port]` part of `url`.
fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
    if scheme.is_empty() || authority.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{authority}"))
}

fn refuse(headers: &HeaderMap, what: &str) -> Response {
    log::warn!(
        "Refused {what} from origin {:?}",
        headers.get(header::ORIGIN)
    );
    StatusCode::FORBIDDEN.into_response()
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        protocol: BRIDGE_PROTOCOL_VERSION,
    })
}

async fn call(
    State(state): State<ServerState>,
    headers: HeaderMap,
    payload: Result<Json<WireCall>, JsonRejection>,
) -> Response {
    if !state.admits(&headers) {
        return refuse(&headers, "bridge call");
    }
    let reply = match payload {
        Ok(Json(wire)) => match BridgeCall::from_wire(wire) {
            Ok(call) => state.bridge.call(call).await,
            Err(fault) => Err(fault),
        },
        Err(rejection) => Err(BridgeFault::invalid_call(rejection.body_text())),
    };
    Json(WireReply::from(reply)).into_response()
}

async fn events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.admits(&headers) {
        return refuse(&headers, "event subscription");
    }
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| stream_events(socket, state.events)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn stream_events(socket: WebSocket, events: EventHub) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = events.subscribe();
    log::debug!("Web view subscribed to bridge events");

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Web view fell behind, skipped {skipped} event(s)");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    log::debug!("Web view event stream closed");
}
