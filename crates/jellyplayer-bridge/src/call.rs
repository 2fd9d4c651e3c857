//! The fixed operation table callable from the web UI, its wire form and its
//! typed results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::playback::PlaybackSnapshot;
use crate::session::StartupDecision;
use crate::window::WindowState;

/// One call from the operation table, with its arguments already typed.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCall {
    ResolveStartup,
    ValidateAndCommitServer { url: String },
    GetAuthInfo,
    SetAuthInfo { user_name: String, secret: Secret },
    GetFlag { key: String },
    GetString { key: String },
    ClearAndRestart,
    Restart,
    LaunchPlayer { url: String },
    ClosePlayer,
    Play { url: String },
    Pause,
    Resume,
    Stop,
    Seek { timestamp_seconds: f64 },
    QueryPosition,
    PlaybackState,
    WindowState,
}

impl BridgeCall {
    /// Operation name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCall::ResolveStartup => "resolveStartup",
            BridgeCall::ValidateAndCommitServer { .. } => "validateAndCommitServer",
            BridgeCall::GetAuthInfo => "getAuthInfo",
            BridgeCall::SetAuthInfo { .. } => "setAuthInfo",
            BridgeCall::GetFlag { .. } => "getFlag",
            BridgeCall::GetString { .. } => "getString",
            BridgeCall::ClearAndRestart => "clearAndRestart",
            BridgeCall::Restart => "restart",
            BridgeCall::LaunchPlayer { .. } => "launchPlayer",
            BridgeCall::ClosePlayer => "closePlayer",
            BridgeCall::Play { .. } => "play",
            BridgeCall::Pause => "pause",
            BridgeCall::Resume => "resume",
            BridgeCall::Stop => "stop",
            BridgeCall::Seek { .. } => "seek",
            BridgeCall::QueryPosition => "queryPosition",
            BridgeCall::PlaybackState => "playbackState",
            BridgeCall::WindowState => "windowState",
        }
    }

    /// Translates an untyped wire call into a typed one, checking the
    /// protocol version, the operation name and the argument list.
    pub fn from_wire(wire: WireCall) -> Result<Self, BridgeFault> {
        match wire.version {
            Some(version) if version != crate::BRIDGE_PROTOCOL_VERSION => {
                return Err(BridgeFault::invalid_call(format!(
                    "unsupported bridge protocol version {version}"
                )));
            }
            _ => {}
        }

        let mut args = Args::new(&wire.op, wire.args);
        let call = match wire.op.as_str() {
            "resolveStartup" => BridgeCall::ResolveStartup,
            "validateAndCommitServer" => BridgeCall::ValidateAndCommitServer {
                url: args.string()?,
            },
            "getAuthInfo" => BridgeCall::GetAuthInfo,
            "setAuthInfo" => BridgeCall::SetAuthInfo {
                user_name: args.string()?,
                secret: Secret(args.string()?),
            },
            "getFlag" => BridgeCall::GetFlag { key: args.string()? },
            "getString" => BridgeCall::GetString { key: args.string()? },
            "clearAndRestart" => BridgeCall::ClearAndRestart,
            "restart" => BridgeCall::Restart,
            "launchPlayer" => BridgeCall::LaunchPlayer { url: args.string()? },
            "closePlayer" => BridgeCall::ClosePlayer,
            "play" => BridgeCall::Play { url: args.string()? },
            "pause" => BridgeCall::Pause,
            "resume" => BridgeCall::Resume,
            "stop" => BridgeCall::Stop,
            "seek" => BridgeCall::Seek {
                timestamp_seconds: args.number()?,
            },
            "queryPosition" => BridgeCall::QueryPosition,
            "playbackState" => BridgeCall::PlaybackState,
            "windowState" => BridgeCall::WindowState,
            other => {
                return Err(BridgeFault::invalid_call(format!(
                    "unknown operation `{other}`"
                )));
            }
        };
        args.finish()?;
        Ok(call)
    }
}

/// Credential passed through the bridge. Never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// A call as the web UI sends it: an operation name and positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCall {
    pub op: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Protocol version the caller was written against, if it states one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Positional argument reader that reports arity and type mismatches.
struct Args<'a> {
    op: &'a str,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl<'a> Args<'a> {
    fn new(op: &'a str, values: Vec<Value>) -> Self {
        Self {
            op,
            values: values.into_iter(),
            position: 0,
        }
    }

    fn next(&mut self, expected: &str) -> Result<Value, BridgeFault> {
        self.position += 1;
        self.values.next().ok_or_else(|| {
            BridgeFault::invalid_call(format!(
                "`{}` expects {expected} as argument {}",
                self.op, self.position
            ))
        })
    }

    fn string(&mut self) -> Result<String, BridgeFault> {
        match self.next("a string")? {
            Value::String(value) => Ok(value),
            other => Err(self.mismatch("a string", &other)),
        }
    }

    fn number(&mut self) -> Result<f64, BridgeFault> {
        match self.next("a number")? {
            Value::Number(value) => value
                .as_f64()
                .ok_or_else(|| self.mismatch("a number", &Value::Number(value))),
            other => Err(self.mismatch("a number", &other)),
        }
    }

    fn mismatch(&self, expected: &str, got: &Value) -> BridgeFault {
        BridgeFault::invalid_call(format!(
            "`{}` expects {expected} as argument {}, got {got}",
            self.op, self.position
        ))
    }

    fn finish(mut self) -> Result<(), BridgeFault> {
        let extra = self.values.by_ref().count();
        if extra > 0 {
            return Err(BridgeFault::invalid_call(format!(
                "`{}` got {extra} unexpected extra argument(s)",
                self.op
            )));
        }
        Ok(())
    }
}

/// Typed result of a successful call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BridgeValue {
    /// Void result.
    Unit,
    Bool(bool),
    /// A string read from the store; `None` when the key is absent.
    Text(Option<String>),
    Number(f64),
    Startup(StartupDecision),
    /// `(userName, userSecret)`, each absent when never stored.
    AuthInfo(Option<String>, Option<String>),
    Playback(PlaybackSnapshot),
    Window(WindowState),
}

/// The kinds of failure that may cross the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// A reachability probe failed (timeout, connection, unexpected body).
    ProbeFailure,
    /// Neither the hardware nor the software decode path could be started.
    EngineInitFailure,
    /// The operation is not valid in the current state.
    InvalidTransition,
    /// Unknown operation, wrong arguments or unsupported protocol version.
    InvalidCall,
    /// The request was superseded or dropped before it produced a result.
    Cancelled,
    /// The backend could not serve the request (gone, or storage failed).
    Unavailable,
}

/// Sentinel failure value returned instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BridgeFault {
    pub kind: FaultKind,
    pub message: String,
}

impl BridgeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_call(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidCall, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FaultKind::Cancelled, "request was cancelled")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Unavailable, message)
    }
}

/// Reply to one bridge call.
pub type BridgeReply = Result<BridgeValue, BridgeFault>;

/// JSON form of a reply: `{"ok": value}` or `{"error": {"kind", "message"}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireReply {
    Ok(BridgeValue),
    Error(BridgeFault),
}

impl From<BridgeReply> for WireReply {
    fn from(reply: BridgeReply) -> Self {
        match reply {
            Ok(value) => WireReply::Ok(value),
            Err(fault) => WireReply::Error(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn wire(value: Value) -> WireCall {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_positional_arguments() {
        let call = BridgeCall::from_wire(wire(json!({
            "op": "setAuthInfo",
            "args": ["alice", "hunter2"],
        })))
        .unwrap();
        assert_eq!(
            call,
            BridgeCall::SetAuthInfo {
                user_name: "alice".into(),
                secret: Secret::new("hunter2"),
            }
        );

        let call = BridgeCall::from_wire(wire(json!({"op": "seek", "args": [42]}))).unwrap();
        assert_eq!(
            call,
            BridgeCall::Seek {
                timestamp_seconds: 42.0
            }
        );
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let call = BridgeCall::SetAuthInfo {
            user_name: "alice".into(),
            secret: Secret::new("hunter2"),
        };
        let printed = format!("{call:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn missing_args_field_means_no_arguments() {
        let call = BridgeCall::from_wire(wire(json!({"op": "resolveStartup"}))).unwrap();
        assert_eq!(call, BridgeCall::ResolveStartup);
        assert_eq!(call.name(), "resolveStartup");
    }

    #[test]
    fn rejects_unknown_operations_and_bad_arity() {
        let fault = BridgeCall::from_wire(wire(json!({"op": "format"}))).unwrap_err();
        assert_eq!(fault.kind, FaultKind::InvalidCall);

        let fault = BridgeCall::from_wire(wire(json!({"op": "play"}))).unwrap_err();
        assert_eq!(fault.kind, FaultKind::InvalidCall);

        let fault =
            BridgeCall::from_wire(wire(json!({"op": "pause", "args": [true]}))).unwrap_err();
        assert_eq!(fault.kind, FaultKind::InvalidCall);
    }

    #[test]
    fn rejects_wrong_argument_types() {
        let fault =
            BridgeCall::from_wire(wire(json!({"op": "seek", "args": ["ten"]}))).unwrap_err();
        assert_eq!(fault.kind, FaultKind::InvalidCall);
        assert!(fault.message.contains("a number"));
    }

    #[test]
    fn rejects_other_protocol_versions() {
        let fault = BridgeCall::from_wire(wire(json!({"op": "stop", "version": 7}))).unwrap_err();
        assert_eq!(fault.kind, FaultKind::InvalidCall);

        let call = BridgeCall::from_wire(wire(json!({"op": "stop", "version": 1}))).unwrap();
        assert_eq!(call, BridgeCall::Stop);
    }

    #[test]
    fn replies_have_ok_or_error_shape() {
        let ok = serde_json::to_value(WireReply::from(Ok(BridgeValue::AuthInfo(
            Some("alice".into()),
            None,
        ))))
        .unwrap();
        assert_eq!(ok, json!({"ok": ["alice", null]}));

        let unit = serde_json::to_value(WireReply::from(Ok(BridgeValue::Unit))).unwrap();
        assert_eq!(unit, json!({"ok": null}));

        let error =
            serde_json::to_value(WireReply::from(Err(BridgeFault::cancelled()))).unwrap();
        assert_eq!(error["error"]["kind"], "Cancelled");
    }
}
