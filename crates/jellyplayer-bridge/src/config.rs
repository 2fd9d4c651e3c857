use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health check contract with the media server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path appended to the server address for the reachability probe.
    pub health_check_path: String,
    /// Exact response body identifying the expected service, JSON quotes
    /// included.
    pub expected_ping_body: String,
    /// Upper bound for one probe, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl ServerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            health_check_path: "/System/Ping".to_string(),
            expected_ping_body: "\"Jellyfin Server\"".to_string(),
            probe_timeout_ms: 5_000,
        }
    }
}

/// Settings for the native media engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Engine executable, looked up in `PATH` unless absolute.
    pub engine_binary: String,
    /// Hardware decoder requested first (`auto`, `nvdec`, `vaapi`, ...).
    pub hardware_decoder: String,
    /// GPU context for the video output, engine default when unset.
    pub gpu_context: Option<String>,
    /// How long to wait for the engine to report a loaded file.
    pub ready_timeout_ms: u64,
    /// Upper bound for a position query.
    pub position_query_timeout_ms: u64,
    /// Log level passed to the engine (`error`, `warn`, `info`, `debug`).
    pub engine_log_level: String,
}

impl PlayerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn position_query_timeout(&self) -> Duration {
        Duration::from_millis(self.position_query_timeout_ms)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            engine_binary: "mpv".to_string(),
            hardware_decoder: "auto".to_string(),
            gpu_context: None,
            ready_timeout_ms: 15_000,
            position_query_timeout_ms: 250,
            engine_log_level: "warn".to_string(),
        }
    }
}

/// Loopback endpoint the web view talks to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub listen_addr: SocketAddr,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9300)),
        }
    }
}

/// The web UI and the processes that serve and host it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UiConfig {
    /// Address of the web UI loaded into the web view.
    pub url: Option<String>,
    /// Command serving the web UI (program followed by its arguments).
    pub server_command: Option<Vec<String>>,
    /// Command hosting the web view. Receives `JELLYPLAYER_UI_URL` and
    /// `JELLYPLAYER_BRIDGE_URL` in its environment.
    pub host_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Global application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub player: PlayerConfig,
    pub bridge: BridgeConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}
