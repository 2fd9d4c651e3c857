use serde::{Deserialize, Serialize};

/// What the UI should show first after launch.
///
/// Computed fresh on every launch from the stored session flags and one live
/// probe; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupDecision {
    /// No server was ever validated; show the server entry form.
    NoServerConfigured,
    /// A server was validated before but does not answer the probe now.
    ServerUnreachable,
    /// The stored server answers; show the login form.
    ServerReady,
    /// The stored server answers and stored credentials skip the login form.
    OpenHomeReady,
}

/// Keys of the persisted session schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Server,
    ServerReachable,
    UserName,
    UserSecret,
    OpenHomeEnabled,
}

impl SessionKey {
    pub const ALL: [SessionKey; 5] = [
        SessionKey::Server,
        SessionKey::ServerReachable,
        SessionKey::UserName,
        SessionKey::UserSecret,
        SessionKey::OpenHomeEnabled,
    ];

    /// Key name in the store. These names are shared with the web UI.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKey::Server => "server",
            SessionKey::ServerReachable => "serverReachable",
            SessionKey::UserName => "UserName",
            SessionKey::UserSecret => "UserSecret",
            SessionKey::OpenHomeEnabled => "openHomeEnabled",
        }
    }

    /// Whether values under this key must never reach the logs.
    pub fn is_secret(self) -> bool {
        matches!(self, SessionKey::UserSecret)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Typed view of the persisted session attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub server_url: Option<String>,
    pub server_reachable: bool,
    pub user_name: Option<String>,
    pub user_secret: Option<String>,
    pub open_home_enabled: bool,
}
