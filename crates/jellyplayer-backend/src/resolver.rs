//! Startup decision and server validation.
//!
//! The resolver combines the stored session flags with one live reachability
//! probe. A probe only succeeds when the server answers the health check with
//! the exact expected body; a server that is merely reachable is not trusted.

use std::sync::Arc;

use async_trait::async_trait;
use jellyplayer_bridge::config::ServerConfig;
use jellyplayer_bridge::session::{SessionKey, StartupDecision};
use reqwest::Url;

use crate::store::{Store, StoreError};

/// Why a probe did not confirm the server. Never fatal: the resolver turns
/// every variant into a startup decision or a `false` result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("probe timed out")]
    Timeout,
    #[error("invalid server address: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("response does not identify the expected service")]
    UnexpectedBody,
}

/// A bounded check that `server_url` is the expected service.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, server_url: &str) -> Result<(), ProbeFailure>;
}

/// Probe issuing `GET {server}{health_check_path}` over HTTP.
pub struct HttpProbe {
    client: reqwest::Client,
    config: ServerConfig,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, config: ServerConfig) -> Self {
        Self { client, config }
    }

    /// Builds the health check address for `server_url`.
    fn ping_url(&self, server_url: &str) -> Result<Url, ProbeFailure> {
        let base = server_url.trim().trim_end_matches('/');
        let url = Url::parse(&format!("{base}{}", self.config.health_check_path))
            .map_err(|e| ProbeFailure::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ProbeFailure::InvalidUrl(format!(
                "unsupported scheme `{scheme}`"
            ))),
        }
    }
}

fn classify_request_error(error: reqwest::Error) -> ProbeFailure {
    if error.is_timeout() {
        ProbeFailure::Timeout
    } else {
        ProbeFailure::Connection(error.without_url().to_string())
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self, server_url: &str) -> Result<(), ProbeFailure> {
        let url = self.ping_url(server_url)?;
        log::debug!("Probing {url}");

        let response = self
            .client
            .get(url)
            .timeout(self.config.probe_timeout())
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify_request_error)?;
        if body.as_ref() == self.config.expected_ping_body.as_bytes() {
            Ok(())
        } else {
            Err(ProbeFailure::UnexpectedBody)
        }
    }
}

/// Session fields a startup probe depends on, read before probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupCandidate {
    pub server_url: String,
    pub open_home_enabled: bool,
}

/// Decides the startup state and commits validated server addresses.
///
/// Holds no copy of the session: every call reads the store again.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<Store>,
    probe: Arc<dyn ReachabilityProbe>,
}

impl SessionResolver {
    pub fn new(store: Arc<Store>, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { store, probe }
    }

    /// Classifies the startup state. Reads the store, never writes it.
    pub async fn resolve_startup(&self) -> StartupDecision {
        match self.startup_candidate().await {
            Some(candidate) => self.probe_startup(&candidate).await,
            None => StartupDecision::NoServerConfigured,
        }
    }

    /// The validated server startup has to probe, `None` when there is
    /// nothing to probe and startup goes straight to `NoServerConfigured`.
    pub async fn startup_candidate(&self) -> Option<StartupCandidate> {
        let record = self.store.session_record().await;
        record.server_reachable.then(|| StartupCandidate {
            server_url: record.server_url.unwrap_or_default(),
            open_home_enabled: record.open_home_enabled,
        })
    }

    /// Probe half of [`Self::resolve_startup`].
    pub async fn probe_startup(&self, candidate: &StartupCandidate) -> StartupDecision {
        match self.probe.probe(&candidate.server_url).await {
            Err(failure) => {
                log::warn!("Stored server is unreachable: {failure}");
                StartupDecision::ServerUnreachable
            }
            Ok(()) if candidate.open_home_enabled => StartupDecision::OpenHomeReady,
            Ok(()) => StartupDecision::ServerReady,
        }
    }

    /// Probes `candidate_url` and remembers it only if the probe succeeds.
    ///
    /// A failed probe records `serverReachable=false` and leaves any
    /// previously committed address untouched.
    pub async fn validate_and_commit_server(
        &self,
        candidate_url: &str,
    ) -> Result<bool, StoreError> {
        let outcome = self.probe_server(candidate_url).await;
        self.commit_server(candidate_url, outcome).await
    }

    /// Probe half of [`Self::validate_and_commit_server`]. Touches nothing.
    pub async fn probe_server(&self, candidate_url: &str) -> Result<(), ProbeFailure> {
        self.probe.probe(candidate_url).await
    }

    /// Commit half of [`Self::validate_and_commit_server`].
    pub async fn commit_server(
        &self,
        candidate_url: &str,
        outcome: Result<(), ProbeFailure>,
    ) -> Result<bool, StoreError> {
        match outcome {
            Ok(()) => {
                log::info!("Committing server {candidate_url}");
                self.store.set(SessionKey::Server, candidate_url).await?;
                self.store.set(SessionKey::ServerReachable, true).await?;
                Ok(true)
            }
            Err(failure) => {
                log::info!("Rejected server {candidate_url}: {failure}");
                self.store.set(SessionKey::ServerReachable, false).await?;
                Ok(false)
            }
        }
    }
}
