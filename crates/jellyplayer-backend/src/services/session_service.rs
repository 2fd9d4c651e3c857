//! Reachability calls. Probes run as spawned tasks so the dispatch loop keeps
//! serving other calls while the network answers.
//!
//! Only the latest probe counts: starting one aborts the one in flight, whose
//! caller then gets a `Cancelled` fault. Store writes happen after the probe
//! task has finished, so an aborted probe never writes anything.

use jellyplayer_bridge::session::StartupDecision;
use jellyplayer_bridge::{BridgeFault, BridgeReply, BridgeValue, MessageFromBackend, ProbeState};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinError};

use super::{AppContextHandle, CallError};

/// Handles `resolveStartup`. Without a validated server there is nothing to
/// probe: the decision is answered directly and no probe events are sent.
pub async fn handle_resolve_startup(
    context: AppContextHandle,
    reply: oneshot::Sender<BridgeReply>,
) {
    let Some(candidate) = context.state.resolver.startup_candidate().await else {
        log::info!("Startup decision: {:?}", StartupDecision::NoServerConfigured);
        let _ = reply.send(Ok(BridgeValue::Startup(
            StartupDecision::NoServerConfigured,
        )));
        return;
    };

    let resolver = context.state.resolver.clone();
    let probe = tokio::spawn(async move { resolver.probe_startup(&candidate).await });
    begin_probe(&context, probe.abort_handle()).await;

    tokio::spawn(async move {
        let result = match probe.await {
            Ok(decision) => {
                log::info!("Startup decision: {decision:?}");
                let reachable = matches!(
                    decision,
                    StartupDecision::ServerReady | StartupDecision::OpenHomeReady
                );
                finish_probe(&context, reachable).await;
                Ok(BridgeValue::Startup(decision))
            }
            Err(e) => Err(abandoned(e)),
        };
        let _ = reply.send(result);
    });
}

/// Handles `validateAndCommitServer`.
pub async fn handle_validate_server(
    context: AppContextHandle,
    url: String,
    reply: oneshot::Sender<BridgeReply>,
) {
    let resolver = context.state.resolver.clone();
    let candidate = url.clone();
    let probe = tokio::spawn(async move { resolver.probe_server(&candidate).await });
    begin_probe(&context, probe.abort_handle()).await;

    tokio::spawn(async move {
        let result = match probe.await {
            Ok(outcome) => {
                let committed = context.state.resolver.commit_server(&url, outcome).await;
                finish_probe(&context, matches!(committed, Ok(true))).await;
                committed
                    .map(BridgeValue::Bool)
                    .map_err(|e| BridgeFault::from(CallError::from(e)))
            }
            Err(e) => Err(abandoned(e)),
        };
        let _ = reply.send(result);
    });
}

/// Records `probe` as the one in flight, superseding the previous one.
async fn begin_probe(context: &AppContextHandle, probe: AbortHandle) {
    let previous = context
        .state
        .active_probe
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .replace(probe);

    if let Some(previous) = previous {
        if !previous.is_finished() {
            log::debug!("Superseding the reachability probe in flight");
            previous.abort();
            context
                .send(MessageFromBackend::ProbeStateChanged(ProbeState::Cancelled))
                .await;
        }
    }
    context
        .send(MessageFromBackend::ProbeStateChanged(ProbeState::Pending))
        .await;
}

async fn finish_probe(context: &AppContextHandle, reachable: bool) {
    context
        .send(MessageFromBackend::ProbeStateChanged(ProbeState::Finished {
            reachable,
        }))
        .await;
}

fn abandoned(error: JoinError) -> BridgeFault {
    if error.is_cancelled() {
        BridgeFault::cancelled()
    } else {
        log::error!("Reachability probe panicked: {error}");
        BridgeFault::unavailable("reachability probe failed unexpectedly")
    }
}
