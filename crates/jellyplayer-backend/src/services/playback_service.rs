//! Playback calls. Every handler goes through the single controller, and
//! none holds it for longer than one engine command.

use jellyplayer_bridge::notification::NotificationType;
use jellyplayer_bridge::{BridgeReply, BridgeValue};
use tokio::sync::oneshot;

use super::{AppContextHandle, CallError, CallResult};
use crate::playback::DecodeMode;

/// Handles `play`. The controller is `Loading` before the next call is
/// dispatched; waiting for the media runs as its own task, so calls arriving
/// meanwhile (`stop` included) are served right away.
pub async fn handle_play(
    context: AppContextHandle,
    url: String,
    reply: oneshot::Sender<BridgeReply>,
) {
    let pending = context.state.playback.lock().await.begin_play(&url);
    let pending = match pending {
        Ok(pending) => pending,
        Err(e) => {
            log::warn!("Bridge call failed: {e}");
            let _ = reply.send(Err(CallError::from(e).into()));
            return;
        }
    };

    tokio::spawn(async move {
        let outcome = pending.run().await;
        let decode_mode = {
            let mut playback = context.state.playback.lock().await;
            playback
                .finish_play(outcome)
                .await
                .map(|()| playback.decode_mode())
        };
        let result = match decode_mode {
            Ok(decode_mode) => {
                warn_on_software_decoding(&context, decode_mode).await;
                Ok(BridgeValue::Unit)
            }
            Err(e) => {
                log::warn!("Playing {url} failed: {e}");
                Err(CallError::from(e).into())
            }
        };
        let _ = reply.send(result);
    });
}

pub async fn handle_pause(context: AppContextHandle) -> CallResult {
    context.state.playback.lock().await.pause().await?;
    Ok(BridgeValue::Unit)
}

pub async fn handle_resume(context: AppContextHandle) -> CallResult {
    context.state.playback.lock().await.resume().await?;
    Ok(BridgeValue::Unit)
}

pub async fn handle_stop(context: AppContextHandle) -> CallResult {
    context.state.playback.lock().await.stop().await?;
    Ok(BridgeValue::Unit)
}

pub async fn handle_seek(context: AppContextHandle, timestamp_seconds: f64) -> CallResult {
    context
        .state
        .playback
        .lock()
        .await
        .seek(timestamp_seconds)
        .await?;
    Ok(BridgeValue::Unit)
}

pub async fn handle_query_position(context: AppContextHandle) -> CallResult {
    let position = context.state.playback.lock().await.query_position().await?;
    Ok(BridgeValue::Number(position))
}

pub async fn handle_playback_state(context: AppContextHandle) -> CallResult {
    Ok(BridgeValue::Playback(
        context.state.playback.lock().await.snapshot(),
    ))
}

/// Lets the user know playback runs without hardware acceleration.
pub(crate) async fn warn_on_software_decoding(
    context: &AppContextHandle,
    decode_mode: Option<DecodeMode>,
) {
    if decode_mode == Some(DecodeMode::Software) {
        context
            .send_notification(
                NotificationType::Warning,
                "Hardware decoding is unavailable, playing with software decoding",
            )
            .await;
    }
}
