use jellyplayer_bridge::BridgeValue;

use super::{AppContextHandle, CallResult};

/// Handles `launchPlayer`. Runs as its own task, so a second launch arriving
/// mid-transition is answered (and rejected) right away.
pub async fn handle_launch_player(context: AppContextHandle, url: &str) -> CallResult {
    context.state.windows.launch_player(url).await?;
    let decode_mode = context.state.playback.lock().await.decode_mode();
    super::playback_service::warn_on_software_decoding(&context, decode_mode).await;
    Ok(BridgeValue::Unit)
}

pub async fn handle_close_player(context: AppContextHandle) -> CallResult {
    context.state.windows.close_player().await?;
    Ok(BridgeValue::Unit)
}

pub async fn handle_window_state(context: AppContextHandle) -> CallResult {
    Ok(BridgeValue::Window(context.state.windows.state()))
}
