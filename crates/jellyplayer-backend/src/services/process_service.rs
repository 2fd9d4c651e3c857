use jellyplayer_bridge::BridgeValue;

use super::{AppContextHandle, CallResult};

/// Handles `restart`.
pub async fn handle_restart(context: AppContextHandle) -> CallResult {
    log::info!("Restart requested");
    context.state.restart.restart().await?;
    Ok(BridgeValue::Unit)
}

/// Handles `clearAndRestart`: forget the whole session, then restart.
pub async fn handle_clear_and_restart(context: AppContextHandle) -> CallResult {
    log::info!("Session reset requested");
    context.state.restart.reset_and_restart().await?;
    Ok(BridgeValue::Unit)
}
