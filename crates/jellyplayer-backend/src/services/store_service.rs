//! Direct session store access for the web UI.

use jellyplayer_bridge::BridgeValue;
use jellyplayer_bridge::session::SessionKey;

use super::{AppContextHandle, CallResult};

/// Handles `getAuthInfo`: the stored user name and secret, each `None` when
/// absent.
pub async fn handle_get_auth_info(context: AppContextHandle) -> CallResult {
    let store = &context.state.store;
    Ok(BridgeValue::AuthInfo(
        store.get_string(SessionKey::UserName).await,
        store.get_string(SessionKey::UserSecret).await,
    ))
}

/// Handles `setAuthInfo`. Storing credentials also enables skipping the
/// login form on the next launch.
pub async fn handle_set_auth_info(
    context: AppContextHandle,
    user_name: String,
    secret: &str,
) -> CallResult {
    let store = &context.state.store;
    store.set(SessionKey::UserName, user_name).await?;
    store.set(SessionKey::UserSecret, secret).await?;
    store.set(SessionKey::OpenHomeEnabled, true).await?;
    log::info!("Stored credentials, open home enabled");
    Ok(BridgeValue::Unit)
}

pub async fn handle_get_flag(context: AppContextHandle, key: &str) -> CallResult {
    Ok(BridgeValue::Bool(context.state.store.get_bool(key).await))
}

pub async fn handle_get_string(context: AppContextHandle, key: &str) -> CallResult {
    Ok(BridgeValue::Text(context.state.store.get_string(key).await))
}
