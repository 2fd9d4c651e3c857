/// Handles an incoming configuration request (see
/// [`jellyplayer_bridge::MessageToBackend::ConfigurationRequest`]).
pub async fn handle_config_request(context: super::AppContextHandle) {
    let config = context.state.config.clone();
    context
        .send(jellyplayer_bridge::MessageFromBackend::ConfigurationResponse(
            config,
        ))
        .await;
}
