use jellyplayer_bridge::MessageFromBackend;
use tokio::sync::broadcast;

/// Fan-out of backend events to every connected web view.
///
/// Events are serialized once, on publish; subscribers receive the JSON text.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<String>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes `event`. Returns how many web views received it.
    pub fn publish(&self, event: &MessageFromBackend) -> usize {
        match serde_json::to_string(event) {
            Ok(json) => self.sender.send(json).unwrap_or(0),
            Err(e) => {
                log::error!("Failed to serialize backend event: {e}");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_tagged_json() {
        let hub = EventHub::default();
        assert_eq!(hub.publish(&MessageFromBackend::ShutdownRequested), 0);

        let mut subscriber = hub.subscribe();
        assert_eq!(
            hub.publish(&MessageFromBackend::LoginSurfaceVisibility { visible: false }),
            1
        );

        let json: serde_json::Value =
            serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
        assert_eq!(json["event"], "LoginSurfaceVisibility");
        assert_eq!(json["data"]["visible"], false);
    }
}
