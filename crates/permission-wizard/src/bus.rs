use tokio::sync::broadcast;

use crate::event::UIEvent;

/// In-process fan-out of [`UIEvent`]s. Publishing never waits on consumers.
#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<UIEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UIEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: UIEvent) -> Result<usize, broadcast::error::SendError<UIEvent>> {
        self.sender.send(event)
    }

    /// Publishes and drops the event if nobody is listening.
    pub fn emit(&self, event: UIEvent) {
        if let Err(error) = self.publish(event) {
            tracing::debug!("ui event {:?} dropped: no subscribers", error.0.event_type);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::UIEventType;
    use crate::permission::PermissionId;
    use tokio::time::{timeout, Duration};

    fn test_event() -> UIEvent {
        UIEvent::for_permission(
            UIEventType::PermissionRequested,
            PermissionId::ScreenCapture,
            serde_json::json!({ "attempt": 1 }),
        )
    }

    #[tokio::test]
    async fn publish_and_receive_event() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(test_event());

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert_eq!(received.event_type, UIEventType::PermissionRequested);
        assert_eq!(received.permission, Some(PermissionId::ScreenCapture));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_event() {
        let bus = Bus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(test_event());

        let event1 = rx1.recv().await.expect("recv1");
        let event2 = rx2.recv().await.expect("recv2");
        assert_eq!(event1.id, event2.id);
    }

    #[test]
    fn emit_without_subscribers_does_not_fail() {
        let bus = Bus::new(8);
        bus.emit(test_event());
        assert!(bus.publish(test_event()).is_err());
    }

    #[test]
    fn event_serializes_type_field() {
        let value = serde_json::to_value(test_event()).expect("serialize");
        assert_eq!(value["type"], "permission_requested");
        assert_eq!(value["permission"], "screen_capture");
        let wizard = serde_json::to_value(UIEvent::wizard(
            UIEventType::WizardCompleted,
            serde_json::json!({}),
        ))
        .expect("serialize");
        assert!(wizard.get("permission").is_none());
    }
}
