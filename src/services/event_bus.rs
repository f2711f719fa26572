use tokio::sync::broadcast;

/// Everything that travels on the in-process bus. One tagged union instead of
/// stringly-typed actions, delivered to all current subscribers in publish
/// order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    LightUpdated { lux: f32 },
    ProximityUpdated { distance: f32 },
    ScreenSaverStarted,
    ScreenSaverStopped,
    TurnScreenOn,
    TurnScreenOff,
    SettingsChanged,
    EndScreensaver,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Publishes to all current subscribers, returning how many will see the
    /// event. A bus without subscribers is not an error.
    pub fn publish(&self, event: Event) -> usize {
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();

        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        let delivered = bus.publish(Event::LightUpdated { lux: 120.0 });
        assert_eq!(delivered, 2);

        assert_eq!(
            receiver1.recv().await.unwrap(),
            Event::LightUpdated { lux: 120.0 }
        );
        assert_eq!(
            receiver2.recv().await.unwrap(),
            Event::LightUpdated { lux: 120.0 }
        );
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(Event::ScreenSaverStarted);
        bus.publish(Event::TurnScreenOff);
        bus.publish(Event::ScreenSaverStopped);

        assert_eq!(receiver.recv().await.unwrap(), Event::ScreenSaverStarted);
        assert_eq!(receiver.recv().await.unwrap(), Event::TurnScreenOff);
        assert_eq!(receiver.recv().await.unwrap(), Event::ScreenSaverStopped);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Event::SettingsChanged), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
