use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Projector feeds, one broadcast hub per session access code.
pub struct ProjectorHubs {
    hubs: DashMap<String, SseHub>,
    capacity: usize,
}

impl ProjectorHubs {
    /// Hubs whose channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Hub of `code`, created on first use.
    pub fn hub(&self, code: &str) -> SseHub {
        self.hubs
            .entry(code.to_owned())
            .or_insert_with(|| SseHub::new(self.capacity))
            .clone()
    }

    /// Send to the projectors of `code`. Sessions nobody watches are skipped.
    pub fn publish(&self, code: &str, event: ServerEvent) {
        if let Some(hub) = self.hubs.get(code) {
            hub.broadcast(event);
        }
    }

    /// Drop the hub of `code` once its last subscriber is gone.
    pub fn release(&self, code: &str) {
        self.hubs
            .remove_if(code, |_, hub| hub.sender.receiver_count() == 0);
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
#[derive(Clone)]
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feeds_do_not_leak_across_sessions() {
        let hubs = ProjectorHubs::new(8);
        let mut abc = hubs.hub("ABC").subscribe();
        let mut xyz = hubs.hub("XYZ").subscribe();

        hubs.publish("ABC", ServerEvent::new(Some("projection".into()), "{}".into()));

        assert_eq!(abc.recv().await.unwrap().event.as_deref(), Some("projection"));
        assert!(xyz.try_recv().is_err());
    }

    #[test]
    fn release_keeps_watched_hubs() {
        let hubs = ProjectorHubs::new(8);
        let receiver = hubs.hub("ABC").subscribe();
        hubs.release("ABC");
        assert!(hubs.hubs.contains_key("ABC"));

        drop(receiver);
        hubs.release("ABC");
        assert!(!hubs.hubs.contains_key("ABC"));
    }
}
