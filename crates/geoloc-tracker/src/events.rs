//! Event bus for zone and lifecycle events

use geoloc_core::Event;

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcasts events to live subscribers and keeps a bounded history for
/// late readers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Arc<RwLock<VecDeque<Event>>>,
    max_history: usize,
    event_count: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize, max_history: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history))),
            max_history,
            event_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: Event) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let total = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.sender.send(event);

        debug!("Event published, total: {}", total);
    }

    /// Most recent `count` events, oldest first
    pub fn get_recent(&self, count: usize) -> Vec<Event> {
        let history = self.history.read();
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    pub fn get_event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoloc_core::{EventType, GeoPoint, Zone};

    fn zone_event(id: u64) -> Event {
        Event::zone_created(Zone::new(id, &GeoPoint::new(45.0, 7.0)), id)
    }

    #[test]
    fn test_event_bus_creation() {
        let bus = EventBus::default();
        assert_eq!(bus.get_event_count(), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_history_is_bounded() {
        let bus = EventBus::new(16, 3);
        for i in 1..=5 {
            bus.publish(zone_event(i));
        }

        assert_eq!(bus.get_event_count(), 5);
        let recent = bus.get_recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].zone().map(|z| z.id), Some(3));
        assert_eq!(recent[2].zone().map(|z| z.id), Some(5));
    }

    #[tokio::test]
    async fn test_subscription() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(zone_event(1));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type, EventType::ZoneCreated);
    }
}
