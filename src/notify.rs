use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub, one channel per center. Every committed mutation is
/// published here at least once; downstream consumers (reminder dispatch,
/// sync feeds) must be idempotent.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to one center's events. Creates the channel if needed.
    pub fn subscribe(&self, center_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(center_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, center_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&center_id) {
            let _ = sender.send(event.clone());
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;

    fn schedule_event(center_id: Ulid) -> Event {
        Event::SchedulePublished {
            schedule: StaffSchedule {
                center_id,
                date: NaiveDate::from_ymd_opt(2026, 4, 7).unwrap(),
                closed: false,
                entries: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let center = Ulid::new();
        let mut rx = hub.subscribe(center);

        let event = schedule_event(center);
        hub.send(center, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let center = Ulid::new();
        hub.send(center, &schedule_event(center));
    }

    #[tokio::test]
    async fn channels_are_per_center() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, &schedule_event(b));
        assert!(rx_a.try_recv().is_err());
    }
}
