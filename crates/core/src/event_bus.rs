//! Event bus: trait for publishing accepted engagement events.
//!
//! The ingestor accepts an `Arc<dyn EventSink>` and publishes every accepted
//! event to it: the analytics aggregator, the ClickHouse exporter, or a
//! fan-out of both.

use crate::types::{Event, EventKind};
use parking_lot::Mutex;
use std::sync::Arc;

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event);
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<Event>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn publish(&self, event: &Event) {
        self.events
            .lock()
            .push(event.clone());
    }
}

/// Publishes every event to each inner sink in registration order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &Event) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Channel;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(kind: EventKind) -> Event {
        Event {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            channel: Channel::Email,
            kind,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            idempotency_key: Uuid::new_v4().to_string(),
            provider_message_id: None,
            detail: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.publish(&event(EventKind::Sent));
        sink.publish(&event(EventKind::Delivered));
        sink.publish(&event(EventKind::Delivered));

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.count_kind(EventKind::Delivered), 2);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = capture_sink();
        let b = capture_sink();
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.publish(&event(EventKind::Opened));

        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }
}
