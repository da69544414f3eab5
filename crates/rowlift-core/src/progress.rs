//! Progress reporting
//!
//! The pipeline emits coarse, discrete milestones, not a continuous stream.
//! Sinks are fire-and-forget: no acknowledgment, no ordering guarantee
//! beyond best-effort send order. The default implementation fans out over
//! a tokio broadcast channel so the transport layer (SSE, websockets) can
//! relay events to any number of subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

/// Percent published once the initial dispatch of a file has returned.
pub const PROGRESS_DISPATCHED: u8 = 30;

/// Percent published after master rows are inserted during promotion.
pub const PROGRESS_PROMOTED: u8 = 70;

/// Percent published after the upload fully completes.
pub const PROGRESS_COMPLETE: u8 = 100;

/// One discrete progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ProgressEvent {
    Percent(u8),
    Message(String),
}

/// Fire-and-forget milestone receiver.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Sink that drops every event; for callers that do not observe progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Broadcast-channel sink. Lossy: events published with no
/// subscribers (or to lagging subscribers) are discarded.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl ProgressSink for BroadcastSink {
    fn publish(&self, event: ProgressEvent) {
        // send only fails when there are no subscribers; that is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_delivers_in_order() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();

        sink.publish(ProgressEvent::Percent(30));
        sink.publish(ProgressEvent::Message("finished a.csv".to_string()));

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Percent(30));
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Message("finished a.csv".to_string())
        );
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let sink = BroadcastSink::new(1);
        sink.publish(ProgressEvent::Percent(100));
        NullSink.publish(ProgressEvent::Percent(100));
    }

    #[test]
    fn events_serialize_for_transport() {
        let json = serde_json::to_string(&ProgressEvent::Percent(70)).unwrap();
        assert_eq!(json, r#"{"type":"percent","value":70}"#);
    }
}
