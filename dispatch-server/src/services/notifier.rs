//! Notification emitter boundary
//!
//! The engine reports confirmed state changes here and moves on; transport
//! (email, push, websocket fan-out) is somebody else's job behind
//! `subscribe()`. Emission is fire-and-forget: a failure to deliver never
//! rolls back the order mutation that triggered it.

use dashmap::DashMap;
use shared::message::{NotificationEvent, NotificationKind};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1024;

/// Sink for domain notifications
pub trait NotificationEmitter: Send + Sync {
    fn emit(&self, event: NotificationEvent);
}

/// Broadcast fan-out with per-kind monotonically increasing versions
///
/// Versions let a late subscriber detect how much it missed and trigger its
/// own full refresh instead of replaying events.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<NotificationEvent>,
    versions: DashMap<NotificationKind, u64>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            versions: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// Current version for a kind (0 if nothing emitted yet)
    pub fn version(&self, kind: NotificationKind) -> u64 {
        self.versions.get(&kind).map(|v| *v).unwrap_or(0)
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationEmitter for BroadcastNotifier {
    fn emit(&self, event: NotificationEvent) {
        let version = {
            let mut entry = self.versions.entry(event.kind).or_insert(0);
            *entry += 1;
            *entry
        };

        debug!(kind = ?event.kind, order_id = %event.order_id, version, "Emitting notification");
        // send() errs only when there are no subscribers; that's fine
        let _ = self.tx.send(event);
    }
}

/// Notifier that records everything for assertions
#[cfg(test)]
pub struct RecordingNotifier {
    pub events: parking_lot::Mutex<Vec<NotificationEvent>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }
}

#[cfg(test)]
impl NotificationEmitter for RecordingNotifier {
    fn emit(&self, event: NotificationEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::OrderStatus;

    #[tokio::test]
    async fn test_versions_increase_per_kind() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.emit(NotificationEvent::order_created("o1", "ch-1"));
        notifier.emit(NotificationEvent::order_created("o2", "ch-1"));
        notifier.emit(NotificationEvent::status_changed(
            "o1",
            "ch-1",
            OrderStatus::Pending,
            OrderStatus::Processing,
        ));

        assert_eq!(notifier.version(NotificationKind::OrderCreated), 2);
        assert_eq!(notifier.version(NotificationKind::StatusChanged), 1);
        assert_eq!(notifier.version(NotificationKind::DeliveryUpdate), 0);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.order_id, "o1");
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let notifier = BroadcastNotifier::new();
        notifier.emit(NotificationEvent::delivery_update("o1", "ch-1"));
        assert_eq!(notifier.version(NotificationKind::DeliveryUpdate), 1);
    }
}
