//! Broadcaster for structural-change events.
//!
//! Uses tokio's broadcast channel so that every schema service subscribed to
//! a model registry observes every change.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{StructuralChange, StructuralChangeKind};

/// Default buffer size for the broadcast channel.
/// Slow receivers lag past this and must treat the lag as "everything changed".
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Multi-subscriber sender of [`StructuralChange`] events.
///
/// # Example
///
/// ```
/// use modelql_core::events::{ChangeBroadcaster, StructuralChangeKind};
///
/// let broadcaster = ChangeBroadcaster::new();
/// let mut receiver = broadcaster.subscribe();
///
/// broadcaster.notify("Invoice", StructuralChangeKind::FieldsChanged);
/// let event = receiver.try_recv().unwrap();
/// assert_eq!(event.entity, "Invoice");
/// ```
#[derive(Clone)]
pub struct ChangeBroadcaster {
    sender: broadcast::Sender<StructuralChange>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Sends an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it (0 when nobody listens).
    pub fn send(&self, event: StructuralChange) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Builds and sends an event for `entity`.
    pub fn notify(&self, entity: impl Into<String>, kind: StructuralChangeKind) -> usize {
        self.send(StructuralChange::new(entity, kind))
    }

    /// Subscribes to events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StructuralChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = ChangeBroadcaster::new();
        assert_eq!(
            broadcaster.notify("Invoice", StructuralChangeKind::EntityAdded),
            0
        );
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let broadcaster = ChangeBroadcaster::new();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        let delivered = broadcaster.notify("Client", StructuralChangeKind::RelationshipsChanged);
        assert_eq!(delivered, 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.entity, "Client");
        assert_eq!(e2.kind, StructuralChangeKind::RelationshipsChanged);
    }
}
