use crate::model::BridgeEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Payloads queued per socket before new ones are dropped for that socket.
pub const MAILBOX_CAPACITY: usize = 256;

pub type SocketId = Uuid;

/// Serialized event text shared by every recipient of one broadcast.
pub type Payload = Arc<str>;
pub type SocketMailbox = mpsc::Receiver<Payload>;

/// Set of downstream sockets. Each socket task owns the receiving end of its
/// mailbox; a closed mailbox means the socket is gone. A socket that stops
/// reading loses payloads once its mailbox is full.
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    sockets: Arc<Mutex<HashMap<SocketId, mpsc::Sender<Payload>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket under `id`. Registering an id twice keeps the first
    /// mailbox and returns `None`.
    pub fn register(&self, id: SocketId) -> Option<SocketMailbox> {
        let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
        if sockets.contains_key(&id) {
            return None;
        }
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        sockets.insert(id, tx);
        tracing::debug!(socket_id = %id, clients = sockets.len(), "downstream socket registered");
        Some(rx)
    }

    pub fn unregister(&self, id: &SocketId) {
        let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
        if sockets.remove(id).is_some() {
            tracing::debug!(socket_id = %id, clients = sockets.len(), "downstream socket unregistered");
        }
    }

    /// Serializes once and queues the payload on every open socket without
    /// waiting. Returns the number of sockets it was queued for.
    pub fn broadcast(&self, event: &BridgeEvent) -> usize {
        let payload: Payload = match serde_json::to_string(event) {
            Ok(text) => text.into(),
            Err(err) => {
                tracing::warn!(error = %err, event = event.name(), "failed to serialize event");
                return 0;
            }
        };

        let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        sockets.retain(|id, tx| match tx.try_send(payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::trace!(socket_id = %id, "mailbox full; dropping payload");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.sockets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
