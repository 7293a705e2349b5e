use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use canvas_system::ConnectionId;

use crate::connection::{ConnectionEvent, DisconnectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection stopped draining its queue.
    Lagging,
    /// The connection is gone.
    Closed,
    Unknown,
}

/// Sending half of a connection's outbound queue.
///
/// Sends never wait: a full queue is reported to the caller instead.
#[derive(Debug, Clone)]
pub struct ConnectionTx {
    events: mpsc::Sender<ConnectionEvent>,
    evicted: Arc<Notify>,
}

pub struct ConnectionRx {
    events: mpsc::Receiver<ConnectionEvent>,
    evicted: Arc<Notify>,
}

impl ConnectionTx {
    pub fn channel(capacity: usize) -> (ConnectionTx, ConnectionRx) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let evicted = Arc::new(Notify::new());
        (
            ConnectionTx {
                events: tx,
                evicted: evicted.clone(),
            },
            ConnectionRx {
                events: rx,
                evicted,
            },
        )
    }

    pub fn try_send(&self, event: ConnectionEvent) -> Result<(), DeliveryError> {
        self.events.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Wakes the receiving side even when its queue is full.
    pub fn evict(&self) {
        self.evicted.notify_one();
    }
}

impl ConnectionRx {
    /// After an eviction this yields a single `Disconnected` ahead of
    /// anything still queued.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        tokio::select! {
            biased;
            _ = self.evicted.notified() => Some(ConnectionEvent::Disconnected {
                reason: DisconnectReason::Lagging,
            }),
            event = self.events.recv() => event,
        }
    }
}

pub struct ConnectionTxStorage {
    txs: HashMap<ConnectionId, ConnectionTx>,
}

impl ConnectionTxStorage {
    pub fn new() -> Self {
        Self {
            txs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, connection_id: ConnectionId, tx: ConnectionTx) {
        self.txs.insert(connection_id, tx);
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionTx> {
        self.txs.remove(connection_id)
    }

    pub fn send(
        &self,
        connection_id: &ConnectionId,
        event: ConnectionEvent,
    ) -> Result<(), DeliveryError> {
        match self.txs.get(connection_id) {
            Some(tx) => tx.try_send(event),
            None => {
                log::warn!("No outbound queue for connection {}", connection_id);
                Err(DeliveryError::Unknown)
            }
        }
    }
}
