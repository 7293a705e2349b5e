use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use canvas_system::{
    ClientMessage, ConnectionId, Envelope, RoomAuthority, RoomDescription, RoomId,
};

use crate::connection::ConnectionEvent;
use crate::connection_tx_storage::{ConnectionTx, ConnectionTxStorage, DeliveryError};
use crate::server::{ServerCommand, ServerTx};

pub type RoomTx = UnboundedSender<RoomCommand>;

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        connection_id: ConnectionId,
        tx: ConnectionTx,
    },
    Leave {
        connection_id: ConnectionId,
    },
    Message {
        from: ConnectionId,
        message: ClientMessage,
    },
    Describe {
        tx: oneshot::Sender<RoomDescription>,
    },
}

/// Drives one [`RoomAuthority`]. Every command is handled to completion
/// before the next one is taken, so this task is the room's only writer.
struct Room {
    authority: RoomAuthority,
    connections: ConnectionTxStorage,
    lagging: HashSet<ConnectionId>,
    srv_tx: ServerTx,
}

impl Room {
    fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { connection_id, tx } => {
                self.lagging.remove(&connection_id);
                self.connections.insert(connection_id, tx);
                let envelopes = self.authority.join(connection_id);
                self.deliver(envelopes);
            }
            RoomCommand::Leave { connection_id } => {
                let envelopes = self.authority.leave(connection_id);
                self.connections.remove(&connection_id);
                self.lagging.remove(&connection_id);
                self.deliver(envelopes);
            }
            RoomCommand::Message { from, message } => self.handle_message(from, message),
            RoomCommand::Describe { tx } => {
                let _ = tx.send(self.authority.describe());
            }
        }
    }

    fn handle_message(&mut self, from: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Operation(operation) => {
                match self.authority.apply_operation(from, operation) {
                    Ok(envelope) => self.deliver(vec![envelope]),
                    Err(e) => log::warn!(
                        "Room {}: dropping operation from {}: {}",
                        self.authority.room_id(),
                        from,
                        e
                    ),
                }
            }
            ClientMessage::Presence(update) => {
                self.authority.update_presence(from, update);
            }
            ClientMessage::Resync => {
                log::info!(
                    "Room {}: connection {} asked for a resync",
                    self.authority.room_id(),
                    from
                );
                let envelopes = self.authority.resync(from).into_iter().collect();
                self.deliver(envelopes);
            }
        }
    }

    fn flush_presence(&mut self) {
        if self.authority.has_pending_presence() {
            let envelopes = self.authority.flush_presence();
            self.deliver(envelopes);
        }
    }

    fn deliver(&mut self, envelopes: Vec<Envelope>) {
        for Envelope {
            recipients,
            message,
        } in envelopes
        {
            let message = Arc::new(message);
            for recipient in recipients {
                if self.lagging.contains(&recipient) {
                    continue;
                }
                match self
                    .connections
                    .send(&recipient, ConnectionEvent::Message(message.clone()))
                {
                    Ok(()) => {}
                    Err(DeliveryError::Lagging) => {
                        log::warn!(
                            "Room {}: connection {} is not keeping up, dropping it",
                            self.authority.room_id(),
                            recipient
                        );
                        self.evict(recipient);
                    }
                    Err(DeliveryError::Closed) | Err(DeliveryError::Unknown) => {
                        log::debug!(
                            "Room {}: connection {} is already gone",
                            self.authority.room_id(),
                            recipient
                        );
                        self.evict(recipient);
                    }
                }
            }
        }
    }

    /// Nothing more is sent to the connection until it leaves. The registry
    /// closes it and reports the departure back as a `Leave`.
    fn evict(&mut self, connection_id: ConnectionId) {
        self.lagging.insert(connection_id);
        if self
            .srv_tx
            .send(ServerCommand::Evict { connection_id })
            .is_err()
        {
            log::error!("Server task is gone");
        }
    }
}

pub fn spawn_room(
    room_id: RoomId,
    presence_flush_interval: Option<Duration>,
    srv_tx: ServerTx,
) -> RoomTx {
    let (tx, rx) = unbounded_channel::<RoomCommand>();
    let room = Room {
        authority: RoomAuthority::new(room_id),
        connections: ConnectionTxStorage::new(),
        lagging: HashSet::new(),
        srv_tx,
    };
    tokio::spawn(run_room(room, rx, presence_flush_interval));
    tx
}

async fn run_room(
    mut room: Room,
    mut rx: UnboundedReceiver<RoomCommand>,
    presence_flush_interval: Option<Duration>,
) {
    let period = presence_flush_interval.unwrap_or(Duration::from_secs(60));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => {
                    room.handle_command(command);
                    if presence_flush_interval.is_none() {
                        room.flush_presence();
                    }
                }
                None => break,
            },
            _ = ticker.tick(), if presence_flush_interval.is_some() => room.flush_presence(),
        }
    }

    log::info!("Room {} closed", room.authority.room_id());
}
