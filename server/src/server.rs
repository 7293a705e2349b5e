use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;

use canvas_system::{ConnectionId, RoomId};

use crate::admin::AdminCommand;
use crate::config::ServerConfig;
use crate::connection::{ConnectionCommand, ConnectionEvent};
use crate::connection_tx_storage::{ConnectionTx, ConnectionTxStorage};
use crate::registry::{RegistryError, RoomRegistry};
use crate::room::{spawn_room, RoomCommand};

pub type ServerTx = UnboundedSender<ServerCommand>;

#[derive(Debug)]
pub enum ServerCommand {
    Connection(ConnectionCommand),
    AdminCommand(AdminCommand),
    /// A room could not deliver to the connection and stopped sending to it.
    Evict { connection_id: ConnectionId },
}

struct Server {
    registry: RoomRegistry,
    connections: ConnectionTxStorage,
    config: ServerConfig,
    srv_tx: ServerTx,
}

impl Server {
    fn new(config: ServerConfig, srv_tx: ServerTx) -> Self {
        Self {
            registry: RoomRegistry::new(),
            connections: ConnectionTxStorage::new(),
            config,
            srv_tx,
        }
    }

    fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Connection(command) => self.handle_connection_command(command),
            ServerCommand::AdminCommand(command) => self.handle_admin_command(command),
            ServerCommand::Evict { connection_id } => {
                self.leave_room(&connection_id);
                if let Some(tx) = self.connections.remove(&connection_id) {
                    log::info!("Evicting connection {}", connection_id);
                    tx.evict();
                }
            }
        }
    }

    fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { tx, room_id } => self.connect(tx, room_id),
            ConnectionCommand::Disconnect { from } => {
                self.leave_room(&from);
                self.connections.remove(&from);
            }
            ConnectionCommand::Message { from, message } => match self.registry.room_of(&from) {
                Some(room) => {
                    if room.tx.send(RoomCommand::Message { from, message }).is_err() {
                        log::error!("Room of connection {} is gone", from);
                    }
                }
                None => log::warn!("Message from connection {} outside any room", from),
            },
        }
    }

    fn connect(&mut self, tx: ConnectionTx, room_id: RoomId) {
        let connection_id = self.registry.new_connection_id();
        if tx
            .try_send(ConnectionEvent::Connected { connection_id })
            .is_err()
        {
            log::warn!("Connection closed before it was registered");
            return;
        }
        self.connections.insert(connection_id, tx.clone());

        if !self.registry.has_room(&room_id) {
            let room_tx = spawn_room(
                room_id.clone(),
                self.config.presence_flush_interval,
                self.srv_tx.clone(),
            );
            self.registry.insert_room(room_id.clone(), room_tx);
        }

        match self.registry.join(connection_id, &room_id) {
            Ok(room_tx) => {
                if room_tx
                    .send(RoomCommand::Join { connection_id, tx })
                    .is_err()
                {
                    log::error!("Room {} is gone", room_id);
                }
            }
            Err(RegistryError::NoSuchRoom) | Err(RegistryError::AlreadyJoined) => {
                log::error!("Connection {} could not join room {}", connection_id, room_id);
            }
        }
    }

    fn leave_room(&mut self, connection_id: &ConnectionId) {
        if let Some(departure) = self.registry.leave(connection_id) {
            let leave = RoomCommand::Leave {
                connection_id: *connection_id,
            };
            if departure.tx.send(leave).is_err() {
                log::error!("Room {} is gone", departure.room_id);
            }
            if departure.room_closed {
                log::debug!("Last connection left room {}", departure.room_id);
            }
        }
    }

    fn handle_admin_command(&mut self, command: AdminCommand) {
        match command {
            AdminCommand::ListRooms { tx } => {
                let pending: Vec<_> = self
                    .registry
                    .rooms()
                    .filter_map(|(_, room)| {
                        let (describe_tx, describe_rx) = oneshot::channel();
                        room.tx
                            .send(RoomCommand::Describe { tx: describe_tx })
                            .ok()
                            .map(|_| describe_rx)
                    })
                    .collect();
                tokio::spawn(async move {
                    let mut descriptions = Vec::with_capacity(pending.len());
                    for rx in pending {
                        if let Ok(description) = rx.await {
                            descriptions.push(description);
                        }
                    }
                    descriptions.sort_by(|a, b| a.room_id.cmp(&b.room_id));
                    let _ = tx.send(descriptions);
                });
            }
            AdminCommand::DescribeRoom { room_id, tx } => match self.registry.room(&room_id) {
                Some(room) => {
                    let (describe_tx, describe_rx) = oneshot::channel();
                    let _ = room.tx.send(RoomCommand::Describe { tx: describe_tx });
                    tokio::spawn(async move {
                        let _ = tx.send(describe_rx.await.ok());
                    });
                }
                None => {
                    let _ = tx.send(None);
                }
            },
        }
    }
}

pub fn spawn_server(config: ServerConfig) -> ServerTx {
    let (srv_tx, mut srv_rx) = unbounded_channel::<ServerCommand>();
    let mut server = Server::new(config, srv_tx.clone());

    tokio::spawn(async move {
        log::info!("Server task started");
        while let Some(command) = srv_rx.recv().await {
            server.handle_command(command);
        }
    });

    srv_tx
}
