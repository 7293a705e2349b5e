use std::fmt;
use std::sync::Arc;

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{error, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use actix_web_actors::ws::{CloseCode, CloseReason};
use serde::Deserialize;

use canvas_system::{ClientMessage, Codec, ConnectionId, RoomId, ServerMessage};

use crate::config::ServerConfig;
use crate::connection_tx_storage::ConnectionTx;
use crate::server::{ServerCommand, ServerTx};

#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        tx: ConnectionTx,
        room_id: RoomId,
    },
    Disconnect {
        from: ConnectionId,
    },
    Message {
        from: ConnectionId,
        message: ClientMessage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Lagging,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Lagging => write!(f, "outbound queue overflowed"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { connection_id: ConnectionId },
    Message(Arc<ServerMessage>),
    Disconnected { reason: DisconnectReason },
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(ConnectionEvent);

enum ConnectionState {
    Idle,
    Connected(ConnectionId),
}

struct ConnectionActor {
    state: ConnectionState,
    srv_tx: ServerTx,
    room_id: RoomId,
    codec: Codec,
    buffer: usize,
}

impl ConnectionActor {
    fn send_command(&self, command: ConnectionCommand) -> bool {
        if self.srv_tx.send(ServerCommand::Connection(command)).is_err() {
            log::error!("Server task is gone");
            return false;
        }
        true
    }

    fn ingress(&self, bytes: &[u8], codec: Codec) {
        let from = match self.state {
            ConnectionState::Connected(id) => id,
            ConnectionState::Idle => {
                log::debug!("Dropping {} bytes received before connected", bytes.len());
                return;
            }
        };
        match codec.decode::<ClientMessage>(bytes) {
            Ok(message) => {
                log::trace!("Ingress {:?}", message);
                self.send_command(ConnectionCommand::Message { from, message });
            }
            Err(e) => log::warn!("Dropping malformed message from {}: {}", from, e),
        }
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = ConnectionTx::channel(self.buffer);

        if !self.send_command(ConnectionCommand::Connect {
            tx,
            room_id: self.room_id.clone(),
        }) {
            ctx.stop();
            return;
        }

        let addr = ctx.address();

        actix_web::rt::spawn(async move {
            log::debug!("connection green thread - started");
            while let Some(event) = rx.recv().await {
                let last = matches!(event, ConnectionEvent::Disconnected { .. });
                if addr.send(ConnectionActorMessage(event)).await.is_err() || last {
                    break;
                }
            }
            log::debug!("connection green thread - terminated");
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let ConnectionState::Connected(from) = self.state {
            self.send_command(ConnectionCommand::Disconnect { from });
            self.state = ConnectionState::Idle;
        }

        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Binary(bin)) => self.ingress(&bin, Codec::Bincode),
            Ok(ws::Message::Text(text)) => self.ingress(text.as_bytes(), Codec::Json),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::warn!("Protocol error: {}", e);
                ctx.stop();
            }
            _ => (),
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        match msg.0 {
            ConnectionEvent::Connected { connection_id } => {
                self.state = ConnectionState::Connected(connection_id);
            }
            ConnectionEvent::Message(message) => {
                log::trace!("Egress {:?}", message);
                let encoded = match self.codec.encode(message.as_ref()) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        log::error!("Failed to encode {:?}: {}", message, e);
                        return;
                    }
                };
                match self.codec {
                    Codec::Bincode => ctx.binary(encoded),
                    Codec::Json => match String::from_utf8(encoded) {
                        Ok(text) => ctx.text(text),
                        Err(e) => log::error!("Encoded message is not text: {}", e),
                    },
                }
            }
            ConnectionEvent::Disconnected { reason } => {
                log::info!("Closing connection: {}", reason);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Again,
                    description: Some(reason.to_string()),
                }));
                ctx.stop();
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    codec: Option<String>,
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<ConnectQuery>,
    srv_tx: web::Data<ServerTx>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, Error> {
    let room_id = path.into_inner();
    if room_id.is_empty() {
        return Err(error::ErrorBadRequest("room id must not be empty"));
    }
    let codec = match &query.codec {
        Some(codec) => codec.parse::<Codec>().map_err(error::ErrorBadRequest)?,
        None => Codec::default(),
    };

    ws::start(
        ConnectionActor {
            state: ConnectionState::Idle,
            srv_tx: srv_tx.get_ref().clone(),
            room_id,
            codec,
            buffer: config.connection_buffer,
        },
        &req,
        stream,
    )
}
