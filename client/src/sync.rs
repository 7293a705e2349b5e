//! Long-lived room connection.
//!
//! Keeps one [`ClientSession`] attached to a room, reconnecting with
//! exponential backoff whenever the channel drops. Local state is discarded on
//! every drop and rebuilt from the next snapshot.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use canvas_system::{
    ClientSession, Codec, ConnectionId, Identity, Point, PresenceRecord, RoomId, ServerMessage,
    SessionStatus, Stroke, StrokeId,
};

use crate::error::{ClientError, Result};

/// Commands sent to the client task
#[derive(Debug)]
pub enum ClientCommand {
    BeginStroke {
        color: String,
        width: f32,
        reply: oneshot::Sender<Result<StrokeId>>,
    },
    AppendPoint {
        stroke_id: StrokeId,
        point: Point,
    },
    Clear,
    /// `None` hides the cursor.
    SetCursor(Option<Point>),
    SetIdentity(Identity),
    Shutdown,
}

/// Events emitted by the client task
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StatusChanged(SessionStatus),
    DocumentChanged,
    MembershipChanged(usize),
    PresenceChanged,
    Error(String),
    Stopped,
}

/// Latest state of the room as this participant sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasView {
    pub status: SessionStatus,
    pub connection_id: Option<ConnectionId>,
    pub members: usize,
    pub strokes: Vec<Stroke>,
    /// Everyone but this participant.
    pub presence: Vec<(ConnectionId, PresenceRecord)>,
}

impl CanvasView {
    fn new() -> Self {
        Self {
            status: SessionStatus::Connecting,
            connection_id: None,
            members: 0,
            strokes: Vec::new(),
            presence: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base websocket URL of the server, e.g. `ws://127.0.0.1:8080`
    pub url: String,
    pub room_id: RoomId,
    pub identity: Identity,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, room_id: impl Into<RoomId>, identity: Identity) -> Self {
        Self {
            url: url.into(),
            room_id: room_id.into(),
            identity,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }

    pub fn room_url(&self) -> String {
        format!("{}/ws/{}", self.url.trim_end_matches('/'), self.room_id)
    }
}

/// Handle to control the client task
pub struct ClientHandle {
    pub command_tx: mpsc::Sender<ClientCommand>,
    /// Dropped instead of queued when the receiver falls behind.
    pub event_rx: mpsc::Receiver<ClientEvent>,
    pub view_rx: watch::Receiver<CanvasView>,
}

impl ClientHandle {
    async fn send(&self, command: ClientCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    pub async fn begin_stroke(&self, color: &str, width: f32) -> Result<StrokeId> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::BeginStroke {
            color: color.to_owned(),
            width,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Stopped)?
    }

    pub async fn append_point(&self, stroke_id: &StrokeId, point: Point) -> Result<()> {
        self.send(ClientCommand::AppendPoint {
            stroke_id: stroke_id.clone(),
            point,
        })
        .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.send(ClientCommand::Clear).await
    }

    pub async fn set_cursor(&self, cursor: Option<Point>) -> Result<()> {
        self.send(ClientCommand::SetCursor(cursor)).await
    }

    pub async fn set_identity(&self, identity: Identity) -> Result<()> {
        self.send(ClientCommand::SetIdentity(identity)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(ClientCommand::Shutdown).await
    }

    /// Resolves once the view satisfies `f`.
    pub async fn wait_for(&mut self, f: impl FnMut(&CanvasView) -> bool) -> Result<CanvasView> {
        self.view_rx
            .wait_for(f)
            .await
            .map(|view| view.clone())
            .map_err(|_| ClientError::Stopped)
    }

    pub fn view(&self) -> CanvasView {
        self.view_rx.borrow().clone()
    }
}

/// Spawn the client task
///
/// The task connects right away and keeps reconnecting until it is shut down
/// or every handle is dropped.
pub fn spawn_client(config: ClientConfig) -> Result<ClientHandle> {
    if config.room_id.is_empty() {
        return Err(ClientError::EmptyRoomId);
    }
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (view_tx, view_rx) = watch::channel(CanvasView::new());

    tokio::spawn(client_task_loop(
        config,
        command_rx,
        Publisher::new(event_tx, view_tx),
    ));

    Ok(ClientHandle {
        command_tx,
        event_rx,
        view_rx,
    })
}

enum Exit {
    Shutdown,
    /// The channel closed. Carries whether a snapshot had arrived on it.
    Closed { synced: bool },
}

pub(crate) fn next_delay(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

async fn client_task_loop(
    config: ClientConfig,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    mut publisher: Publisher,
) {
    let mut session = ClientSession::new(Some(config.identity.clone()));
    let mut reconnect_delay = config.initial_reconnect_delay;

    'reconnect: loop {
        match connect_and_run(&config, &mut session, &mut command_rx, &mut publisher).await {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Closed { synced }) => {
                log::info!("Connection to room {} closed", config.room_id);
                if synced {
                    reconnect_delay = config.initial_reconnect_delay;
                }
            }
            Err(e) => {
                log::warn!("Connection to room {} failed: {}", config.room_id, e);
                publisher.emit(ClientEvent::Error(e.to_string()));
            }
        }

        session.connection_lost();
        publisher.publish(&mut session);

        // Wait before reconnecting, still taking commands
        let sleep = tokio::time::sleep(reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if !apply_command(&mut session, command) {
                            break 'reconnect;
                        }
                        publisher.publish(&mut session);
                    }
                    None => break 'reconnect,
                },
            }
        }
        reconnect_delay = next_delay(reconnect_delay, config.max_reconnect_delay);
    }

    publisher.emit(ClientEvent::Stopped);
    log::debug!("Client task for room {} stopped", config.room_id);
}

async fn connect_and_run(
    config: &ClientConfig,
    session: &mut ClientSession,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
    publisher: &mut Publisher,
) -> Result<Exit> {
    let url = config.room_url();
    log::info!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();
    let mut synced = false;

    loop {
        for message in session.take_outgoing() {
            let bytes = Codec::Bincode.encode(&message)?;
            write.send(Message::Binary(bytes)).await?;
        }

        tokio::select! {
            command = command_rx.recv() => {
                let mut next = command;
                // Everything already queued goes out in one batch, which
                // collapses a burst of cursor moves into one update.
                loop {
                    match next {
                        Some(command) => {
                            if !apply_command(session, command) {
                                write.close().await.ok();
                                return Ok(Exit::Shutdown);
                            }
                        }
                        None => {
                            write.close().await.ok();
                            return Ok(Exit::Shutdown);
                        }
                    }
                    next = match command_rx.try_recv() {
                        Ok(command) => Some(command),
                        Err(_) => break,
                    };
                }
                publisher.publish(session);
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        match Codec::Bincode.decode::<ServerMessage>(&data) {
                            Ok(message) => {
                                session.handle_message(message);
                                synced |= session.status() == SessionStatus::Synced;
                                publisher.publish(session);
                            }
                            Err(e) => log::warn!("Dropping malformed frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Server closed the connection: {:?}", frame);
                        return Ok(Exit::Closed { synced });
                    }
                    None => return Ok(Exit::Closed { synced }),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }
}

/// Returns `false` for `Shutdown`.
fn apply_command(session: &mut ClientSession, command: ClientCommand) -> bool {
    match command {
        ClientCommand::BeginStroke {
            color,
            width,
            reply,
        } => {
            let result = session.begin_stroke(&color, width).map_err(ClientError::from);
            let _ = reply.send(result);
        }
        ClientCommand::AppendPoint { stroke_id, point } => {
            if let Err(e) = session.append_point(&stroke_id, point) {
                log::debug!("Dropping point for stroke {}: {}", stroke_id, e);
            }
        }
        ClientCommand::Clear => {
            if let Err(e) = session.clear() {
                log::debug!("Dropping clear: {}", e);
            }
        }
        ClientCommand::SetCursor(cursor) => session.set_cursor(cursor),
        ClientCommand::SetIdentity(identity) => session.set_identity(identity),
        ClientCommand::Shutdown => return false,
    }
    true
}

struct Publisher {
    event_tx: mpsc::Sender<ClientEvent>,
    view_tx: watch::Sender<CanvasView>,
    status: SessionStatus,
    members: usize,
}

impl Publisher {
    fn new(event_tx: mpsc::Sender<ClientEvent>, view_tx: watch::Sender<CanvasView>) -> Self {
        Self {
            event_tx,
            view_tx,
            status: SessionStatus::Connecting,
            members: 0,
        }
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            log::debug!("Event receiver is falling behind, dropping {:?}", event);
        }
    }

    fn publish(&mut self, session: &mut ClientSession) {
        let document_changed = session.consume_document_invalidated();
        let presence_changed = session.consume_presence_invalidated();
        let status = session.status();
        let members = session.members();
        if !document_changed && !presence_changed && status == self.status {
            return;
        }

        if status != self.status {
            self.status = status;
            self.emit(ClientEvent::StatusChanged(status));
        }
        if document_changed {
            self.emit(ClientEvent::DocumentChanged);
        }
        if members != self.members {
            self.members = members;
            self.emit(ClientEvent::MembershipChanged(members));
        }
        if presence_changed {
            self.emit(ClientEvent::PresenceChanged);
        }

        self.view_tx.send_modify(|view| {
            view.status = status;
            view.connection_id = session.connection_id();
            view.members = members;
            if document_changed {
                view.strokes = session.strokes().to_vec();
            }
            if presence_changed {
                view.presence = session.remote_presence();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_url_joins_base_and_room() {
        let identity = Identity::random("#000000");
        let config = ClientConfig::new("ws://127.0.0.1:8080/", "demo", identity);
        assert_eq!(config.room_url(), "ws://127.0.0.1:8080/ws/demo");
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = next_delay(delay, max);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test]
    async fn empty_room_id_is_rejected() {
        let config = ClientConfig::new("ws://127.0.0.1:1", "", Identity::random("#000000"));
        assert!(matches!(spawn_client(config), Err(ClientError::EmptyRoomId)));
    }

    #[test]
    fn commands_reach_the_session_while_disconnected() {
        let mut session = ClientSession::new(None);
        let (reply, mut rx) = oneshot::channel();
        assert!(apply_command(
            &mut session,
            ClientCommand::BeginStroke {
                color: "#000000".into(),
                width: 2.0,
                reply,
            }
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(Err(ClientError::Session(canvas_system::SessionError::NotSynced)))
        ));
        assert!(apply_command(
            &mut session,
            ClientCommand::SetCursor(Some(Point::new(0.5, 0.5)))
        ));
        assert!(!apply_command(&mut session, ClientCommand::Shutdown));
    }
}
