use std::collections::VecDeque;

use serde::Serialize;

use crate::error::{ReplicaError, SessionError};
use crate::message::{ClientMessage, ServerMessage};
use crate::presence::{PresenceChange, PresenceOutbox, PresenceRecord, PresenceTable, PresenceUpdate};
use crate::replica::ReplicaDocument;
use crate::types::{ConnectionId, Identity, Point, RoomId, Stroke, StrokeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Waiting for the first snapshot.
    Connecting,
    Synced,
    /// The channel dropped. Local state is gone until the next snapshot.
    Reconnecting,
}

/// Participant side of one room channel, independent of any transport.
///
/// The transport feeds [`ClientSession::handle_message`] and
/// [`ClientSession::connection_lost`], and sends whatever
/// [`ClientSession::take_outgoing`] returns.
pub struct ClientSession {
    status: SessionStatus,
    room_id: Option<RoomId>,
    replica: Option<ReplicaDocument>,
    members: usize,
    presence: PresenceTable,
    identity: Option<Identity>,
    cursor: Option<Point>,
    outbox: VecDeque<ClientMessage>,
    presence_outbox: PresenceOutbox,
    awaiting_resync: bool,
    document_invalidated: bool,
    presence_invalidated: bool,
}

impl ClientSession {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            status: SessionStatus::Connecting,
            room_id: None,
            replica: None,
            members: 0,
            presence: PresenceTable::new(),
            identity,
            cursor: None,
            outbox: VecDeque::new(),
            presence_outbox: PresenceOutbox::default(),
            awaiting_resync: false,
            document_invalidated: false,
            presence_invalidated: false,
        }
    }

    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Init {
                connection_id,
                room_id,
                snapshot,
                members,
                presence,
            } => {
                log::info!(
                    "Synced with room {} as connection {} ({} strokes, {} members)",
                    room_id,
                    connection_id,
                    snapshot.strokes.len(),
                    members
                );
                self.replica = Some(ReplicaDocument::new(connection_id, &snapshot));
                self.room_id = Some(room_id);
                self.members = members;
                self.presence.replace(presence);
                self.outbox.clear();
                self.awaiting_resync = false;
                self.status = SessionStatus::Synced;
                self.announce_presence();
                self.document_invalidated = true;
                self.presence_invalidated = true;
            }
            ServerMessage::Operation { origin, operation } => {
                if self.awaiting_resync {
                    return;
                }
                let replica = match self.replica.as_mut() {
                    Some(replica) => replica,
                    None => {
                        log::warn!("Operation arrived before the snapshot, ignoring");
                        return;
                    }
                };
                match replica.apply_remote_operation(origin, &operation) {
                    Ok(changed) => self.document_invalidated |= changed,
                    Err(ReplicaError::ResyncRequired(e)) => {
                        log::warn!("Requesting a fresh snapshot: {}", e);
                        self.awaiting_resync = true;
                        self.outbox.push_back(ClientMessage::Resync);
                    }
                }
            }
            ServerMessage::MembershipChanged { count } => {
                self.members = count;
                self.presence_invalidated = true;
            }
            ServerMessage::Presence {
                connection_id,
                record,
            } => {
                self.presence
                    .apply(PresenceChange::Updated(connection_id, record));
                self.presence_invalidated = true;
            }
            ServerMessage::PresenceRemoved { connection_id } => {
                self.presence.apply(PresenceChange::Removed(connection_id));
                self.presence_invalidated = true;
            }
        }
    }

    /// Drops the mirror. Nothing is replayed after reconnecting; the next
    /// `Init` rebuilds everything.
    pub fn connection_lost(&mut self) {
        if self.status != SessionStatus::Reconnecting {
            log::info!("Connection lost, discarding local document");
        }
        self.status = SessionStatus::Reconnecting;
        self.replica = None;
        self.members = 0;
        self.presence.clear();
        self.outbox.clear();
        self.presence_outbox.clear();
        self.awaiting_resync = false;
        self.document_invalidated = true;
        self.presence_invalidated = true;
    }

    fn announce_presence(&mut self) {
        self.presence_outbox.clear();
        if let Some(identity) = self.identity.clone() {
            self.presence_outbox.push(PresenceUpdate::Identity(identity));
        }
        if self.cursor.is_some() {
            self.presence_outbox.push(PresenceUpdate::Cursor(self.cursor));
        }
    }

    pub fn take_outgoing(&mut self) -> Vec<ClientMessage> {
        if self.status != SessionStatus::Synced {
            return Vec::new();
        }
        let mut result: Vec<ClientMessage> = self.outbox.drain(..).collect();
        result.extend(
            self.presence_outbox
                .drain()
                .into_iter()
                .map(ClientMessage::Presence),
        );
        result
    }

    pub fn has_outgoing(&self) -> bool {
        self.status == SessionStatus::Synced
            && (!self.outbox.is_empty() || !self.presence_outbox.is_empty())
    }

    fn replica_mut(&mut self) -> Result<&mut ReplicaDocument, SessionError> {
        match (self.status, self.replica.as_mut()) {
            (SessionStatus::Synced, Some(replica)) => Ok(replica),
            _ => Err(SessionError::NotSynced),
        }
    }

    pub fn begin_stroke(&mut self, color: &str, width: f32) -> Result<StrokeId, SessionError> {
        let (stroke, operation) = self.replica_mut()?.begin_stroke(color, width)?;
        self.outbox.push_back(ClientMessage::Operation(operation));
        self.document_invalidated = true;
        Ok(stroke.id)
    }

    pub fn append_point(&mut self, stroke_id: &StrokeId, point: Point) -> Result<(), SessionError> {
        if let Some(operation) = self.replica_mut()?.append_point(stroke_id, point) {
            self.outbox.push_back(ClientMessage::Operation(operation));
            self.document_invalidated = true;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        let operation = self.replica_mut()?.clear();
        self.outbox.push_back(ClientMessage::Operation(operation));
        self.document_invalidated = true;
        Ok(())
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity.clone());
        self.presence_outbox.push(PresenceUpdate::Identity(identity));
    }

    /// `None` hides the cursor for everyone else.
    pub fn set_cursor(&mut self, cursor: Option<Point>) {
        let cursor = cursor.map(|p| Point::new(p.x, p.y));
        self.cursor = cursor;
        self.presence_outbox.push(PresenceUpdate::Cursor(cursor));
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.replica.as_ref().map(|r| r.connection_id())
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn members(&self) -> usize {
        self.members
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn strokes(&self) -> &[Stroke] {
        self.replica.as_ref().map(|r| r.strokes()).unwrap_or(&[])
    }

    /// Presence of everyone but this participant.
    pub fn remote_presence(&self) -> Vec<(ConnectionId, PresenceRecord)> {
        let me = self.connection_id();
        self.presence
            .entries()
            .into_iter()
            .filter(|(id, _)| Some(*id) != me)
            .collect()
    }

    pub fn consume_document_invalidated(&mut self) -> bool {
        std::mem::replace(&mut self.document_invalidated, false)
    }

    pub fn consume_presence_invalidated(&mut self) -> bool {
        std::mem::replace(&mut self.presence_invalidated, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DocumentSnapshot;
    use crate::operation::{Operation, PointAppended, StrokeCreated};

    fn init(connection_id: ConnectionId, strokes: Vec<Stroke>) -> ServerMessage {
        ServerMessage::Init {
            connection_id,
            room_id: "demo".into(),
            snapshot: DocumentSnapshot { strokes },
            members: 1,
            presence: vec![(connection_id, PresenceRecord::default())],
        }
    }

    fn identity() -> Identity {
        Identity {
            name: "user_test".into(),
            color: "#123456".into(),
        }
    }

    #[test]
    fn drawing_requires_a_snapshot() {
        let mut session = ClientSession::new(None);
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert_eq!(
            session.begin_stroke("#000", 4.0),
            Err(SessionError::NotSynced)
        );
        assert!(session.take_outgoing().is_empty());
    }

    #[test]
    fn identity_is_announced_after_every_init() {
        let mut session = ClientSession::new(Some(identity()));
        session.set_cursor(Some(Point::new(0.5, 0.5)));
        session.handle_message(init(1, Vec::new()));

        assert_eq!(
            session.take_outgoing(),
            vec![
                ClientMessage::Presence(PresenceUpdate::Identity(identity())),
                ClientMessage::Presence(PresenceUpdate::Cursor(Some(Point::new(0.5, 0.5)))),
            ]
        );

        session.connection_lost();
        session.handle_message(init(2, Vec::new()));
        assert_eq!(session.take_outgoing().len(), 2);
    }

    #[test]
    fn connection_loss_discards_the_mirror() {
        let mut session = ClientSession::new(None);
        session.handle_message(init(1, Vec::new()));
        let stroke_id = session.begin_stroke("#000", 4.0).unwrap();
        session
            .append_point(&stroke_id, Point::new(0.1, 0.1))
            .unwrap();

        session.connection_lost();
        assert_eq!(session.status(), SessionStatus::Reconnecting);
        assert!(session.strokes().is_empty());
        assert!(session.take_outgoing().is_empty());

        // The stroke reached the authority before the drop, so it comes back
        // with the snapshot exactly once.
        let confirmed = Stroke {
            id: stroke_id.clone(),
            color: "#000".into(),
            width: 4.0,
            points: vec![Point::new(0.1, 0.1)],
            originator: 1,
        };
        session.handle_message(init(2, vec![confirmed.clone()]));
        assert_eq!(session.strokes(), &[confirmed]);
        assert_eq!(session.status(), SessionStatus::Synced);
    }

    #[test]
    fn gap_triggers_single_resync_request() {
        let mut session = ClientSession::new(None);
        session.handle_message(init(1, Vec::new()));
        session.handle_message(ServerMessage::Operation {
            origin: 2,
            operation: Operation::StrokeCreated(StrokeCreated {
                id: "s9".into(),
                color: "#000".into(),
                width: 1.0,
                originator: 2,
            }),
        });
        for index in 5..7 {
            session.handle_message(ServerMessage::Operation {
                origin: 2,
                operation: Operation::PointAppended(PointAppended {
                    stroke_id: "s9".into(),
                    index,
                    point: Point::new(0.1, 0.1),
                }),
            });
        }
        assert_eq!(session.take_outgoing(), vec![ClientMessage::Resync]);
    }

    #[test]
    fn remote_presence_excludes_self() {
        let mut session = ClientSession::new(None);
        session.handle_message(init(1, Vec::new()));
        session.handle_message(ServerMessage::Presence {
            connection_id: 2,
            record: PresenceRecord {
                identity: Some(identity()),
                cursor: Some(Point::new(0.3, 0.4)),
            },
        });
        let remote = session.remote_presence();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].0, 2);

        session.handle_message(ServerMessage::PresenceRemoved { connection_id: 2 });
        assert!(session.remote_presence().is_empty());
        assert!(session.consume_presence_invalidated());
        assert!(!session.consume_presence_invalidated());
    }

    #[test]
    fn cursor_updates_are_coalesced() {
        let mut session = ClientSession::new(None);
        session.handle_message(init(1, Vec::new()));
        session.take_outgoing();

        session.set_cursor(Some(Point::new(0.1, 0.2)));
        session.set_cursor(Some(Point::new(0.3, 0.4)));
        assert_eq!(
            session.take_outgoing(),
            vec![ClientMessage::Presence(PresenceUpdate::Cursor(Some(
                Point::new(0.3, 0.4)
            )))]
        );
    }
}
