use serde::Serialize;

use crate::document::{ApplyOutcome, Document};
use crate::error::RejectedOperation;
use crate::message::ServerMessage;
use crate::operation::Operation;
use crate::presence::{PresenceChange, PresenceTable, PresenceUpdate};
use crate::types::{ConnectionId, RoomId};

/// A message and the members it must reach, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub recipients: Vec<ConnectionId>,
    pub message: ServerMessage,
}

impl Envelope {
    fn to(recipient: ConnectionId, message: ServerMessage) -> Self {
        Self {
            recipients: vec![recipient],
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomDescription {
    pub room_id: RoomId,
    pub members: usize,
    pub strokes: usize,
    pub points: usize,
}

/// Canonical state of one room.
///
/// Every method is a synchronous state transition that returns what has to be
/// sent. Whoever drives it must call it from a single writer so that the
/// document order is the order of calls.
pub struct RoomAuthority {
    room_id: RoomId,
    members: Vec<ConnectionId>,
    document: Document,
    presence: PresenceTable,
}

impl RoomAuthority {
    pub fn new(room_id: RoomId) -> Self {
        log::info!("Room {} created", room_id);
        Self {
            room_id,
            members: Vec::new(),
            document: Document::new(),
            presence: PresenceTable::new(),
        }
    }

    /// The snapshot goes out before the joiner is added, so it is never
    /// included in a broadcast that the snapshot already reflects.
    pub fn join(&mut self, connection_id: ConnectionId) -> Vec<Envelope> {
        if self.is_member(&connection_id) {
            log::warn!(
                "Connection {} joined room {} twice",
                connection_id,
                self.room_id
            );
            return vec![Envelope::to(connection_id, self.init_for(connection_id))];
        }

        self.presence.insert(connection_id);
        let others = self.members.clone();
        self.members.push(connection_id);
        log::info!(
            "Connection {} joined room {} ({} members)",
            connection_id,
            self.room_id,
            self.members.len()
        );

        let mut result = vec![Envelope::to(connection_id, self.init_for(connection_id))];
        if !others.is_empty() {
            result.push(Envelope {
                recipients: others,
                message: ServerMessage::MembershipChanged {
                    count: self.members.len(),
                },
            });
        }
        result
    }

    pub fn leave(&mut self, connection_id: ConnectionId) -> Vec<Envelope> {
        if !self.is_member(&connection_id) {
            return Vec::new();
        }
        self.members.retain(|m| *m != connection_id);
        self.presence.remove(&connection_id);
        log::info!(
            "Connection {} left room {} ({} members)",
            connection_id,
            self.room_id,
            self.members.len()
        );

        if self.members.is_empty() {
            return Vec::new();
        }
        vec![
            Envelope {
                recipients: self.members.clone(),
                message: ServerMessage::PresenceRemoved { connection_id },
            },
            Envelope {
                recipients: self.members.clone(),
                message: ServerMessage::MembershipChanged {
                    count: self.members.len(),
                },
            },
        ]
    }

    /// Applies the operation and relays it to every member, the sender
    /// included. Rejected operations change nothing and are not relayed.
    pub fn apply_operation(
        &mut self,
        from: ConnectionId,
        mut operation: Operation,
    ) -> Result<Envelope, RejectedOperation> {
        if !self.is_member(&from) {
            return Err(RejectedOperation::NotAMember(from));
        }
        operation.validate()?;

        match &mut operation {
            Operation::StrokeCreated(created) => created.originator = from,
            Operation::PointAppended(appended) => {
                if let Some(stroke) = self.document.stroke(&appended.stroke_id) {
                    if stroke.originator != from {
                        return Err(RejectedOperation::ForeignStroke {
                            stroke_id: appended.stroke_id.clone(),
                            owner: stroke.originator,
                        });
                    }
                }
            }
            Operation::Clear => {}
        }

        match self.document.apply(&operation)? {
            ApplyOutcome::Applied => Ok(Envelope {
                recipients: self.members.clone(),
                message: ServerMessage::Operation {
                    origin: from,
                    operation,
                },
            }),
            ApplyOutcome::Duplicate => Err(RejectedOperation::Duplicate),
        }
    }

    /// Merges the update. Nothing is sent until [`RoomAuthority::flush_presence`].
    pub fn update_presence(&mut self, from: ConnectionId, update: PresenceUpdate) -> bool {
        if !self.is_member(&from) {
            log::warn!(
                "Presence from connection {} outside room {}",
                from,
                self.room_id
            );
            return false;
        }
        self.presence.update(from, update)
    }

    pub fn has_pending_presence(&self) -> bool {
        self.presence.has_pending()
    }

    /// Latest record of every participant that changed since the last flush,
    /// sent to everyone else in the room.
    pub fn flush_presence(&mut self) -> Vec<Envelope> {
        self.presence
            .flush()
            .into_iter()
            .filter_map(|change| {
                let (subject, message) = match change {
                    PresenceChange::Updated(connection_id, record) => (
                        connection_id,
                        ServerMessage::Presence {
                            connection_id,
                            record,
                        },
                    ),
                    PresenceChange::Removed(connection_id) => {
                        (connection_id, ServerMessage::PresenceRemoved { connection_id })
                    }
                };
                let recipients: Vec<_> = self
                    .members
                    .iter()
                    .filter(|m| **m != subject)
                    .cloned()
                    .collect();
                if recipients.is_empty() {
                    None
                } else {
                    Some(Envelope {
                        recipients,
                        message,
                    })
                }
            })
            .collect()
    }

    pub fn resync(&self, connection_id: ConnectionId) -> Option<Envelope> {
        if self.is_member(&connection_id) {
            Some(Envelope::to(connection_id, self.init_for(connection_id)))
        } else {
            None
        }
    }

    fn init_for(&self, connection_id: ConnectionId) -> ServerMessage {
        ServerMessage::Init {
            connection_id,
            room_id: self.room_id.clone(),
            snapshot: self.document.snapshot(),
            members: self.members.len(),
            presence: self.presence.entries(),
        }
    }

    pub fn describe(&self) -> RoomDescription {
        RoomDescription {
            room_id: self.room_id.clone(),
            members: self.members.len(),
            strokes: self.document.len(),
            points: self
                .document
                .strokes()
                .iter()
                .map(|s| s.points.len())
                .sum(),
        }
    }

    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains(connection_id)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
