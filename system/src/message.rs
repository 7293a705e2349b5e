use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::operation::Operation;
use crate::presence::{PresenceRecord, PresenceUpdate};
use crate::types::{ConnectionId, RoomId, Stroke};

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub strokes: Vec<Stroke>,
}

impl std::fmt::Debug for DocumentSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSnapshot")
            .field("strokes", &self.strokes.len())
            .finish()
    }
}

/// Client to authority. Joining is implied by opening the channel for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Operation(Operation),
    Presence(PresenceUpdate),
    /// Ask for a fresh `Init` without reconnecting.
    Resync,
}

/// Authority to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Always the first message on a channel, and the answer to `Resync`.
    Init {
        connection_id: ConnectionId,
        room_id: RoomId,
        snapshot: DocumentSnapshot,
        members: usize,
        presence: Vec<(ConnectionId, PresenceRecord)>,
    },
    Operation {
        origin: ConnectionId,
        operation: Operation,
    },
    MembershipChanged {
        count: usize,
    },
    Presence {
        connection_id: ConnectionId,
        record: PresenceRecord,
    },
    PresenceRemoved {
        connection_id: ConnectionId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Bincode,
    Json,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Bincode
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bincode" => Ok(Codec::Bincode),
            "json" => Ok(Codec::Json),
            other => Err(format!("unknown codec: {}", other)),
        }
    }
}

impl Codec {
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Bincode => Ok(bincode::serialize(message)?),
            Codec::Json => Ok(serde_json::to_vec(message)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Bincode => Ok(bincode::deserialize(bytes)?),
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
