use std::collections::HashMap;
use std::num::Wrapping;

use canvas_system::{ConnectionId, RoomId};

use crate::room::RoomTx;

pub struct RoomHandle {
    pub tx: RoomTx,
    pub members: usize,
}

/// Where a leaving connection was, and whether its room went away with it.
#[derive(Debug)]
pub struct Departure {
    pub room_id: RoomId,
    pub tx: RoomTx,
    pub room_closed: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    NoSuchRoom,
    AlreadyJoined,
}

/// Tracks which room every connection is in. Room state itself lives in the
/// room tasks; the registry only holds their inboxes.
pub struct RoomRegistry {
    connection_id_source: Wrapping<ConnectionId>,
    connection_locations: HashMap<ConnectionId, RoomId>,
    rooms: HashMap<RoomId, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            connection_id_source: Wrapping(0),
            connection_locations: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn new_connection_id(&mut self) -> ConnectionId {
        loop {
            self.connection_id_source += Wrapping(1);
            let id = self.connection_id_source.0;
            if id != 0 && !self.connection_locations.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn insert_room(&mut self, room_id: RoomId, tx: RoomTx) {
        self.rooms.insert(room_id, RoomHandle { tx, members: 0 });
    }

    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        room_id: &str,
    ) -> Result<&RoomTx, RegistryError> {
        if self.connection_locations.contains_key(&connection_id) {
            return Err(RegistryError::AlreadyJoined);
        }
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistryError::NoSuchRoom)?;
        room.members += 1;
        self.connection_locations
            .insert(connection_id, room_id.to_owned());
        Ok(&room.tx)
    }

    /// The handle of a room is dropped with its last member, which lets the
    /// room task run out of commands and exit.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<Departure> {
        let room_id = self.connection_locations.remove(connection_id)?;
        let room = self.rooms.get_mut(&room_id)?;
        room.members = room.members.saturating_sub(1);
        if room.members == 0 {
            let room = self.rooms.remove(&room_id)?;
            Some(Departure {
                room_id,
                tx: room.tx,
                room_closed: true,
            })
        } else {
            Some(Departure {
                tx: room.tx.clone(),
                room_id,
                room_closed: false,
            })
        }
    }

    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<&RoomHandle> {
        self.connection_locations
            .get(connection_id)
            .and_then(|room_id| self.rooms.get(room_id))
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomHandle> {
        self.rooms.get(room_id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = (&RoomId, &RoomHandle)> {
        self.rooms.iter()
    }
}
