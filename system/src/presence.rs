use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, Identity, Point};

/// One field of a participant's presence record.
///
/// `Cursor(None)` means the pointer left the surface. It is sent explicitly so
/// that observers drop the cursor instead of keeping the last position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceUpdate {
    Identity(Identity),
    Cursor(Option<Point>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub identity: Option<Identity>,
    pub cursor: Option<Point>,
}

impl PresenceRecord {
    /// Returns whether the record changed.
    pub fn merge(&mut self, update: PresenceUpdate) -> bool {
        match update {
            PresenceUpdate::Identity(identity) => {
                let changed = self.identity.as_ref() != Some(&identity);
                self.identity = Some(identity);
                changed
            }
            PresenceUpdate::Cursor(cursor) => {
                let changed = self.cursor != cursor;
                self.cursor = cursor;
                changed
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Updated(ConnectionId, PresenceRecord),
    Removed(ConnectionId),
}

/// Last-write-wins presence state of one room.
///
/// Updates only mark the participant dirty. [`PresenceTable::flush`] hands out
/// the latest record of every dirty participant, so a caller flushing on a
/// timer coalesces intermediate values but never loses the last one.
#[derive(Debug, Default)]
pub struct PresenceTable {
    records: BTreeMap<ConnectionId, PresenceRecord>,
    dirty: BTreeSet<ConnectionId>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection_id: ConnectionId) {
        self.records.entry(connection_id).or_default();
    }

    pub fn update(&mut self, connection_id: ConnectionId, update: PresenceUpdate) -> bool {
        let changed = self.records.entry(connection_id).or_default().merge(update);
        if changed {
            self.dirty.insert(connection_id);
        }
        changed
    }

    /// Forgets the participant. Any not yet flushed update is discarded with it.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<PresenceRecord> {
        self.dirty.remove(connection_id);
        self.records.remove(connection_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn flush(&mut self) -> Vec<PresenceChange> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|connection_id| {
                self.records
                    .get(&connection_id)
                    .map(|record| PresenceChange::Updated(connection_id, record.clone()))
            })
            .collect()
    }

    /// Applies a change received from the authority.
    pub fn apply(&mut self, change: PresenceChange) {
        match change {
            PresenceChange::Updated(connection_id, record) => {
                self.records.insert(connection_id, record);
            }
            PresenceChange::Removed(connection_id) => {
                self.records.remove(&connection_id);
            }
        }
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&PresenceRecord> {
        self.records.get(connection_id)
    }

    pub fn entries(&self) -> Vec<(ConnectionId, PresenceRecord)> {
        self.records
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    pub fn replace(&mut self, entries: Vec<(ConnectionId, PresenceRecord)>) {
        self.records = entries.into_iter().collect();
        self.dirty.clear();
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.dirty.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outgoing side of presence: keeps only the latest unsent value per field.
#[derive(Debug, Default)]
pub struct PresenceOutbox {
    identity: Option<Identity>,
    cursor: Option<Option<Point>>,
}

impl PresenceOutbox {
    pub fn push(&mut self, update: PresenceUpdate) {
        match update {
            PresenceUpdate::Identity(identity) => self.identity = Some(identity),
            PresenceUpdate::Cursor(cursor) => self.cursor = Some(cursor),
        }
    }

    pub fn drain(&mut self) -> Vec<PresenceUpdate> {
        let mut result = Vec::new();
        if let Some(identity) = self.identity.take() {
            result.push(PresenceUpdate::Identity(identity));
        }
        if let Some(cursor) = self.cursor.take() {
            result.push(PresenceUpdate::Cursor(cursor));
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.cursor.is_none()
    }

    pub fn clear(&mut self) {
        self.identity = None;
        self.cursor = None;
    }
}
