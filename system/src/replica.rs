use std::collections::{HashSet, VecDeque};

use crate::document::Document;
use crate::error::{ApplyError, MalformedOperation, ReplicaError};
use crate::message::DocumentSnapshot;
use crate::operation::{Operation, PointAppended, StrokeCreated};
use crate::types::{ConnectionId, Point, Stroke, StrokeId};

/// A participant's mirror of a room's document.
///
/// `confirmed` holds exactly what the authority relayed, in relay order.
/// Operations produced locally are applied to `view` right away and queued in
/// `pending` until their echo comes back. The view is always `confirmed` with
/// `pending` replayed on top, so local input shows up immediately while the
/// relative order of strokes still follows the authority.
pub struct ReplicaDocument {
    connection_id: ConnectionId,
    confirmed: Document,
    pending: VecDeque<Operation>,
    view: Document,
}

impl ReplicaDocument {
    pub fn new(connection_id: ConnectionId, snapshot: &DocumentSnapshot) -> Self {
        let confirmed = Document::from_snapshot(snapshot);
        log::debug!(
            "ReplicaDocument created for connection {} with {} strokes",
            connection_id,
            confirmed.len()
        );
        Self {
            connection_id,
            view: confirmed.clone(),
            confirmed,
            pending: VecDeque::new(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn begin_stroke(
        &mut self,
        color: &str,
        width: f32,
    ) -> Result<(Stroke, Operation), MalformedOperation> {
        let created = StrokeCreated {
            id: StrokeId::generate(),
            color: color.to_owned(),
            width,
            originator: self.connection_id,
        };
        let stroke = Stroke::from(&created);
        let operation = Operation::StrokeCreated(created);
        operation.validate()?;
        self.apply_local(operation.clone());
        Ok((stroke, operation))
    }

    /// Returns `None` when the stroke is not in the local view (for example
    /// because a clear raced the gesture) or belongs to someone else.
    pub fn append_point(&mut self, stroke_id: &StrokeId, point: Point) -> Option<Operation> {
        let stroke = match self.view.stroke(stroke_id) {
            Some(stroke) => stroke,
            None => {
                log::debug!("Dropping point for unknown stroke {}", stroke_id);
                return None;
            }
        };
        if stroke.originator != self.connection_id {
            log::warn!(
                "Stroke {} belongs to connection {}, not appending",
                stroke_id,
                stroke.originator
            );
            return None;
        }
        let operation = Operation::PointAppended(PointAppended {
            stroke_id: stroke_id.clone(),
            index: stroke.points.len(),
            point: Point::new(point.x, point.y),
        });
        self.apply_local(operation.clone());
        Some(operation)
    }

    pub fn clear(&mut self) -> Operation {
        let operation = Operation::Clear;
        self.apply_local(operation.clone());
        operation
    }

    fn apply_local(&mut self, operation: Operation) {
        if let Err(e) = self.view.apply(&operation) {
            log::warn!("Local operation did not apply to the view: {}", e);
        }
        self.pending.push_back(operation);
    }

    /// Merges an operation relayed by the authority. Returns whether the
    /// visible document changed.
    pub fn apply_remote_operation(
        &mut self,
        origin: ConnectionId,
        operation: &Operation,
    ) -> Result<bool, ReplicaError> {
        if origin == self.connection_id {
            if let Some(pos) = self.pending.iter().position(|p| p == operation) {
                return self.confirm(pos, operation);
            }
            log::debug!("Echo without a pending counterpart: {:?}", operation);
        }

        match self.confirmed.apply(operation) {
            Ok(_) => {}
            Err(ApplyError::UnknownStroke(stroke_id)) => {
                log::info!("Ignoring operation for unknown stroke {}", stroke_id);
                return Ok(false);
            }
            Err(e @ ApplyError::OutOfSequence { .. }) => {
                log::warn!("Replica has a gap: {}", e);
                return Err(ReplicaError::ResyncRequired(e));
            }
        }

        match operation {
            Operation::Clear => {
                self.prune_unreachable_points();
                self.rebuild_view();
            }
            _ if self.pending.is_empty() => {
                let _ = self.view.apply(operation);
            }
            // Strokes of other authors hold the same points in the view.
            Operation::PointAppended(_) if origin != self.connection_id => {
                let _ = self.view.apply(operation);
            }
            // Pending points never move strokes, so a new stroke lands last in
            // the view as well.
            Operation::StrokeCreated(_)
                if origin != self.connection_id && self.only_points_pending() =>
            {
                let _ = self.view.apply(operation);
            }
            // Pending strokes must stay behind confirmed ones, and an unmatched
            // echo of our own point may take an index a pending point claims.
            _ => self.rebuild_view(),
        }
        Ok(true)
    }

    fn confirm(&mut self, pos: usize, operation: &Operation) -> Result<bool, ReplicaError> {
        // Anything queued before the echoed operation was dropped by the authority.
        let dropped = self.pending.drain(..pos).count();
        self.pending.pop_front();
        if let Err(e) = self.confirmed.apply(operation) {
            log::warn!("Confirmed operation did not apply: {}", e);
        }
        if dropped > 0 {
            log::info!("{} local operations were not accepted by the authority", dropped);
            self.rebuild_view();
            return Ok(true);
        }
        Ok(false)
    }

    /// After a clear from someone else, appends to strokes that existed before
    /// it can never be accepted.
    fn prune_unreachable_points(&mut self) {
        let mut created = HashSet::new();
        self.pending.retain(|operation| match operation {
            Operation::StrokeCreated(c) => {
                created.insert(c.id.clone());
                true
            }
            Operation::PointAppended(p) => created.contains(&p.stroke_id),
            Operation::Clear => true,
        });
    }

    fn only_points_pending(&self) -> bool {
        self.pending
            .iter()
            .all(|operation| matches!(operation, Operation::PointAppended(_)))
    }

    fn rebuild_view(&mut self) {
        let mut view = self.confirmed.clone();
        for operation in &self.pending {
            let _ = view.apply(operation);
        }
        self.view = view;
    }

    pub fn strokes(&self) -> &[Stroke] {
        self.view.strokes()
    }

    pub fn stroke(&self, stroke_id: &StrokeId) -> Option<&Stroke> {
        self.view.stroke(stroke_id)
    }

    pub fn confirmed(&self) -> &Document {
        &self.confirmed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> DocumentSnapshot {
        DocumentSnapshot {
            strokes: Vec::new(),
        }
    }

    fn remote_create(id: &str, originator: ConnectionId) -> Operation {
        Operation::StrokeCreated(StrokeCreated {
            id: id.into(),
            color: "#333".into(),
            width: 2.0,
            originator,
        })
    }

    fn ids(replica: &ReplicaDocument) -> Vec<String> {
        replica
            .strokes()
            .iter()
            .map(|s| s.id.to_string())
            .collect()
    }

    #[test]
    fn local_input_is_visible_before_confirmation() {
        let mut replica = ReplicaDocument::new(1, &empty());
        let (stroke, _) = replica.begin_stroke("#000", 4.0).unwrap();
        replica.append_point(&stroke.id, Point::new(0.1, 0.1)).unwrap();

        assert_eq!(replica.strokes().len(), 1);
        assert_eq!(replica.strokes()[0].points.len(), 1);
        assert!(replica.confirmed().is_empty());
        assert_eq!(replica.pending_len(), 2);
    }

    #[test]
    fn own_echo_does_not_duplicate() {
        let mut replica = ReplicaDocument::new(1, &empty());
        let (stroke, created) = replica.begin_stroke("#000", 4.0).unwrap();
        let appended = replica
            .append_point(&stroke.id, Point::new(0.2, 0.2))
            .unwrap();

        replica.apply_remote_operation(1, &created).unwrap();
        replica.apply_remote_operation(1, &appended).unwrap();

        assert_eq!(replica.pending_len(), 0);
        assert_eq!(replica.strokes().len(), 1);
        assert_eq!(replica.strokes()[0].points, vec![Point::new(0.2, 0.2)]);
        assert_eq!(replica.confirmed().strokes(), replica.strokes());
    }

    #[test]
    fn concurrent_strokes_follow_authority_order() {
        let mut replica = ReplicaDocument::new(1, &empty());
        let (_, mine) = replica.begin_stroke("#000", 4.0).unwrap();
        let mine_id = mine.stroke_id().unwrap().to_string();

        // The authority received the other participant's stroke first.
        replica
            .apply_remote_operation(2, &remote_create("theirs", 2))
            .unwrap();
        assert_eq!(ids(&replica), vec!["theirs".to_string(), mine_id.clone()]);

        replica.apply_remote_operation(1, &mine).unwrap();
        assert_eq!(ids(&replica), vec!["theirs".to_string(), mine_id]);
        assert_eq!(replica.pending_len(), 0);
    }

    #[test]
    fn unmatched_own_echo_replaces_the_local_point() {
        // Resynced while a point sent over the old snapshot was in flight.
        let mut replica = ReplicaDocument::new(1, &empty());
        let (stroke, created) = replica.begin_stroke("#000", 4.0).unwrap();
        replica.apply_remote_operation(1, &created).unwrap();
        let mut replica = ReplicaDocument::new(
            1,
            &DocumentSnapshot {
                strokes: replica.confirmed().strokes().to_vec(),
            },
        );

        replica.append_point(&stroke.id, Point::new(0.9, 0.9)).unwrap();
        let in_flight = Operation::PointAppended(PointAppended {
            stroke_id: stroke.id.clone(),
            index: 0,
            point: Point::new(0.1, 0.1),
        });
        assert!(replica.apply_remote_operation(1, &in_flight).unwrap());

        assert_eq!(replica.strokes()[0].points, vec![Point::new(0.1, 0.1)]);
        assert_eq!(replica.confirmed().strokes(), replica.strokes());

        // The next local point continues after the echoed one.
        let next = replica
            .append_point(&stroke.id, Point::new(0.2, 0.2))
            .unwrap();
        assert!(matches!(next, Operation::PointAppended(PointAppended { index: 1, .. })));
    }

    #[test]
    fn remote_stroke_during_a_gesture_keeps_local_points() {
        let mut replica = ReplicaDocument::new(1, &empty());
        let (stroke, created) = replica.begin_stroke("#000", 4.0).unwrap();
        replica.apply_remote_operation(1, &created).unwrap();
        let appended = replica
            .append_point(&stroke.id, Point::new(0.3, 0.3))
            .unwrap();

        replica
            .apply_remote_operation(2, &remote_create("theirs", 2))
            .unwrap();
        assert_eq!(ids(&replica), vec![stroke.id.to_string(), "theirs".to_string()]);
        assert_eq!(replica.strokes()[0].points, vec![Point::new(0.3, 0.3)]);

        replica.apply_remote_operation(1, &appended).unwrap();
        assert_eq!(replica.pending_len(), 0);
        assert_eq!(replica.confirmed().strokes(), replica.strokes());
    }

    #[test]
    fn append_to_unknown_stroke_is_a_no_op() {
        let mut replica = ReplicaDocument::new(1, &empty());
        assert!(replica
            .append_point(&"ghost".into(), Point::new(0.5, 0.5))
            .is_none());
        assert!(replica.strokes().is_empty());
        assert_eq!(replica.pending_len(), 0);
    }

    #[test]
    fn foreign_strokes_are_not_appended_to() {
        let mut replica = ReplicaDocument::new(1, &empty());
        replica
            .apply_remote_operation(2, &remote_create("theirs", 2))
            .unwrap();
        assert!(replica
            .append_point(&"theirs".into(), Point::new(0.5, 0.5))
            .is_none());
    }

    #[test]
    fn remote_clear_drops_points_the_authority_will_reject() {
        let mut replica = ReplicaDocument::new(1, &empty());
        let (stroke, created) = replica.begin_stroke("#000", 4.0).unwrap();
        replica.apply_remote_operation(1, &created).unwrap();

        // Point is in flight when someone else clears.
        replica.append_point(&stroke.id, Point::new(0.1, 0.1)).unwrap();
        replica.apply_remote_operation(2, &Operation::Clear).unwrap();

        assert!(replica.strokes().is_empty());
        assert_eq!(replica.pending_len(), 0);
        assert!(replica
            .append_point(&stroke.id, Point::new(0.2, 0.2))
            .is_none());
    }

    #[test]
    fn remote_clear_keeps_strokes_created_afterwards() {
        let mut replica = ReplicaDocument::new(1, &empty());
        replica
            .apply_remote_operation(2, &remote_create("old", 2))
            .unwrap();
        let (stroke, created) = replica.begin_stroke("#000", 4.0).unwrap();
        let appended = replica
            .append_point(&stroke.id, Point::new(0.4, 0.4))
            .unwrap();

        replica.apply_remote_operation(2, &Operation::Clear).unwrap();
        assert_eq!(ids(&replica), vec![stroke.id.to_string()]);

        replica.apply_remote_operation(1, &created).unwrap();
        replica.apply_remote_operation(1, &appended).unwrap();
        assert_eq!(replica.confirmed().strokes(), replica.strokes());
    }

    #[test]
    fn skipped_echo_is_treated_as_rejected() {
        let mut replica = ReplicaDocument::new(1, &empty());
        let (first, _) = replica.begin_stroke("#000", 4.0).unwrap();
        let (_, second) = replica.begin_stroke("#111", 4.0).unwrap();

        replica.apply_remote_operation(1, &second).unwrap();

        assert_eq!(replica.pending_len(), 0);
        assert!(replica.stroke(&first.id).is_none());
        assert_eq!(replica.strokes().len(), 1);
    }

    #[test]
    fn gap_requires_resync() {
        let mut replica = ReplicaDocument::new(1, &empty());
        replica
            .apply_remote_operation(2, &remote_create("theirs", 2))
            .unwrap();
        let result = replica.apply_remote_operation(
            2,
            &Operation::PointAppended(PointAppended {
                stroke_id: "theirs".into(),
                index: 3,
                point: Point::new(0.1, 0.1),
            }),
        );
        assert!(matches!(result, Err(ReplicaError::ResyncRequired(_))));
    }

    #[test]
    fn invalid_local_stroke_is_rejected() {
        let mut replica = ReplicaDocument::new(1, &empty());
        assert_eq!(
            replica.begin_stroke("", 4.0).map(|_| ()),
            Err(MalformedOperation::EmptyColor)
        );
        assert!(replica.strokes().is_empty());
    }
}
