use std::collections::HashMap;

use crate::error::ApplyError;
use crate::message::DocumentSnapshot;
use crate::operation::{Operation, PointAppended, StrokeCreated};
use crate::types::{Stroke, StrokeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Already reflected in the document. Nothing changed.
    Duplicate,
}

/// Strokes of one room in authority arrival order.
///
/// Both the authority and every replica mutate their copy only through
/// [`Document::apply`], so the same operations in the same order always give
/// the same strokes.
#[derive(Debug, Clone, Default)]
pub struct Document {
    strokes: Vec<Stroke>,
    idx_by_stroke_id: HashMap<StrokeId, usize>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Self {
        let mut document = Self::new();
        for stroke in &snapshot.strokes {
            if document.idx_by_stroke_id.contains_key(&stroke.id) {
                log::warn!("Snapshot contains stroke {} twice", stroke.id);
                continue;
            }
            document
                .idx_by_stroke_id
                .insert(stroke.id.clone(), document.strokes.len());
            document.strokes.push(stroke.clone());
        }
        document
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            strokes: self.strokes.clone(),
        }
    }

    pub fn apply(&mut self, operation: &Operation) -> Result<ApplyOutcome, ApplyError> {
        match operation {
            Operation::StrokeCreated(created) => Ok(self.create_stroke(created)),
            Operation::PointAppended(appended) => self.append_point(appended),
            Operation::Clear => {
                self.strokes.clear();
                self.idx_by_stroke_id.clear();
                Ok(ApplyOutcome::Applied)
            }
        }
    }

    fn create_stroke(&mut self, created: &StrokeCreated) -> ApplyOutcome {
        if self.idx_by_stroke_id.contains_key(&created.id) {
            return ApplyOutcome::Duplicate;
        }
        self.idx_by_stroke_id
            .insert(created.id.clone(), self.strokes.len());
        self.strokes.push(created.into());
        ApplyOutcome::Applied
    }

    fn append_point(&mut self, appended: &PointAppended) -> Result<ApplyOutcome, ApplyError> {
        let stroke = self
            .idx_by_stroke_id
            .get(&appended.stroke_id)
            .and_then(|idx| self.strokes.get_mut(*idx))
            .ok_or_else(|| ApplyError::UnknownStroke(appended.stroke_id.clone()))?;

        let len = stroke.points.len();
        if appended.index < len {
            Ok(ApplyOutcome::Duplicate)
        } else if appended.index == len {
            stroke.points.push(appended.point);
            Ok(ApplyOutcome::Applied)
        } else {
            Err(ApplyError::OutOfSequence {
                stroke_id: appended.stroke_id.clone(),
                expected: len,
                got: appended.index,
            })
        }
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn stroke(&self, stroke_id: &StrokeId) -> Option<&Stroke> {
        self.idx_by_stroke_id
            .get(stroke_id)
            .and_then(|idx| self.strokes.get(*idx))
    }

    pub fn contains(&self, stroke_id: &StrokeId) -> bool {
        self.idx_by_stroke_id.contains_key(stroke_id)
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.strokes == other.strokes
    }
}
