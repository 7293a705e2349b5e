use crate::error::MalformedOperation;
use crate::types::{ConnectionId, Point, Stroke, StrokeId};
use serde::{Deserialize, Serialize};

/// A replicated mutation of a room's document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    StrokeCreated(StrokeCreated),
    PointAppended(PointAppended),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeCreated {
    pub id: StrokeId,
    pub color: String,
    pub width: f32,
    pub originator: ConnectionId,
}

/// `index` is the position the point takes inside its stroke. It makes
/// re-delivery of the same append harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointAppended {
    pub stroke_id: StrokeId,
    pub index: usize,
    pub point: Point,
}

impl Operation {
    pub fn validate(&self) -> Result<(), MalformedOperation> {
        match self {
            Operation::StrokeCreated(created) => {
                if created.id.is_empty() {
                    return Err(MalformedOperation::EmptyStrokeId);
                }
                if created.color.trim().is_empty() {
                    return Err(MalformedOperation::EmptyColor);
                }
                if !created.width.is_finite() || created.width <= 0.0 {
                    return Err(MalformedOperation::InvalidWidth(created.width));
                }
                Ok(())
            }
            Operation::PointAppended(appended) => {
                if appended.stroke_id.is_empty() {
                    return Err(MalformedOperation::EmptyStrokeId);
                }
                if !appended.point.is_valid() {
                    return Err(MalformedOperation::PointOutOfRange {
                        x: appended.point.x,
                        y: appended.point.y,
                    });
                }
                Ok(())
            }
            Operation::Clear => Ok(()),
        }
    }

    pub fn stroke_id(&self) -> Option<&StrokeId> {
        match self {
            Operation::StrokeCreated(created) => Some(&created.id),
            Operation::PointAppended(appended) => Some(&appended.stroke_id),
            Operation::Clear => None,
        }
    }
}

impl From<&StrokeCreated> for Stroke {
    fn from(created: &StrokeCreated) -> Self {
        Stroke {
            id: created.id.clone(),
            color: created.color.clone(),
            width: created.width,
            points: Vec::new(),
            originator: created.originator,
        }
    }
}
