use crate::types::{ConnectionId, StrokeId};
use thiserror::Error;

/// An operation that is missing data or carries values outside the model.
/// Dropped where it is received, never applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedOperation {
    #[error("stroke id is empty")]
    EmptyStrokeId,
    #[error("stroke color is empty")]
    EmptyColor,
    #[error("stroke width {0} is not a positive finite number")]
    InvalidWidth(f32),
    #[error("point ({x}, {y}) is outside the unit square")]
    PointOutOfRange { x: f32, y: f32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("unknown stroke {0}")]
    UnknownStroke(StrokeId),
    #[error("point {got} of stroke {stroke_id} arrived before point {expected}")]
    OutOfSequence {
        stroke_id: StrokeId,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaError {
    /// The replica missed something and must be rebuilt from a snapshot.
    #[error("replica diverged from the authority: {0}")]
    ResyncRequired(ApplyError),
}

/// Why the authority dropped an operation instead of relaying it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectedOperation {
    #[error("connection {0} is not a member of the room")]
    NotAMember(ConnectionId),
    #[error("malformed operation: {0}")]
    Malformed(#[from] MalformedOperation),
    #[error("stroke {stroke_id} belongs to connection {owner}")]
    ForeignStroke {
        stroke_id: StrokeId,
        owner: ConnectionId,
    },
    #[error("operation is already reflected in the document")]
    Duplicate,
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("not synchronized with a room yet")]
    NotSynced,
    #[error(transparent)]
    Malformed(#[from] MalformedOperation),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
