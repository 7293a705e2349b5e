use serde::{Deserialize, Serialize};
use std::fmt;

pub type ConnectionId = u32;
pub type RoomId = String;

/// Stroke ids are chosen by the participant that starts the stroke.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeId(String);

impl StrokeId {
    pub fn generate() -> Self {
        StrokeId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for StrokeId {
    fn from(s: &str) -> Self {
        StrokeId(s.to_owned())
    }
}

impl From<String> for StrokeId {
    fn from(s: String) -> Self {
        StrokeId(s)
    }
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolution independent position on the canvas. Both axes live in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Clamps into the unit square. Input adapters are expected to call this.
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    pub color: String,
    pub width: f32,
    pub points: Vec<Point>,
    pub originator: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub color: String,
}

impl Identity {
    /// `user_xxxx` with a short random suffix.
    pub fn random(color: impl Into<String>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            name: format!("user_{}", &suffix[..4]),
            color: color.into(),
        }
    }
}
