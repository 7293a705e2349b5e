mod utils;

use std::collections::VecDeque;

use canvas_system::{
    bincode, serde_json, ClientMessage, ClientSession, Codec, ConnectionId, Identity, Point,
    PresenceRecord, ServerMessage, Stroke, StrokeId,
};
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Browser binding of a [`ClientSession`].
///
/// The page owns the websocket. Every binary frame goes to `handle_message`,
/// a close goes to `connection_lost`, and frames from `take_outgoing_frame`
/// are sent until it returns nothing. State crosses back as JSON so the page
/// never has to free Rust objects.
#[wasm_bindgen]
pub struct CanvasSystem {
    session: ClientSession,
    outgoing: VecDeque<ClientMessage>,
}

#[derive(Serialize)]
struct PresenceView<'a> {
    connection_id: ConnectionId,
    #[serde(flatten)]
    record: &'a PresenceRecord,
}

#[derive(Serialize)]
struct DocumentView<'a> {
    strokes: &'a [Stroke],
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[wasm_bindgen]
impl CanvasSystem {
    /// Without a name, a random `user_xxxx` is picked.
    #[wasm_bindgen(constructor)]
    pub fn new(name: Option<String>, color: String) -> Self {
        utils::set_panic_hook();
        utils::init_logger();

        let identity = match name {
            Some(name) if !name.is_empty() => Identity { name, color },
            _ => Identity::random(color),
        };
        Self::with_identity(identity)
    }

    pub fn handle_message(&mut self, bytes: &[u8]) -> Result<(), JsValue> {
        let message = Codec::Bincode
            .decode::<ServerMessage>(bytes)
            .map_err(js_error)?;
        self.session.handle_message(message);
        Ok(())
    }

    pub fn connection_lost(&mut self) {
        self.outgoing.clear();
        self.session.connection_lost();
    }

    pub fn take_outgoing_frame(&mut self) -> Result<Option<Box<[u8]>>, JsValue> {
        match self.next_outgoing() {
            Some(message) => Ok(Some(
                bincode::serialize(&message)
                    .map_err(js_error)?
                    .into_boxed_slice(),
            )),
            None => Ok(None),
        }
    }

    pub fn has_outgoing_frames(&self) -> bool {
        !self.outgoing.is_empty() || self.session.has_outgoing()
    }

    pub fn begin_stroke(&mut self, color: &str, width: f32) -> Result<String, JsValue> {
        self.session
            .begin_stroke(color, width)
            .map(|id| id.to_string())
            .map_err(js_error)
    }

    pub fn append_point(&mut self, stroke_id: &str, x: f32, y: f32) -> Result<(), JsValue> {
        self.session
            .append_point(&StrokeId::from(stroke_id), Point::new(x, y))
            .map_err(js_error)
    }

    pub fn clear(&mut self) -> Result<(), JsValue> {
        self.session.clear().map_err(js_error)
    }

    pub fn set_cursor(&mut self, x: f32, y: f32) {
        self.session.set_cursor(Some(Point::new(x, y)));
    }

    /// For pointerleave.
    pub fn hide_cursor(&mut self) {
        self.session.set_cursor(None);
    }

    pub fn set_identity(&mut self, name: String, color: String) {
        self.session.set_identity(Identity { name, color });
    }

    pub fn status(&self) -> String {
        serde_json::to_value(self.session.status())
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.session.connection_id()
    }

    pub fn members(&self) -> usize {
        self.session.members()
    }

    pub fn identity_json(&self) -> String {
        serde_json::to_string(&self.session.identity()).unwrap_or_default()
    }

    /// The whole stroke list as JSON, or nothing if it has not changed since
    /// the last call.
    pub fn consume_document(&mut self) -> Option<String> {
        if self.session.consume_document_invalidated() {
            Some(self.document_json())
        } else {
            None
        }
    }

    /// Everyone else's presence as JSON, or nothing if unchanged.
    pub fn consume_presence(&mut self) -> Option<String> {
        if self.session.consume_presence_invalidated() {
            Some(self.presence_json())
        } else {
            None
        }
    }

    pub fn translate_message_to_json(&self, bytes: &[u8]) -> Result<String, JsValue> {
        let message = Codec::Bincode
            .decode::<ServerMessage>(bytes)
            .map_err(js_error)?;
        serde_json::to_string(&message).map_err(js_error)
    }
}

impl CanvasSystem {
    fn with_identity(identity: Identity) -> Self {
        Self {
            session: ClientSession::new(Some(identity)),
            outgoing: VecDeque::new(),
        }
    }

    fn next_outgoing(&mut self) -> Option<ClientMessage> {
        if self.outgoing.is_empty() && self.session.has_outgoing() {
            self.outgoing.extend(self.session.take_outgoing());
        }
        self.outgoing.pop_front()
    }

    fn document_json(&self) -> String {
        serde_json::to_string(&DocumentView {
            strokes: self.session.strokes(),
        })
        .unwrap_or_default()
    }

    fn presence_json(&self) -> String {
        let presence = self.session.remote_presence();
        let views: Vec<_> = presence
            .iter()
            .map(|(connection_id, record)| PresenceView {
                connection_id: *connection_id,
                record,
            })
            .collect();
        serde_json::to_string(&views).unwrap_or_default()
    }

    #[cfg(test)]
    fn session(&mut self) -> &mut ClientSession {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_system::DocumentSnapshot;

    fn synced() -> CanvasSystem {
        let mut system = CanvasSystem::with_identity(Identity {
            name: "user_beef".into(),
            color: "#e03131".into(),
        });
        let init = ServerMessage::Init {
            connection_id: 7,
            room_id: "demo".into(),
            snapshot: DocumentSnapshot {
                strokes: Vec::new(),
            },
            members: 1,
            presence: Vec::new(),
        };
        system
            .handle_message(&bincode::serialize(&init).unwrap())
            .unwrap();
        system
    }

    #[test]
    fn frames_are_drained_one_by_one() {
        let mut system = synced();
        assert_eq!(system.status(), "synced");

        // Identity announcement.
        assert!(system.has_outgoing_frames());
        let frame = system.take_outgoing_frame().unwrap().unwrap();
        assert!(matches!(
            bincode::deserialize::<ClientMessage>(&frame).unwrap(),
            ClientMessage::Presence(_)
        ));
        assert!(system.take_outgoing_frame().unwrap().is_none());
        assert!(!system.has_outgoing_frames());

        let stroke_id = system.begin_stroke("#000000", 3.0).unwrap();
        system.append_point(&stroke_id, 0.25, 0.75).unwrap();
        let mut frames = 0;
        while let Some(frame) = system.take_outgoing_frame().unwrap() {
            assert!(matches!(
                bincode::deserialize::<ClientMessage>(&frame).unwrap(),
                ClientMessage::Operation(_)
            ));
            frames += 1;
        }
        assert_eq!(frames, 2);
        assert!(!system.has_outgoing_frames());
    }

    #[test]
    fn document_is_reported_once_per_change() {
        let mut system = synced();
        let json = system.consume_document().unwrap();
        assert_eq!(json, r#"{"strokes":[]}"#);
        assert!(system.consume_document().is_none());

        system.begin_stroke("#000000", 3.0).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&system.consume_document().unwrap()).unwrap();
        assert_eq!(json["strokes"][0]["originator"], 7);
    }

    #[test]
    fn presence_is_flattened_for_the_page() {
        let mut system = synced();
        system.session().handle_message(ServerMessage::Presence {
            connection_id: 3,
            record: PresenceRecord {
                identity: Some(Identity {
                    name: "user_cafe".into(),
                    color: "#1971c2".into(),
                }),
                cursor: None,
            },
        });
        let json: serde_json::Value =
            serde_json::from_str(&system.consume_presence().unwrap()).unwrap();
        assert_eq!(json[0]["connection_id"], 3);
        assert_eq!(json[0]["identity"]["name"], "user_cafe");
        assert!(json[0]["cursor"].is_null());
    }

    #[test]
    fn connection_loss_drops_queued_frames() {
        let mut system = synced();
        system.begin_stroke("#000000", 3.0).unwrap();
        system.connection_lost();
        assert_eq!(system.status(), "reconnecting");
        assert!(!system.has_outgoing_frames());
        assert!(system.take_outgoing_frame().unwrap().is_none());
    }
}
