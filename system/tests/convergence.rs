use std::collections::BTreeMap;

use canvas_system::{
    ClientMessage, ClientSession, ConnectionId, Envelope, Identity, Point, RoomAuthority,
    SessionStatus, Stroke,
};

/// One room and its participants, wired together without a transport.
struct Room {
    authority: RoomAuthority,
    sessions: BTreeMap<ConnectionId, ClientSession>,
}

impl Room {
    fn new(room_id: &str) -> Self {
        Self {
            authority: RoomAuthority::new(room_id.into()),
            sessions: BTreeMap::new(),
        }
    }

    fn join(&mut self, connection_id: ConnectionId, name: &str) {
        let identity = Identity {
            name: name.into(),
            color: "#000000".into(),
        };
        self.sessions
            .insert(connection_id, ClientSession::new(Some(identity)));
        let envelopes = self.authority.join(connection_id);
        self.deliver(envelopes);
    }

    fn leave(&mut self, connection_id: ConnectionId) {
        self.sessions.remove(&connection_id);
        let envelopes = self.authority.leave(connection_id);
        self.deliver(envelopes);
    }

    fn deliver(&mut self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            for recipient in envelope.recipients {
                if let Some(session) = self.sessions.get_mut(&recipient) {
                    session.handle_message(envelope.message.clone());
                }
            }
        }
    }

    /// Sends whatever `connection_id` has queued and delivers the results.
    fn pump(&mut self, connection_id: ConnectionId) {
        let outgoing = match self.sessions.get_mut(&connection_id) {
            Some(session) => session.take_outgoing(),
            None => return,
        };
        for message in outgoing {
            let envelopes = match message {
                ClientMessage::Operation(operation) => self
                    .authority
                    .apply_operation(connection_id, operation)
                    .map(|e| vec![e])
                    .unwrap_or_default(),
                ClientMessage::Presence(update) => {
                    self.authority.update_presence(connection_id, update);
                    Vec::new()
                }
                ClientMessage::Resync => self.authority.resync(connection_id).into_iter().collect(),
            };
            self.deliver(envelopes);
        }
        let presence = self.authority.flush_presence();
        self.deliver(presence);
    }

    fn session(&mut self, connection_id: ConnectionId) -> &mut ClientSession {
        self.sessions.get_mut(&connection_id).unwrap()
    }

    fn strokes(&self, connection_id: ConnectionId) -> Vec<Stroke> {
        self.sessions[&connection_id].strokes().to_vec()
    }
}

#[test]
fn end_to_end_demo_scenario() {
    let mut room = Room::new("demo");
    room.join(1, "a");
    assert_eq!(room.session(1).status(), SessionStatus::Synced);
    assert!(room.strokes(1).is_empty());

    let s1 = room.session(1).begin_stroke("#000", 4.0).unwrap();
    room.session(1)
        .append_point(&s1, Point::new(0.1, 0.1))
        .unwrap();
    room.session(1)
        .append_point(&s1, Point::new(0.2, 0.2))
        .unwrap();
    room.pump(1);

    room.join(2, "b");
    let b_strokes = room.strokes(2);
    assert_eq!(b_strokes.len(), 1);
    assert_eq!(b_strokes[0].id, s1);
    assert_eq!(
        b_strokes[0].points,
        vec![Point::new(0.1, 0.1), Point::new(0.2, 0.2)]
    );

    room.session(1).clear().unwrap();
    room.pump(1);
    assert!(room.strokes(2).is_empty());

    let s2 = room.session(1).begin_stroke("#f00", 2.0).unwrap();
    room.pump(1);
    for connection_id in [1, 2] {
        let strokes = room.strokes(connection_id);
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].id, s2);
    }
    assert_eq!(room.strokes(1), room.authority.document().strokes());
}

#[test]
fn concurrent_writers_converge_to_authority_order() {
    let mut room = Room::new("race");
    room.join(1, "a");
    room.join(2, "b");
    room.join(3, "c");

    let a = room.session(1).begin_stroke("#111", 3.0).unwrap();
    let b = room.session(2).begin_stroke("#222", 3.0).unwrap();
    for i in 0..5 {
        let p = Point::new(i as f32 / 10.0, 0.5);
        room.session(1).append_point(&a, p).unwrap();
        room.session(2).append_point(&b, p).unwrap();
    }

    // B's messages reach the authority before A's.
    room.pump(2);
    room.pump(1);

    let canonical = room.authority.document().strokes().to_vec();
    assert_eq!(canonical.len(), 2);
    assert_eq!(canonical[0].id, b);
    for connection_id in [1, 2, 3] {
        assert_eq!(room.strokes(connection_id), canonical);
    }
}

#[test]
fn late_joiner_sees_history_then_live_operations() {
    let mut room = Room::new("history");
    room.join(1, "a");
    for _ in 0..3 {
        room.session(1).begin_stroke("#000", 1.0).unwrap();
    }
    room.pump(1);

    room.join(2, "b");
    assert_eq!(room.strokes(2).len(), 3);

    let live = room.session(1).begin_stroke("#000", 1.0).unwrap();
    room.pump(1);
    let strokes = room.strokes(2);
    assert_eq!(strokes.len(), 4);
    assert_eq!(strokes[3].id, live);
    assert_eq!(strokes, room.strokes(1));
}

#[test]
fn presence_converges_to_the_latest_cursor() {
    let mut room = Room::new("cursors");
    room.join(1, "a");
    room.join(2, "b");
    room.pump(1);
    room.pump(2);

    room.session(1).set_cursor(Some(Point::new(0.1, 0.2)));
    room.pump(1);
    room.session(1).set_cursor(Some(Point::new(0.3, 0.4)));
    room.pump(1);

    let seen = room.session(2).remote_presence();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1.cursor, Some(Point::new(0.3, 0.4)));
    assert_eq!(seen[0].1.identity.as_ref().unwrap().name, "a");

    room.session(1).set_cursor(None);
    room.pump(1);
    assert_eq!(room.session(2).remote_presence()[0].1.cursor, None);

    room.leave(1);
    assert!(room.session(2).remote_presence().is_empty());
    assert_eq!(room.session(2).members(), 1);
}

#[test]
fn resync_after_channel_loss_matches_authority() {
    let mut room = Room::new("flaky");
    room.join(1, "a");
    room.join(2, "b");
    let s = room.session(1).begin_stroke("#000", 1.0).unwrap();
    room.pump(1);

    room.session(2).connection_lost();
    room.session(1)
        .append_point(&s, Point::new(0.9, 0.9))
        .unwrap();
    room.pump(1);

    let envelopes = room.authority.resync(2).into_iter().collect();
    room.deliver(envelopes);
    assert_eq!(room.session(2).status(), SessionStatus::Synced);
    assert_eq!(room.strokes(2), room.authority.document().strokes());
}
