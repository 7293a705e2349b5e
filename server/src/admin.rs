use canvas_system::{RoomDescription, RoomId};
use tokio::sync::oneshot::Sender;

#[derive(Debug)]
pub enum AdminCommand {
    ListRooms {
        tx: Sender<Vec<RoomDescription>>,
    },
    DescribeRoom {
        room_id: RoomId,
        tx: Sender<Option<RoomDescription>>,
    },
}
