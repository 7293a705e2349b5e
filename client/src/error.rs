use canvas_system::{CodecError, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("room id must not be empty")]
    EmptyRoomId,

    #[error("client task has stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, ClientError>;
