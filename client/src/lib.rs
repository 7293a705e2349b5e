pub extern crate canvas_system;

mod error;
mod sync;

pub use error::*;
pub use sync::{
    spawn_client, CanvasView, ClientCommand, ClientConfig, ClientEvent, ClientHandle,
};
