pub extern crate bincode;
pub extern crate serde;
pub extern crate serde_json;
pub extern crate uuid;

mod authority;
mod client_session;
mod document;
mod error;
mod message;
mod operation;
mod presence;
mod replica;
mod types;

pub use authority::*;
pub use client_session::*;
pub use document::*;
pub use error::*;
pub use message::*;
pub use operation::*;
pub use presence::*;
pub use replica::*;
pub use types::*;
