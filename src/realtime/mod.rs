//! Socket fan-out for messaging events.

mod event;
mod hub;
pub mod timeline;

pub use event::{ClientEvent, OutgoingMessage, ServerEvent, SocketSend};
pub use hub::{Hub, Registration};
