//! WebSocket transport for client sessions

pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
