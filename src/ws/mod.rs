//! WebSocket game channel

pub mod handler;
pub mod protocol;
