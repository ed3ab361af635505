//! WebSocket protocol message definitions for the game channel
//!
//! Every frame is a JSON text message of the form `{"event": ..., "data": ...}`.
//! Event names and payload field names are camelCase to match the browser client.

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::game::{GameStateView, MatchId};

/// Which end of the court a participant defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// First player out of the queue, paddle at x 40..60
    Left,
    /// Second player out of the queue, paddle at x 740..760
    Right,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Enter the matchmaking queue
    JoinQueue,

    /// Move the sender's paddle to an absolute vertical position
    MovePaddle {
        /// Paddle top in court units; not clamped by the server
        y: f64,
    },

    /// Leave the matchmaking queue before being paired
    LeaveQueue,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Sent once after the socket is registered
    Welcome {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },

    /// Two queued connections were paired into a match
    MatchFound {
        #[serde(rename = "roomId")]
        room_id: MatchId,
        opponent: ConnectionId,
        side: Side,
    },

    /// Public match state, sent every tick
    UpdateState(GameStateView),

    /// Match is over; sent exactly once per match
    GameOver { winner: ConnectionId },
}
