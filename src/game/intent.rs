//! Routing of paddle intents into running matches

use tracing::trace;

use crate::connection::ConnectionId;

use super::r#match::{MatchCommand, MatchRegistry};

/// Forward a paddle position from `connection_id` to its match.
///
/// The side is derived from the sender's own seat, so a participant can only ever
/// move their own paddle. The position is not validated and nothing is sent back.
/// Returns false if the sender is not in a running match.
pub fn apply_paddle_move(registry: &MatchRegistry, connection_id: ConnectionId, y: f64) -> bool {
    let Some(handle) = registry.match_for(connection_id) else {
        trace!(connection_id = %connection_id, "Paddle move outside a match ignored");
        return false;
    };
    let Some(side) = handle.side_of(connection_id) else {
        return false;
    };
    handle.send(MatchCommand::MovePaddle { side, y })
}
