//! Matchmaking service - owns the queue, creates matches, routes client messages

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionId;
use crate::game::{apply_paddle_move, GameMatch, MatchContext};
use crate::ws::protocol::{ClientMsg, ServerMsg, Side};

use super::queue::{MatchmakingQueue, Pairing};

/// Matchmaking service
pub struct MatchmakingService {
    /// Also serializes match creation, so "queued" and "matched" never overlap
    queue: Mutex<MatchmakingQueue>,
    ctx: MatchContext,
    forfeit_on_disconnect: bool,
}

impl MatchmakingService {
    pub fn new(ctx: MatchContext, forfeit_on_disconnect: bool) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new()),
            ctx,
            forfeit_on_disconnect,
        }
    }

    /// Register a new socket and greet it with its connection id
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMsg>) {
        let (connection_id, outbound_rx) = self.ctx.connections.connect();
        self.ctx
            .connections
            .send(connection_id, ServerMsg::Welcome { connection_id });

        info!(connection_id = %connection_id, "Connection opened");
        (connection_id, outbound_rx)
    }

    /// Tear down a socket: leave the queue, and forfeit any match in progress
    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.ctx.connections.disconnect(connection_id);
        let was_queued = self.queue.lock().dequeue(connection_id).is_some();

        if self.ctx.matches.is_matched(connection_id) {
            if self.forfeit_on_disconnect {
                self.ctx.matches.forfeit(connection_id);
            } else {
                warn!(
                    connection_id = %connection_id,
                    "Participant disconnected, match continues without them"
                );
            }
        }

        info!(connection_id = %connection_id, was_queued, "Connection closed");
    }

    /// Dispatch one game-channel message from a client
    pub fn handle_message(&self, connection_id: ConnectionId, msg: ClientMsg) {
        match msg {
            ClientMsg::JoinQueue => {
                self.join_queue(connection_id);
            }
            ClientMsg::LeaveQueue => {
                self.leave_queue(connection_id);
            }
            ClientMsg::MovePaddle { y } => {
                apply_paddle_move(&self.ctx.matches, connection_id, y);
            }
        }
    }

    /// Join matchmaking queue, pairing immediately if an opponent is waiting.
    /// Returns false (and does nothing) if the connection is gone, queued, or playing.
    pub fn join_queue(&self, connection_id: ConnectionId) -> bool {
        let mut queue = self.queue.lock();

        if !self.ctx.connections.is_connected(connection_id) {
            debug!(connection_id = %connection_id, "Join from closed connection ignored");
            return false;
        }
        if self.ctx.matches.is_matched(connection_id) {
            debug!(connection_id = %connection_id, "Join while in a match ignored");
            return false;
        }
        if !queue.enqueue(connection_id) {
            debug!(connection_id = %connection_id, "Already queued");
            return false;
        }

        info!(connection_id = %connection_id, queue_size = queue.len(), "Joined matchmaking queue");

        let connections = &self.ctx.connections;
        while let Some(pairing) = queue.try_pair(|id| connections.is_connected(id)) {
            self.create_match(pairing);
        }

        true
    }

    /// Leave matchmaking queue
    pub fn leave_queue(&self, connection_id: ConnectionId) -> bool {
        let left = self.queue.lock().dequeue(connection_id).is_some();
        if left {
            info!(connection_id = %connection_id, "Left matchmaking queue");
        }
        left
    }

    /// Create a match for a pair and tell both players
    fn create_match(&self, pairing: Pairing) {
        let left = pairing.left.connection_id;
        let right = pairing.right.connection_id;

        let Some((handle, _task)) = GameMatch::spawn(left, right, &self.ctx) else {
            error!(left = %left, right = %right, "Failed to create match");
            return;
        };

        info!(
            match_id = %handle.id,
            left = %left,
            right = %right,
            left_waited_ms = pairing.left.wait_time().as_millis() as u64,
            "Created new match"
        );

        for (participant, opponent, side) in [(left, right, Side::Left), (right, left, Side::Right)] {
            self.ctx.connections.send(
                participant,
                ServerMsg::MatchFound {
                    room_id: handle.id.clone(),
                    opponent,
                    side,
                },
            );
        }
    }

    /// Get current queue size
    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }
}
