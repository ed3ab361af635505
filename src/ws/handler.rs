//! WebSocket upgrade handler for the game channel

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::app::AppState;
use crate::connection::ConnectionId;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::tick_duration;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, outbound_rx) = state.matchmaking.connect();

    let (ws_sink, ws_stream) = socket.split();
    let gate = InboundGate::new(ConnectionRateLimiter::new(state.config.input_rate_limit));

    run_session(connection_id, &state, ws_sink, ws_stream, outbound_rx, gate).await;

    // Cleanup on disconnect
    state.matchmaking.disconnect(connection_id);
}

/// Rate limit for inbound client messages.
///
/// Queue control always passes. Paddle moves over quota are not lost: the
/// latest one is held and released by [`InboundGate::flush`] on the next tick.
pub struct InboundGate {
    limiter: ConnectionRateLimiter,
    pending_move: Option<f64>,
}

impl InboundGate {
    pub fn new(limiter: ConnectionRateLimiter) -> Self {
        Self {
            limiter,
            pending_move: None,
        }
    }

    /// The message to act on now, if any
    pub fn admit(&mut self, msg: ClientMsg) -> Option<ClientMsg> {
        match msg {
            ClientMsg::MovePaddle { y } => {
                if self.limiter.check_input() {
                    // Anything held back is older than this move
                    self.pending_move = None;
                    Some(msg)
                } else {
                    self.pending_move = Some(y);
                    None
                }
            }
            ClientMsg::JoinQueue | ClientMsg::LeaveQueue => Some(msg),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending_move.is_some()
    }

    /// Release the held-back paddle move
    pub fn flush(&mut self) -> Option<ClientMsg> {
        self.pending_move.take().map(|y| ClientMsg::MovePaddle { y })
    }
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection_id: ConnectionId,
    state: &AppState,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    mut gate: InboundGate,
) {
    // Spawn writer task: outbound channel -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut flush_interval = interval(tick_duration());
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Reader loop: WebSocket -> matchmaking / match
    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                let Some(result) = frame else { break };
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(client_msg) => match gate.admit(client_msg) {
                            Some(msg) => state.matchmaking.handle_message(connection_id, msg),
                            None => trace!(connection_id = %connection_id, "Paddle move held back by rate limit"),
                        },
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                        }
                    },
                    Ok(Message::Binary(_)) => {
                        warn!(connection_id = %connection_id, "Received binary message, ignoring");
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        info!(connection_id = %connection_id, "Client initiated close");
                        break;
                    }
                    Err(e) => {
                        error!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            _ = flush_interval.tick(), if gate.has_pending() => {
                if let Some(msg) = gate.flush() {
                    state.matchmaking.handle_message(connection_id, msg);
                }
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
