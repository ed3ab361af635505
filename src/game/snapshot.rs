//! Public match state broadcast to participants each tick

use serde::{Deserialize, Serialize};

use super::r#match::MatchState;

/// Ball position as seen by clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallPosition {
    pub x: f64,
    pub y: f64,
}

/// The `updateState` payload. Ball velocity is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateView {
    pub ball: BallPosition,
    pub left_paddle_y: f64,
    pub right_paddle_y: f64,
    pub left_score: u32,
    pub right_score: u32,
    /// Kept for the renderer; matches are never paused server-side
    pub is_paused: bool,
}

impl From<&MatchState> for GameStateView {
    fn from(state: &MatchState) -> Self {
        Self {
            ball: BallPosition {
                x: state.ball.x,
                y: state.ball.y,
            },
            left_paddle_y: state.left_paddle_y,
            right_paddle_y: state.right_paddle_y,
            left_score: state.left_score,
            right_score: state.right_score,
            is_paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::game::MatchId;
    use serde_json::json;

    #[test]
    fn view_serializes_public_fields_only() {
        let left = ConnectionId::new();
        let state = MatchState::new(MatchId::for_pairing(left), left, ConnectionId::new());

        let value = serde_json::to_value(GameStateView::from(&state)).unwrap();
        assert_eq!(
            value,
            json!({
                "ball": { "x": 400.0, "y": 300.0 },
                "leftPaddleY": 250.0,
                "rightPaddleY": 250.0,
                "leftScore": 0,
                "rightScore": 0,
                "isPaused": false
            })
        );
    }
}
