//! Match simulation modules

pub mod intent;
pub mod r#match;
pub mod physics;
pub mod snapshot;

pub use intent::apply_paddle_move;
pub use r#match::{GameMatch, MatchContext, MatchId, MatchRegistry};
pub use snapshot::GameStateView;
