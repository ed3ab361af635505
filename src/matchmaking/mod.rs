//! Matchmaking: FIFO pairing of waiting connections

pub mod queue;
pub mod service;

pub use service::MatchmakingService;
