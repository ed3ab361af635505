//! Match history persistence

pub mod results;
pub mod supabase;

pub use results::{dispatch, sink_from_config, MatchResult, MatchResultSink};
