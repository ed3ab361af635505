//! Match result records and the sinks that persist them
//!
//! Persistence is fire-and-forget: the match task hands a [`MatchResult`] to
//! [`dispatch`], which writes it on a detached task and only logs failures.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::connection::ConnectionId;

use super::supabase::{SupabaseClient, SupabaseError};

/// Table receiving one row per completed match
pub const MATCH_HISTORY_TABLE: &str = "match_history";

/// Immutable outcome of a terminated match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub winner_id: ConnectionId,
    pub loser_id: ConnectionId,
    pub winner_score: u32,
    pub loser_score: u32,
    #[serde(rename = "created_at")]
    pub completed_at: DateTime<Utc>,
}

/// Result sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Supabase write failed: {0}")]
    Supabase(#[from] SupabaseError),
}

/// Durable store for completed matches
pub trait MatchResultSink: Send + Sync {
    fn record(&self, result: MatchResult) -> BoxFuture<'static, Result<(), SinkError>>;
}

/// Write a result on a detached task. The returned handle may be dropped.
pub fn dispatch(sink: Arc<dyn MatchResultSink>, result: MatchResult) -> JoinHandle<()> {
    tokio::spawn(async move {
        let winner_id = result.winner_id;
        let loser_id = result.loser_id;
        match sink.record(result).await {
            Ok(()) => info!(winner_id = %winner_id, loser_id = %loser_id, "Match result saved"),
            Err(e) => error!(
                winner_id = %winner_id,
                loser_id = %loser_id,
                error = %e,
                "Failed to save match result"
            ),
        }
    })
}

/// Pick the sink for this deployment: Supabase when configured, log-only otherwise
pub fn sink_from_config(config: &Config) -> Arc<dyn MatchResultSink> {
    match &config.supabase {
        Some(supabase) => Arc::new(SupabaseResultSink::new(SupabaseClient::new(supabase))),
        None => Arc::new(LogResultSink),
    }
}

/// Writes results to the `match_history` table
#[derive(Clone)]
pub struct SupabaseResultSink {
    client: SupabaseClient,
}

impl SupabaseResultSink {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl MatchResultSink for SupabaseResultSink {
    fn record(&self, result: MatchResult) -> BoxFuture<'static, Result<(), SinkError>> {
        let client = self.client.clone();
        async move {
            client.insert(MATCH_HISTORY_TABLE, &result).await?;
            Ok::<(), SinkError>(())
        }
        .boxed()
    }
}

/// Used when no database is configured; results only reach the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogResultSink;

impl MatchResultSink for LogResultSink {
    fn record(&self, result: MatchResult) -> BoxFuture<'static, Result<(), SinkError>> {
        info!(
            winner_id = %result.winner_id,
            loser_id = %result.loser_id,
            winner_score = result.winner_score,
            loser_score = result.loser_score,
            "Match result (not persisted)"
        );
        futures::future::ready(Ok(())).boxed()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingResultSink, MemoryResultSink};
    use super::*;

    fn sample_result() -> MatchResult {
        MatchResult {
            winner_id: ConnectionId::new(),
            loser_id: ConnectionId::new(),
            winner_score: 11,
            loser_score: 4,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_to_sink() {
        let sink = MemoryResultSink::default();
        let result = sample_result();

        tokio_test::assert_ok!(dispatch(Arc::new(sink.clone()), result.clone()).await);
        assert_eq!(sink.results(), vec![result]);
    }

    #[tokio::test]
    async fn dispatch_swallows_sink_failure() {
        let handle = dispatch(Arc::new(FailingResultSink), sample_result());
        tokio_test::assert_ok!(handle.await);
    }

    #[test]
    fn row_uses_match_history_columns() {
        let value = serde_json::to_value(sample_result()).unwrap();
        for column in ["winner_id", "loser_id", "winner_score", "loser_score", "created_at"] {
            assert!(value.get(column).is_some(), "missing column {column}");
        }
    }
}
