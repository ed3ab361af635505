//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::game::{MatchContext, MatchRegistry};
use crate::matchmaking::MatchmakingService;
use crate::store::{sink_from_config, MatchResultSink};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionRegistry>,
    pub match_registry: Arc<MatchRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sink = sink_from_config(&config);
        Self::with_sink(config, sink)
    }

    /// Build state around a specific result sink
    pub fn with_sink(config: Config, sink: Arc<dyn MatchResultSink>) -> Self {
        let config = Arc::new(config);

        let connections = Arc::new(ConnectionRegistry::new());
        let match_registry = Arc::new(MatchRegistry::new());

        let ctx = MatchContext {
            matches: match_registry.clone(),
            connections: connections.clone(),
            sink,
        };

        // Initialize matchmaking service (Arc for sharing across cloned AppState)
        let matchmaking = Arc::new(MatchmakingService::new(ctx, config.forfeit_on_disconnect));

        Self {
            config,
            connections,
            match_registry,
            matchmaking,
        }
    }
}
