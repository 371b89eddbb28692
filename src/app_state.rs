//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SnapshotConfig;
use crate::persistence::Database;
use crate::snapshot::{ReplayEngine, SnapshotGenerator};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Connection provider for the served database.
    pub db: Database,
    /// Loaded configuration.
    pub config: Arc<SnapshotConfig>,
    /// Snapshot generator used by the download endpoint.
    pub generator: SnapshotGenerator,
    /// Replay engine used by the upload endpoint.
    pub replay: ReplayEngine,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Builds the state from an open database and the loaded configuration.
    #[must_use]
    pub fn new(db: Database, config: SnapshotConfig, shutdown: CancellationToken) -> Self {
        let generator = SnapshotGenerator::new(config.query_timeout());
        let replay = ReplayEngine::new(config.replay_options());
        Self {
            db,
            config: Arc::new(config),
            generator,
            replay,
            shutdown,
        }
    }

    /// Configured admin secret, if any.
    #[must_use]
    pub fn admin_token(&self) -> Option<&str> {
        self.config.admin_token.as_deref()
    }
}
