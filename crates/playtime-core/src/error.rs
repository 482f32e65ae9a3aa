use thiserror::Error;

use crate::collaborators::GameId;
use crate::process::ProcessError;

/// Core error types for tracking operations
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to launch game {game_id}: {source}")]
    SpawnFailed {
        game_id: GameId,
        #[source]
        source: ProcessError,
    },

    #[error("Game not found in catalog: {0}")]
    GameNotFound(GameId),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Game catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tracker is shut down")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}
