use thiserror::Error;

use crate::chain::TeamId;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageUnavailable(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Chain for team {0} is frozen and cannot accept new blocks")]
    ChainFrozen(TeamId),

    #[error("Append conflict on team {team_id}: sequence {sequence_number} was claimed by another writer")]
    Conflict {
        team_id: TeamId,
        sequence_number: i64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chain for team {0} is not frozen")]
    NotFrozen(TeamId),

    #[error("Event {0} is already recorded with different content")]
    DuplicateEvent(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LedgerError {
    pub fn chain_not_found(team_id: TeamId) -> Self {
        Self::NotFound(format!("chain for team {}", team_id))
    }

    pub fn event_not_found(event_id: &str) -> Self {
        Self::NotFound(format!("block for event {}", event_id))
    }

    /// Only append races are worth retrying with fresh chain state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
