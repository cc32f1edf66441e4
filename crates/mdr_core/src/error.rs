use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ItemId, State};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Recoverable: refresh `last_fetched` and resubmit.
    #[error("stale edit: item {item} modified at {modified}, edit fetched at {last_fetched}")]
    StaleEdit {
        item: ItemId,
        modified: DateTime<Utc>,
        last_fetched: DateTime<Utc>,
    },

    #[error("invalid thresholds: public state {public} is below locked state {locked}")]
    InvalidThresholds { locked: State, public: State },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::PermissionDenied(_) => 403,
            Self::StaleEdit { .. } => 409,
            Self::InvalidThresholds { .. } => 422,
            Self::InvalidInput(_) => 400,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }

    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
