use crate::models::{Identity, Status};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the idempotency core.
///
/// A lost compare-and-swap is not represented here: `complete` and
/// `reacquire_retryable` report it as `Ok(false)`.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    // === Validation Errors ===
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("expires_at ({expires_at}) must be after created_at ({created_at})")]
    InvalidExpiry {
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    #[error("Completion status must be terminal, got {status}")]
    NonTerminalCompletion { status: Status },

    // === Consistency Errors ===
    #[error("Request hash mismatch for {identity}: stored {stored}, supplied {supplied}")]
    RequestHashMismatch {
        identity: Identity,
        stored: String,
        supplied: String,
    },

    #[error("Unrecognized idempotency status: {value:?}")]
    InvalidStatus { value: String },

    #[error("Inconsistent state: reservation for {identity} conflicted but no record was found")]
    InconsistentState { identity: Identity },

    // === Dependency Errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] validator::ValidationErrors),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IdempotencyError {
    /// Returns true if the caller supplied bad input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IdempotencyError::MissingField { .. }
                | IdempotencyError::InvalidExpiry { .. }
                | IdempotencyError::NonTerminalCompletion { .. }
        )
    }

    /// Returns true if stored data contradicts what the caller or the schema expects.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            IdempotencyError::RequestHashMismatch { .. }
                | IdempotencyError::InvalidStatus { .. }
                | IdempotencyError::InconsistentState { .. }
        )
    }

    /// Stable, low-cardinality label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IdempotencyError::MissingField { .. } => "missing_field",
            IdempotencyError::InvalidExpiry { .. } => "invalid_expiry",
            IdempotencyError::NonTerminalCompletion { .. } => "non_terminal_completion",
            IdempotencyError::RequestHashMismatch { .. } => "request_hash_mismatch",
            IdempotencyError::InvalidStatus { .. } => "invalid_status",
            IdempotencyError::InconsistentState { .. } => "inconsistent_state",
            IdempotencyError::Database(_) => "database",
            IdempotencyError::Migration(_) => "migration",
            IdempotencyError::Config(_) => "config",
            IdempotencyError::InvalidSettings(_) => "invalid_settings",
            IdempotencyError::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, IdempotencyError>;
