//! Error types for hookify-worker.

use std::time::Duration;

use thiserror::Error;

use crate::model::work::WorkId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The row is no longer `processing` under this worker's ownership.
    #[error("claim on {id} no longer held by {worker_id}")]
    ClaimLost { id: WorkId, worker_id: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("generation provider error: {0}")]
    Provider(String),

    #[error("malformed generation output: {0}")]
    MalformedOutput(String),

    #[error("event bus error: {0}")]
    Bus(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the failure belongs to the claimed item rather than the
    /// worker's environment. Such items go to `failed`; the loop keeps going.
    pub fn is_item_specific(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::MalformedOutput(_))
    }

    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::ClaimLost { .. } => "claim_lost",
            Error::Database(_) => "database",
            Error::Migration(_) => "migration",
            Error::Timeout { .. } => "timeout",
            Error::Provider(_) => "provider",
            Error::MalformedOutput(_) => "malformed_output",
            Error::Bus(_) => "bus",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
