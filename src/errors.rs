//! Error taxonomy for the cycle bot.
//!
//! Mirrors the five-way split the orchestrator reasons about: transient RPC
//! trouble gets retried locally, transaction failures bubble up to the
//! cycle, validation/configuration errors are fatal at the boundary, and
//! cancellation never becomes an alert.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("transient RPC error: {0}")]
    Transient(String),

    #[error("circuit breaker open after {consecutive_failures} consecutive failures")]
    CircuitOpen { consecutive_failures: u32 },

    #[error("transaction failed ({label}) after {attempts} attempts: {source}")]
    Transaction {
        label: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("transaction too large: {size} bytes (limit {limit})")]
    TransactionTooLarge { size: usize, limit: usize },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("cancelled")]
    Cancelled,
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

pub type AppResult<T> = Result<T, AppError>;
