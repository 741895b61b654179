//! Error types for the interop finalizer

use crate::proof::DecodeError;
use thiserror::Error;

/// Main error type for the finalizer
#[derive(Error, Debug)]
pub enum FinalizerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Finalizer is not supported for chain {chain}")]
    UnsupportedChain { chain: String },

    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Malformed interop message: {0}")]
    MalformedMessage(#[from] DecodeError),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Chain {chain} not found")]
    ChainNotFound { chain: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Request {tx_hash} did not finalize before its deadline")]
    DeadlineExceeded { tx_hash: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FinalizerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FinalizerError::ChainConnection { .. } | FinalizerError::Timeout { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            FinalizerError::BroadcastFailed(_)
                | FinalizerError::Wallet(_)
                | FinalizerError::InvalidConfiguration(_)
        )
    }
}

/// Result type for finalizer operations
pub type FinalizerResult<T> = Result<T, FinalizerError>;
