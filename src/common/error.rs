//! Error handling for QuartzDB

use thiserror::Error;

/// Main error type for QuartzDB operations
#[derive(Error, Debug)]
pub enum QuartzError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Result type alias for QuartzDB operations
pub type QuartzResult<T> = std::result::Result<T, QuartzError>;
