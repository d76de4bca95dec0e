//! Error types for ssiflow

use thiserror::Error;

/// Result type for ssiflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ssiflow
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Subrequest lookup or dispatch error
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Filter state error
    #[error("Filter error: {0}")]
    Filter(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
