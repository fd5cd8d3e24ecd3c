//! Error types for MCP server operations

use thiserror::Error;

/// MCP server error type
#[derive(Error, Debug)]
pub enum Error {
    /// Reading from or writing to a client stream failed
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Startup-fatal configuration problems: unbindable address, missing or
    /// invalid TLS material
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience result type for MCP operations
pub type Result<T> = std::result::Result<T, Error>;
