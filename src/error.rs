//! Error types for the statement cache and its database drivers
//!
//! The cache never creates errors of its own: every value of [`Error`] that a
//! caller sees was produced by the underlying database handle and is passed
//! through unchanged. Drivers map their native failures into this enum.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for database operations
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Error reported by the database server, with its SQLSTATE code
    #[error("database error [{code}]: {message}")]
    Database { code: String, message: String },

    /// SQL preparation or execution error without a server code
    #[error("SQL error: {0}")]
    Sql(String),

    /// A single-row query produced no rows
    #[error("no rows returned")]
    NoRows,

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection closed unexpectedly
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(Duration),

    /// Invalid connection string
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// Operation aborted by its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    // =========================================================================
    // Data Type Errors
    // =========================================================================
    /// Data conversion error
    #[error("data conversion error: {0}")]
    DataConversion(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a new database server error
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Database {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from a cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this is a "no rows" error
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Error::NoRows)
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::ConnectionClosed
                | Error::ConnectionTimeout(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_) | Error::ConnectionClosed | Error::Cancelled
        )
    }
}
