//! Custom error types for the application.
//!
//! This module defines the primary error type, `HtfError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of faults a test run can
//! encounter, from configuration issues to instrument I/O failures.
//!
//! Instrument-facing variants are deliberately fine-grained: the recipe
//! sequencer converts them into phase outcomes at its boundary, and it needs
//! to tell a connect timeout from a read timeout from a malformed response
//! instead of matching on a catch-all.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, HtfError>;

#[derive(Error, Debug)]
pub enum HtfError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect to {hostname}:{port} timed out after {timeout_ms} ms")]
    ConnectTimeout {
        hostname: String,
        port: u16,
        timeout_ms: u64,
    },

    #[error("Instrument read timed out after {timeout_ms} ms")]
    ReadTimeout { timeout_ms: u64 },

    #[error("Instrument write timed out after {timeout_ms} ms")]
    WriteTimeout { timeout_ms: u64 },

    #[error("Instrument closed the connection before the response terminator")]
    UnexpectedEof,

    #[error("Instrument response is not valid UTF-8: {0}")]
    ResponseDecode(#[from] std::str::Utf8Error),

    #[error("Instrument response {response:?} is not a number")]
    ResponseParse { response: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Archive error: {0}")]
    Archive(#[from] reqwest::Error),
}

impl HtfError {
    /// True for faults raised while talking to an instrument or decoding
    /// its response. These abort the run with a phase outcome of ERROR.
    pub fn is_instrument_fault(&self) -> bool {
        matches!(
            self,
            HtfError::Io(_)
                | HtfError::ConnectTimeout { .. }
                | HtfError::ReadTimeout { .. }
                | HtfError::WriteTimeout { .. }
                | HtfError::UnexpectedEof
                | HtfError::ResponseDecode(_)
                | HtfError::ResponseParse { .. }
        )
    }
}
