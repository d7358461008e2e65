// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the strand binary.

use strand_opcua::OpcUaError;
use thiserror::Error;

/// Result type alias for strand-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the strand binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid command line input.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Client error.
    #[error("Client error: {0}")]
    Client(#[from] OpcUaError),

    /// Error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Creates an I/O error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Argument(_) => 2,
            Self::Io(_) => 4,
            Self::Client(e) if e.requires_reconnect() || e.is_retryable() => 5,
            Self::Client(_) => 6,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }

    if let BinError::Client(e) = error {
        for hint in e.recovery_hints() {
            eprintln!("  Hint: {}", hint);
        }
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BinError::config("missing endpoint");
        assert_eq!(err.to_string(), "Configuration error: missing endpoint");
    }

    #[test]
    fn test_error_with_context() {
        let err = BinError::argument("bad node id").with_context("read");
        assert_eq!(err.to_string(), "read: Invalid argument: bad node id");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BinError::config("x").exit_code(), 1);
        assert_eq!(BinError::io("x").exit_code(), 4);
        assert_eq!(
            BinError::from(OpcUaError::connection_refused("opc.tcp://localhost:4840")).exit_code(),
            5
        );
        assert_eq!(
            BinError::from(OpcUaError::invalid_config("endpoint", "empty")).exit_code(),
            6
        );
    }
}
