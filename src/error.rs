//! Error types for pgbind.

use crate::protocol::{DataFormat, FlushMode};
use thiserror::Error;

/// Errors surfaced by the conversion and binding layer.
///
/// None of these are retried internally; recovery is the caller's concern.
/// An error raised mid-write leaves the writer's buffer in an indeterminate
/// state that only a connection reset can discard.
#[derive(Debug, Error)]
pub enum PgError {
    /// Wire type identity absent from the session catalog.
    #[error("unknown wire type: {0}")]
    UnknownType(String),

    /// Converter asked to operate in a format it does not support.
    #[error("{format:?} format not supported by the {type_name} converter")]
    FormatNotSupported {
        format: DataFormat,
        type_name: &'static str,
    },

    /// Value exceeds the capacity of the target wire format.
    #[error("value {value} out of range for wire type {wire_type}")]
    ValueOutOfRange { wire_type: String, value: String },

    /// Decoded bytes violate the wire format.
    #[error("invalid wire data for {wire_type}: {reason}")]
    InvalidWireData { wire_type: String, reason: String },

    /// Reader/writer re-initialized before being reset.
    #[error("reader/writer initialized while still in use")]
    ConcurrentUse,

    /// Sync call against an async endpoint, or vice versa.
    #[error("{called} called against a {mode:?} endpoint")]
    WrongFlushMode {
        called: &'static str,
        mode: FlushMode,
    },

    /// No converter info could be produced for the requested pair.
    #[error("no converter resolution for {app_type} as {wire_type}")]
    ResolutionFailed { app_type: String, wire_type: String },

    /// Operation observed a cancelled token at a suspension point.
    /// The connection must be treated as broken afterwards.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PgError {
    /// Create an out-of-range error for the given wire type and value.
    pub fn out_of_range(wire_type: impl std::fmt::Display, value: impl std::fmt::Display) -> Self {
        Self::ValueOutOfRange {
            wire_type: wire_type.to_string(),
            value: value.to_string(),
        }
    }

    /// Create an invalid-wire-data error.
    pub fn invalid_data(wire_type: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::InvalidWireData {
            wire_type: wire_type.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a resolution-failed error.
    pub fn resolution_failed(
        app_type: impl std::fmt::Display,
        wire_type: impl std::fmt::Display,
    ) -> Self {
        Self::ResolutionFailed {
            app_type: app_type.to_string(),
            wire_type: wire_type.to_string(),
        }
    }
}

/// Result type alias for pgbind operations.
pub type PgResult<T> = Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PgError::out_of_range("int4", 2_147_483_648i64);
        assert_eq!(
            err.to_string(),
            "value 2147483648 out of range for wire type int4"
        );

        let err = PgError::invalid_data("timestamp", "truncated payload");
        assert_eq!(
            err.to_string(),
            "invalid wire data for timestamp: truncated payload"
        );
    }
}
