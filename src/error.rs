// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Per-frame and per-subscription errors

use thiserror::Error;

/// Errors surfaced to the caller of the ingest and dispatch APIs.
///
/// None of these are fatal: each one concerns a single frame or a single
/// subscription request and leaves all state untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Invalid frame: missing source identity")]
    MissingSource,

    #[error("Invalid frame: source identity is not a string or integer ({0})")]
    InvalidSource(String),

    #[error("Invalid frame: field '{field}' is not a finite number")]
    NonFinite { field: &'static str },

    #[error("Invalid frame: field '{field}' out of range ({value})")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Invalid frame: malformed telemetry ({0})")]
    Malformed(String),

    #[error("Source '{0}' is detached")]
    SourceDetached(String),

    #[error("Unknown observer: {0}")]
    UnknownObserver(String),
}

impl TelemetryError {
    /// True for the malformed-input class: the frame itself was bad.
    pub fn is_invalid_frame(&self) -> bool {
        matches!(
            self,
            Self::MissingSource
                | Self::InvalidSource(_)
                | Self::NonFinite { .. }
                | Self::OutOfRange { .. }
                | Self::Malformed(_)
        )
    }
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_frame_classification() {
        assert!(TelemetryError::MissingSource.is_invalid_frame());
        assert!(TelemetryError::NonFinite { field: "speed" }.is_invalid_frame());
        assert!(TelemetryError::Malformed("speed: expected f64".into()).is_invalid_frame());
        assert!(!TelemetryError::SourceDetached("7".into()).is_invalid_frame());
        assert!(!TelemetryError::UnknownObserver("x".into()).is_invalid_frame());
    }

    #[test]
    fn test_error_messages_name_field() {
        let err = TelemetryError::OutOfRange { field: "rpm", value: -5.0 };
        assert_eq!(err.to_string(), "Invalid frame: field 'rpm' out of range (-5)");
    }
}
