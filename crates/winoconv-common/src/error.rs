//! Error taxonomy for the Winograd convolution engine.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors surfaced by configuration, planning and execution.
///
/// Caller misuse ([`WinogradError::InvalidUsage`] and
/// [`WinogradError::ShapeMismatch`]) is kept apart from conditions a caller
/// can recover from: [`WinogradError::Unsupported`] means "fall back to another
/// convolution algorithm", [`WinogradError::Allocation`] means the engine could
/// not obtain a buffer it was asked to own.
#[derive(Debug, Error)]
pub enum WinogradError {
    #[error("invalid usage: {reason}")]
    InvalidUsage { reason: String },

    #[error("shape mismatch for {what}: expected {expected} elements, got {actual}")]
    ShapeMismatch { what: &'static str, expected: usize, actual: usize },

    #[error("no Winograd implementation for a {kernel_rows}x{kernel_cols} kernel on this CPU")]
    Unsupported { kernel_rows: usize, kernel_cols: usize },

    #[error("failed to allocate {bytes} bytes")]
    Allocation { bytes: usize },

    #[error("failed to start worker pool: {reason}")]
    WorkerPool { reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WinogradError {
    /// Shorthand for an [`WinogradError::InvalidUsage`] with a formatted reason.
    pub fn invalid_usage(reason: impl Into<String>) -> Self {
        Self::InvalidUsage { reason: reason.into() }
    }

    /// True when the error indicates the caller broke an interface contract.
    pub fn is_invalid_usage(&self) -> bool {
        matches!(self, Self::InvalidUsage { .. } | Self::ShapeMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, WinogradError>;

/// Check that a caller-supplied buffer holds exactly `expected` elements.
pub fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(WinogradError::ShapeMismatch { what, expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_kinds_are_classified() {
        assert!(WinogradError::invalid_usage("x").is_invalid_usage());
        assert!(
            WinogradError::ShapeMismatch { what: "input", expected: 4, actual: 3 }.is_invalid_usage()
        );
        assert!(!WinogradError::Allocation { bytes: 16 }.is_invalid_usage());
        assert!(!WinogradError::Unsupported { kernel_rows: 7, kernel_cols: 7 }.is_invalid_usage());
    }

    #[test]
    fn ensure_len_reports_both_sizes() {
        assert!(ensure_len("output", 8, 8).is_ok());
        let err = ensure_len("output", 8, 6).unwrap_err();
        assert_eq!(err.to_string(), "shape mismatch for output: expected 8 elements, got 6");
    }
}
