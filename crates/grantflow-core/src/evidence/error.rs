//! Evidence module error types.

use thiserror::Error;

use super::store::StoreError;

/// Errors from the platform location provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LocationError {
    /// The provider did not resolve a fix within the timeout.
    #[error("location unavailable: no fix within {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The provider reported a hardware or permission failure.
    #[error("location unavailable: {reason}")]
    Unavailable {
        /// Provider-reported reason.
        reason: String,
    },
}

/// Errors that can occur during evidence capture.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EvidenceError {
    /// Upload to object storage failed after all retry attempts.
    #[error("upload failed after {attempts} attempts: {last_error}")]
    UploadFailure {
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's error.
        last_error: StoreError,
    },

    /// The photo frame's dimensions do not match its pixel buffer.
    #[error("invalid frame: {width}x{height} does not match {actual} bytes of rgb8 data")]
    InvalidFrame {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Actual pixel buffer length.
        actual: usize,
    },

    /// The operator cancelled the capture before submission.
    #[error("capture cancelled by operator")]
    Cancelled,
}
