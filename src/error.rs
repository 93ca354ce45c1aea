//! Error types and handling
//!
//! Common error types used across the recording pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::event::SourceKind;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    /// A capture or audio device could not be opened. Surfaced synchronously
    /// from `Session::start`, before any session state exists.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A source exceeded its consecutive-failure threshold and terminated.
    #[error("source lost: {0}")]
    SourceLost(SourceKind),

    /// A track received a timestamp earlier than the previous one.
    /// This is a programming error in the caller, not a recoverable state.
    #[error("non-monotonic timestamp on {track} track: {prev_ms}ms then {next_ms}ms")]
    TimestampOrder {
        track: &'static str,
        prev_ms: u64,
        next_ms: u64,
    },

    /// The container could not be finalized. The partial file is retained at
    /// the given path for diagnosis, never deleted.
    #[error("finalize failed: {reason} (partial file at {partial_path:?})")]
    FinalizeFailed {
        reason: String,
        partial_path: PathBuf,
    },

    /// An operation was attempted after the session reached `Closed`.
    #[error("session closed")]
    SessionClosed,

    #[error("already recording")]
    AlreadyRecording,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Path of the diagnosably-incomplete file, when this error retains one.
    pub fn partial_path(&self) -> Option<&PathBuf> {
        match self {
            RecorderError::FinalizeFailed { partial_path, .. } => Some(partial_path),
            _ => None,
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
