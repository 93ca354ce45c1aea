//! Events emitted during a recording session
//!
//! These are broadcast to the orchestrator/UI collaborator. `SourceLost` and
//! `FinalizeFailed` are the two fatal conditions the core surfaces; every
//! other failure is recovered internally.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Which capture source an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Screen,
    Camera,
    Audio,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Screen => write!(f, "screen"),
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::Audio => write!(f, "audio"),
        }
    }
}

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Recording started
    Started,
    /// Recording stopped and the container was finalized
    Stopped,
    /// A source exceeded its consecutive-failure threshold and terminated.
    ///
    /// Camera or audio loss degrades the session; screen loss halts the
    /// video pipeline (there is no fallback for the video reference).
    SourceLost { source: SourceKind, at: Timestamp },
    /// Finalization failed; the partial file is retained at this path.
    FinalizeFailed { partial_path: PathBuf },
}
