//! Recording errors (§4.8, §7).

use std::path::PathBuf;

/// What kind of recording is (or was requested to become) active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingKind {
    /// Trajectory-only ZIP capture.
    Trajectory,
    /// Combined video + trajectory package.
    Video,
}

impl RecordingKind {
    /// Human-readable name, used in error messages and status replies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trajectory => "trajectory",
            Self::Video => "video",
        }
    }
}

/// Errors raised by the recording subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    /// A recording of the given kind is already active; the two modes are
    /// mutually exclusive (§4.8).
    #[error("a {0} recording is already in progress")]
    AlreadyRecording(RecordingKind),
    /// Stop was requested but nothing of the given kind is active.
    #[error("no {0} recording is in progress")]
    NotRecording(RecordingKind),
    /// Underlying filesystem operation failed.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Archive construction failed.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Muxing the captured frame sequence into an encoded video failed.
    #[error("video encoding failed: {0}")]
    Encoding(String),
}

impl std::fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
