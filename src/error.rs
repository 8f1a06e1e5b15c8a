//! Crate error type.
//!
//! Most failures in racelab are absorbed rather than propagated to the
//! user: a failed replay consumes its pending continuation and the
//! exploration loop moves on. The variants here exist so call sites can
//! log a precise cause before continuing.

use std::io;
use std::path::PathBuf;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while orchestrating replays and schedule rewrites.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem operation failed on a known path.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An external command could not be spawned or exited nonzero.
    #[error("command failed: {command}")]
    CommandFailed {
        /// The fully formatted command line.
        command: String,
    },

    /// A previous attempt at the same run already failed; the failure
    /// directory marks it as not worth retrying.
    #[error("run {name} previously failed (marker directory present)")]
    PreviouslyFailed {
        /// Run name.
        name: String,
    },

    /// A race reversal could not be constructed.
    #[error("cannot reorder race {race_id}: {reason}")]
    Reorder {
        /// Index of the race in the detector report.
        race_id: usize,
        /// Why the reversal was rejected.
        reason: String,
    },

    /// The external race detector produced unusable output.
    #[error("race detector output invalid: {0}")]
    Detector(String),

    /// A serialized trace file could not be read or written.
    #[error("malformed trace file: {0}")]
    Trace(String),
}

impl Error {
    /// Wraps an [`io::Error`] with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
