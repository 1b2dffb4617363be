//! Error types for session control and symbol acquisition

use gueststack_shared::ParseError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by [`crate::session::SamplingSession`] operations.
///
/// None of these are retried; they are reported to whoever triggered the
/// operation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage sampler: {0}")]
    Staging(#[source] std::io::Error),

    #[error("failed to spawn sampler {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send control payload to sampler: {0}")]
    ControlPayload(#[source] std::io::Error),

    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

impl SessionError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SessionError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while loading symbol tables
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bad symbol listing from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: ParseError,
    },

    /// The external tool exited unsuccessfully; carries its stderr verbatim
    #[error("{stderr}")]
    Process { tool: String, stderr: String },
}
