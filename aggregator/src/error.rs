//! Errors raised while serving flame graphs

use gueststack_agent::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool exited unsuccessfully; carries its stderr verbatim
    #[error("{stderr}")]
    Process { tool: String, stderr: String },

    #[error("failed to start {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("flame graph rendering failed: {0}")]
    Render(#[source] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
