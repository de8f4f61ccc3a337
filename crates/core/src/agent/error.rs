use storm_agent_model::ErrorKind;
use thiserror::Error;

use crate::mcp;

/// Errors that end a run.
///
/// Tool failures never show up here; they are reported to the model as
/// failed tool results instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The model request failed, either with a permanent error or after
    /// the retries were exhausted.
    #[error("model request failed after {attempts} attempt(s): {kind}: {message}")]
    Model {
        /// The kind of the last failure.
        kind: ErrorKind,
        /// The message of the last failure.
        message: String,
        /// How many times the request was sent.
        attempts: u32,
    },
    /// The run was cancelled by the caller.
    #[error("the run was cancelled")]
    Cancelled,
    /// Connecting to an external tool server failed.
    #[error(transparent)]
    Connection(#[from] mcp::Error),
}

impl Error {
    /// Returns `true` if running again later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Model { kind, .. } => kind.is_transient(),
            Error::Connection(err) => matches!(
                err,
                mcp::Error::Transport { .. }
                    | mcp::Error::Timeout { .. }
                    | mcp::Error::Closed { .. }
            ),
            Error::Cancelled => false,
        }
    }

    /// Returns `true` if the error is caused by configuration, such as
    /// rejected credentials or a server command that can't be launched.
    /// Retrying won't help until the configuration is fixed.
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::Model { kind, .. } => kind.is_configuration(),
            Error::Connection(err) => matches!(err, mcp::Error::Spawn { .. }),
            Error::Cancelled => false,
        }
    }
}
