use std::time::Duration;

use thiserror::Error;

/// Errors from external tool servers.
#[derive(Debug, Error)]
pub enum Error {
    /// The server process could not be started.
    #[error("failed to spawn tool server '{server}': {source}")]
    Spawn {
        /// Name of the server.
        server: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading from or writing to the server failed.
    #[error("tool server '{server}' transport error: {message}")]
    Transport {
        /// Name of the server.
        server: String,
        /// What went wrong.
        message: String,
    },
    /// The server answered a request with a JSON-RPC error.
    #[error("tool server '{server}' returned error {code}: {message}")]
    Rpc {
        /// Name of the server.
        server: String,
        /// The JSON-RPC error code.
        code: i64,
        /// The error message.
        message: String,
    },
    /// The server answered with something that doesn't fit the protocol.
    #[error("tool server '{server}' sent an invalid response: {message}")]
    InvalidResponse {
        /// Name of the server.
        server: String,
        /// What was wrong with the response.
        message: String,
    },
    /// The server did not finish the handshake in time.
    #[error("tool server '{server}' did not respond within {timeout:?}")]
    Timeout {
        /// Name of the server.
        server: String,
        /// The time limit that was exceeded.
        timeout: Duration,
    },
    /// The connection has been closed.
    #[error("connection to tool server '{server}' is closed")]
    Closed {
        /// Name of the server.
        server: String,
    },
}

impl Error {
    /// Returns the name of the server this error comes from.
    pub fn server(&self) -> &str {
        match self {
            Error::Spawn { server, .. }
            | Error::Transport { server, .. }
            | Error::Rpc { server, .. }
            | Error::InvalidResponse { server, .. }
            | Error::Timeout { server, .. }
            | Error::Closed { server } => server,
        }
    }
}
