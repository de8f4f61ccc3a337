use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The credentials were missing or rejected.
    Authentication,
    /// The request was malformed or refused by the provider.
    InvalidRequest,
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The model provider is temporarily overloaded.
    Overloaded,
    /// The request did not finish in time.
    Timeout,
    /// The connection failed or was interrupted.
    Network,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Returns `true` if a request failing with this kind may succeed
    /// when it's sent again later.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitExceeded
                | ErrorKind::Overloaded
                | ErrorKind::Timeout
                | ErrorKind::Network
        )
    }

    /// Returns `true` if this kind indicates a configuration problem on
    /// the caller's side (bad credentials or a request the provider will
    /// never accept).
    #[inline]
    pub fn is_configuration(self) -> bool {
        matches!(self, ErrorKind::Authentication | ErrorKind::InvalidRequest)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Authentication => "authentication failed",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::Moderated => "content moderated",
            ErrorKind::RateLimitExceeded => "rate limit exceeded",
            ErrorKind::Overloaded => "provider overloaded",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Network => "network error",
            ErrorKind::Other => "other error",
        };
        f.write_str(s)
    }
}
