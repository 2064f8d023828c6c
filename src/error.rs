//! Parley error types

use thiserror::Error;

/// Errors that can occur in the parley protocol
#[derive(Debug, Error)]
pub enum Error {
    /// Agent card fetch failed or the document was malformed
    #[error("Discovery failed for {url}: {reason}")]
    Discovery { url: String, reason: String },

    /// Connection-level failure talking to a peer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer connected but returned a payload we could not make sense of
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Deadline exceeded waiting for a terminal response
    #[error("Deadline of {0:?} exceeded")]
    Timeout(std::time::Duration),

    /// The stream ended before the remote signalled completion
    #[error("Stream closed after {events} event(s) without a terminal signal")]
    StreamTruncated { events: usize },

    /// Router lookup miss
    #[error("Unknown delegate: {0}")]
    UnknownDelegate(String),

    /// The opaque reasoning capability failed
    #[error("Capability error: {0}")]
    Capability(String),

    /// A remote peer reported an internal failure
    #[error("Remote failure: {0}")]
    Remote(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Protocol(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}
