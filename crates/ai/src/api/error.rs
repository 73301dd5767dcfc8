//! Errors reported by the protocol client.

use std::io;

/// An error produced while talking to the Zappy server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server closed the connection, or the reader task is gone.
    #[error("connection to the server closed")]
    ConnectionClosed,
    /// No response arrived within the command's time budget.
    ///
    /// The command is not retransmitted; the server may still act on it and
    /// its eventual response is discarded.
    #[error("timed out waiting for the server")]
    Timeout,
    /// The server deviated from the documented handshake sequence.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// A server payload could not be decoded.
    #[error("failed to parse server payload: {0}")]
    Parse(String),
    /// The response did not match what the command expects.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Whether the error ends the session, as opposed to failing one command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionClosed | ClientError::Handshake(_) | ClientError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
