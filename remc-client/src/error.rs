//! Error types for the client.

use std::io;

use remc_common::{CodecError, Status};
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Packet could not be encoded or the byte stream could not be framed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Address could not be resolved to a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// TCP connect did not complete within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The connection dropped before the request was answered.
    #[error("disconnected")]
    Disconnected,

    /// Server answered with a non-success status.
    #[error("server status: {0}")]
    Status(Status),

    /// The connection task has stopped.
    #[error("client shut down")]
    Shutdown,

    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Maps a response status to an error, `Ok` for success.
    pub fn check(status: Status) -> ClientResult<()> {
        match status {
            Status::NoError => Ok(()),
            Status::Disconnected => Err(ClientError::Disconnected),
            other => Err(ClientError::Status(other)),
        }
    }
}
