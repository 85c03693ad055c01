//! Error types for the listener and the message store.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The bound socket has no local address
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),

    /// A data, inbox or archive directory could not be prepared
    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors from persisting one message.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while creating, writing or linking the file
    #[error("failed to write message from {peer} into {dir}: {source}")]
    Io {
        peer: SocketAddr,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Every candidate name was already taken
    #[error("no free file name for message from {peer} after {attempts} attempts")]
    NameExhausted { peer: SocketAddr, attempts: u64 },

    /// The blocking write task did not complete
    #[error("store task failed: {0}")]
    Task(String),
}

/// Why a connection was abandoned before its message could be stored.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Socket read failed, e.g. the peer reset the connection
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    /// Peer sent nothing for the idle timeout
    #[error("no data for {0:?}")]
    TimedOut(Duration),

    /// Message grew past the configured size cap
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Result type alias for server startup.
pub type Result<T> = std::result::Result<T, ServerError>;
