use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with an [`RfsError`]
pub type Result<T> = std::result::Result<T, RfsError>;

/// The top level error variants used by the rfs client, server and [`WaitingRoom`].
///
/// [`WaitingRoom`]: ./waiting_room/struct.WaitingRoom.html
#[derive(Error, Debug)]
pub enum RfsError {
    /// a socket could not be created, bound, accepted or connected
    #[error("could not {action}: {source}")]
    Connection {
        /// what was being attempted, i.e. "bind to 127.0.0.1:2000"
        action: String,
        /// the underlying socket error
        source: io::Error,
    },

    /// the handshake with the peer failed
    #[error(transparent)]
    Protocol(#[from] HandshakeError),

    /// a file transfer was aborted
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// a worker could not be created for a resource key
    #[error("dispatch failure: {0}")]
    Dispatch(String),

    /// a request was submitted after the waiting room began shutting down
    #[error("the waiting room is shutting down")]
    ShuttingDown,

    /// the peer reported a failure in a status line
    #[error("{0}")]
    Server(String),

    /// a command line option or wire token could not be parsed
    #[error("{0}")]
    Parsing(String),

    /// variant for any other IO error
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors that end a session during the `command -> GO -> target -> CONTINUE` exchange
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// a control frame could not be written to the peer
    #[error("handshake send failed: {0}")]
    Send(#[source] io::Error),

    /// a control frame could not be read from the peer, or the peer disconnected
    #[error("handshake receive failed: {0}")]
    Recv(#[source] io::Error),

    /// the peer replied with something other than the expected token
    #[error("handshake rejected, expected {expected} but peer replied {reply:?}")]
    Rejected {
        /// the token that would have let the session proceed
        expected: &'static str,
        /// what the peer actually sent
        reply: String,
    },

    /// this side refused the target named by the peer
    #[error("target refused: {0}")]
    Refused(String),

    /// the client opened with a token that is not WRITE, GET or RM
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

/// Reasons a single [`send_file`] or [`receive_file`] transfer was aborted.
///
/// [`send_file`]: ./transport/fn.send_file.html
/// [`receive_file`]: ./transport/fn.receive_file.html
#[derive(Error, Debug)]
pub enum TransferError {
    /// the local file could not be opened or created
    #[error("could not open {path:?}: {source}")]
    Open {
        /// path of the file
        path: PathBuf,
        /// the underlying error
        source: io::Error,
    },

    /// the destination directory does not exist, nothing was written
    #[error("destination directory {0:?} does not exist")]
    Directory(PathBuf),

    /// the receiving peer refused the destination path
    #[error("peer rejected the destination path")]
    Rejected,

    /// the file is larger than the 4 byte length header can describe
    #[error("file of {0} bytes is too large to transfer")]
    TooLarge(u64),

    /// the peer disconnected before the whole file arrived
    #[error("peer disconnected after {received} of {expected} bytes")]
    Stream {
        /// bytes written to disk before the disconnect
        received: u64,
        /// bytes announced by the length header
        expected: u64,
    },

    /// reading or writing the socket or the local file failed mid-transfer
    #[error("transfer failed: {0}")]
    Io(#[from] io::Error),
}
