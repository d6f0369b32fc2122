use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use tracing::{debug, warn};

use crate::command::{Command, Status};
use crate::connection;
use crate::error::{HandshakeError, TransferError};
use crate::handshake;
use crate::progress::Progress;
use crate::transport::{receive_control, receive_file, send_control, send_file};
use crate::{Result, RfsError};

/// `RfsClient` contains the functionality for communication with an [`RfsServer`].
///
/// The server handles one operation per connection, so every operation consumes the client.
///
/// [`RfsServer`]: ./struct.RfsServer.html
pub struct RfsClient {
    stream: TcpStream,
    progress: Progress,
}

impl RfsClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A) -> Result<Self> {
        Ok(RfsClient {
            stream: connection::connect(addr)?,
            progress: Progress::Hidden,
        })
    }

    /// sets where transfer progress is drawn, hidden by default
    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// uploads the file at `local` to the server under `remote`, overwriting it
    /// ## Returns
    /// the server's status message
    /// # Errors
    /// `Err<RfsError::Server>` if the server could not store the file
    pub fn write(mut self, local: &Path, remote: &str) -> Result<String> {
        // fail before the server commits to a transfer
        fs::metadata(local).map_err(|source| TransferError::Open {
            path: local.to_path_buf(),
            source,
        })?;
        self.open(Command::Write, remote)?;

        match send_file(local, &mut self.stream, self.progress) {
            Ok(len) => debug!("sent {} bytes to {}", len, remote),
            Err(TransferError::Rejected) => {
                // the server follows its refusal with a status line
                return match receive_control(&mut self.stream) {
                    Ok(msg) => Err(status_error(&msg)),
                    Err(_) => Err(TransferError::Rejected.into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        match Status::from_message(&receive_control(&mut self.stream)?) {
            Status::Ok(msg) => Ok(msg),
            Status::Err(msg) => Err(RfsError::Server(msg)),
        }
    }

    /// downloads `remote` from the server into the file at `local`, overwriting it
    /// ## Returns
    /// the number of bytes received
    /// # Errors
    /// `Err<RfsError::Server>` if the server refused the request, or
    /// `Err<RfsError::Transfer>` if the download was interrupted
    pub fn get(mut self, remote: &str, local: &Path) -> Result<u64> {
        self.open(Command::Get, remote)?;

        match receive_file(local, &mut self.stream, self.progress) {
            Ok(len) => {
                let status = Status::Ok(format!("{} received {} bytes", remote, len));
                send_control(&status.to_message(), &mut self.stream)?;
                Ok(len)
            }
            Err(e) => {
                let status = Status::Err(format!("{} not received: {}", remote, e));
                if let Err(send_err) = send_control(&status.to_message(), &mut self.stream) {
                    warn!("could not report the failure to the server: {}", send_err);
                }
                Err(e.into())
            }
        }
    }

    /// deletes `remote` on the server
    /// ## Returns
    /// the server's status message
    /// # Errors
    /// `Err<RfsError::Server>` if the server could not delete the file
    pub fn remove(mut self, remote: &str) -> Result<String> {
        self.open(Command::Rm, remote)?;
        match Status::from_message(&receive_control(&mut self.stream)?) {
            Status::Ok(msg) => Ok(msg),
            Status::Err(msg) => Err(RfsError::Server(msg)),
        }
    }

    /// sends the routing frame and runs the handshake for `command` on `remote`
    fn open(&mut self, command: Command, remote: &str) -> Result<()> {
        handshake::route(&mut self.stream, remote)?;
        match handshake::initiate(&mut self.stream, command, remote) {
            Ok(()) => Ok(()),
            // a refused target comes back as a status line in place of CONTINUE
            Err(HandshakeError::Rejected { reply, .. }) if Status::is_status(&reply) => {
                Err(status_error(&reply))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn status_error(msg: &str) -> RfsError {
    match Status::from_message(msg) {
        Status::Ok(msg) | Status::Err(msg) => RfsError::Server(msg),
    }
}
