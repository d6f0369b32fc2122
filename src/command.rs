use std::fmt;
use std::str::FromStr;

use crate::RfsError;

/// server reply that starts the handshake once a valid command was received
pub const GO: &str = "GO";

/// server reply that ends the handshake and lets the data phase begin
pub const CONTINUE: &str = "CONTINUE";

const OK_PREFIX: &str = "OK: ";
const ERR_PREFIX: &str = "ERR: ";

/// These are the operations a client can request against a remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// upload a local file, overwriting the remote key
    Write,
    /// download the remote key into a local file
    Get,
    /// delete the remote key
    Rm,
}

impl Command {
    /// the token sent in the first handshake frame
    pub fn token(&self) -> &'static str {
        match self {
            Command::Write => "WRITE",
            Command::Get => "GET",
            Command::Rm => "RM",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Command {
    type Err = RfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WRITE" => Ok(Command::Write),
            "GET" => Ok(Command::Get),
            "RM" => Ok(Command::Rm),
            other => Err(RfsError::Parsing(format!("unknown command {:?}", other))),
        }
    }
}

/// The human readable line that closes a WRITE, GET or RM exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// the operation succeeded
    Ok(String),
    /// the operation failed, with a description of the error
    Err(String),
}

impl Status {
    /// encodes the status as a control message, i.e. `OK: target deleted successfully`
    pub fn to_message(&self) -> String {
        match self {
            Status::Ok(msg) => format!("{}{}", OK_PREFIX, msg),
            Status::Err(msg) => format!("{}{}", ERR_PREFIX, msg),
        }
    }

    /// `true` if `msg` carries an `OK: ` or `ERR: ` prefix
    pub fn is_status(msg: &str) -> bool {
        msg.starts_with(OK_PREFIX) || msg.starts_with(ERR_PREFIX)
    }

    /// decodes a control message. Anything without an `OK: ` prefix counts as a failure
    pub fn from_message(msg: &str) -> Status {
        match msg.strip_prefix(OK_PREFIX) {
            Some(rest) => Status::Ok(rest.to_string()),
            None => Status::Err(msg.strip_prefix(ERR_PREFIX).unwrap_or(msg).to_string()),
        }
    }
}
