//! The `command -> GO -> target -> CONTINUE` exchange that gates every data phase.
//!
//! Before the handshake the client sends one routing frame naming the resource key, which the
//! server's accept loop uses to pick the worker for the connection.
use std::io::{Read, Write};

use tracing::debug;

use crate::command::{Command, CONTINUE, GO};
use crate::error::HandshakeError;
use crate::transport::{receive_control, send_control};

/// client side: sends the routing frame for `key`
pub fn route<S: Write>(conn: &mut S, key: &str) -> Result<(), HandshakeError> {
    send_control(key, conn).map_err(HandshakeError::Send)
}

/// client side: runs the handshake for `command` against `target`.
///
/// Returns once the server replied `CONTINUE`; any other reply is [`HandshakeError::Rejected`]
/// and carries the server's reason.
pub fn initiate<S: Read + Write>(
    conn: &mut S,
    command: Command,
    target: &str,
) -> Result<(), HandshakeError> {
    send_control(command.token(), conn).map_err(HandshakeError::Send)?;
    expect(conn, GO)?;
    send_control(target, conn).map_err(HandshakeError::Send)?;
    expect(conn, CONTINUE)?;
    debug!("handshake for {} {} complete", command, target);
    Ok(())
}

/// server side: reads the command and target, replying `GO` in between.
///
/// `accept` validates the target; on `Err(reason)` the reason is sent in place of `CONTINUE`
/// and the handshake fails with [`HandshakeError::Refused`]. An unknown command gets no reply
/// at all.
pub fn respond<S, F>(conn: &mut S, accept: F) -> Result<(Command, String), HandshakeError>
where
    S: Read + Write,
    F: FnOnce(Command, &str) -> Result<(), String>,
{
    let token = receive_control(conn).map_err(HandshakeError::Recv)?;
    let command: Command = token
        .parse()
        .map_err(|_| HandshakeError::UnknownCommand(token.clone()))?;
    debug!("received command {}", command);

    send_control(GO, conn).map_err(HandshakeError::Send)?;
    let target = receive_control(conn).map_err(HandshakeError::Recv)?;

    if let Err(reason) = accept(command, &target) {
        send_control(&reason, conn).map_err(HandshakeError::Send)?;
        return Err(HandshakeError::Refused(reason));
    }
    send_control(CONTINUE, conn).map_err(HandshakeError::Send)?;
    Ok((command, target))
}

fn expect<R: Read>(conn: &mut R, token: &'static str) -> Result<(), HandshakeError> {
    let reply = receive_control(conn).map_err(HandshakeError::Recv)?;
    if reply == token {
        Ok(())
    } else {
        Err(HandshakeError::Rejected {
            expected: token,
            reply,
        })
    }
}
