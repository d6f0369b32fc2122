//! Byte exact transport used by both peers.
//!
//! Two kinds of traffic share a connection:
//! - control frames: exactly [`CONTROL_FRAME_SIZE`] bytes holding a NUL terminated string
//! - file streams: a 4 byte directory acknowledgment from the receiver, a 4 byte length from
//!   the sender, then exactly that many bytes of file data
//!
//! All integers are big-endian.
//!
//! [`CONTROL_FRAME_SIZE`]: ../config/constant.CONTROL_FRAME_SIZE.html
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{BUFFER_SIZE, CONTROL_FRAME_SIZE};
use crate::error::TransferError;
use crate::progress::Progress;

const DIR_OK: u32 = 1;
const DIR_MISSING: u32 = 0;

/// writes `msg` as one fixed size control frame.
///
/// Messages longer than the frame are truncated so that at least one trailing NUL remains.
pub fn send_control<W: Write>(msg: &str, conn: &mut W) -> io::Result<()> {
    let mut frame = [0_u8; CONTROL_FRAME_SIZE];
    let len = msg.len().min(CONTROL_FRAME_SIZE - 1);
    frame[..len].copy_from_slice(&msg.as_bytes()[..len]);
    conn.write_all(&frame)?;
    conn.flush()
}

/// reads exactly one control frame and returns the string before its first NUL.
///
/// # Errors
/// returns an `UnexpectedEof` error if the peer disconnects before a whole frame arrived
pub fn receive_control<R: Read>(conn: &mut R) -> io::Result<String> {
    let mut frame = [0_u8; CONTROL_FRAME_SIZE];
    conn.read_exact(&mut frame)?;
    let end = frame.iter().position(|&b| b == 0).unwrap_or(CONTROL_FRAME_SIZE);
    Ok(String::from_utf8_lossy(&frame[..end]).into_owned())
}

/// Streams the file at `path` to the peer.
///
/// The peer's directory acknowledgment is read first; if it refuses, nothing else is sent.
/// Returns the number of file bytes sent.
///
/// # Errors
/// - [`TransferError::Open`] if `path` cannot be opened
/// - [`TransferError::Rejected`] if the peer's destination directory does not exist
/// - [`TransferError::TooLarge`] if the file does not fit the 4 byte length header
/// - [`TransferError::Io`] if the socket or the file fails mid-stream
pub fn send_file<S: Read + Write>(
    path: &Path,
    conn: &mut S,
    progress: Progress,
) -> Result<u64, TransferError> {
    debug!("sending {:?}", path);
    let mut file = File::open(path).map_err(|source| TransferError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let file_size = file.metadata()?.len();

    if read_u32(conn)? != DIR_OK {
        warn!("peer rejected the destination for {:?}", path);
        return Err(TransferError::Rejected);
    }

    let len = u32::try_from(file_size).map_err(|_| TransferError::TooLarge(file_size))?;
    conn.write_all(&len.to_be_bytes())?;

    let bar = progress.bar(file_size);
    let mut buffer = [0_u8; BUFFER_SIZE];
    let mut sent = 0_u64;
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                bar.abandon();
                return Err(e.into());
            }
        };
        // write_all retries partial writes until the chunk is fully handed to the socket
        if let Err(e) = conn.write_all(&buffer[..read]) {
            bar.abandon();
            return Err(e.into());
        }
        sent += read as u64;
        bar.inc(read as u64);
    }
    conn.flush()?;
    bar.finish();

    debug!("sent {} bytes from {:?}", sent, path);
    Ok(sent)
}

/// Receives a file from the peer and stores it at `path`, overwriting any existing file.
///
/// If `path` names a parent directory that does not exist, a refusal is sent to the peer and
/// no file is created. A disconnect mid-stream leaves the partially written file in place.
/// Returns the number of file bytes received.
///
/// # Errors
/// - [`TransferError::Directory`] if the parent directory of `path` is missing
/// - [`TransferError::Open`] if `path` cannot be created
/// - [`TransferError::Stream`] if the peer disconnects before the announced length arrived
/// - [`TransferError::Io`] for any other socket or file error
pub fn receive_file<S: Read + Write>(
    path: &Path,
    conn: &mut S,
    progress: Progress,
) -> Result<u64, TransferError> {
    debug!("receiving into {:?}", path);
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if !dir.is_dir() {
            warn!("destination directory {:?} does not exist", dir);
            if let Err(e) = write_u32(conn, DIR_MISSING) {
                warn!("could not notify peer of the missing directory: {}", e);
            }
            return Err(TransferError::Directory(dir.to_path_buf()));
        }
    }
    write_u32(conn, DIR_OK)?;

    let expected = match read_u32(conn) {
        Ok(len) => u64::from(len),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(TransferError::Stream { received: 0, expected: 0 })
        }
        Err(e) => return Err(e.into()),
    };
    debug!("expecting {} bytes", expected);

    let mut file = File::create(path).map_err(|source| TransferError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let bar = progress.bar(expected);
    let mut buffer = [0_u8; BUFFER_SIZE];
    let mut received = 0_u64;
    while received < expected {
        let want = (expected - received).min(BUFFER_SIZE as u64) as usize;
        let read = match conn.read(&mut buffer[..want]) {
            Ok(0) => {
                bar.abandon();
                warn!("sender disconnected after {} of {} bytes", received, expected);
                return Err(TransferError::Stream { received, expected });
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                bar.abandon();
                return Err(e.into());
            }
        };
        file.write_all(&buffer[..read])?;
        received += read as u64;
        bar.inc(read as u64);
    }
    file.flush()?;
    bar.finish();

    debug!("received {} bytes into {:?}", received, path);
    Ok(received)
}

fn read_u32<R: Read>(conn: &mut R) -> io::Result<u32> {
    let mut buf = [0_u8; 4];
    conn.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn write_u32<W: Write>(conn: &mut W, value: u32) -> io::Result<()> {
    conn.write_all(&value.to_be_bytes())?;
    conn.flush()
}
