use std::ffi::OsStr;
use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::command::{Command, Status};
use crate::config::ServerConfig;
use crate::connection;
use crate::handshake;
use crate::progress::Progress;
use crate::transport::{receive_control, receive_file, send_control, send_file};
use crate::waiting_room::{Request, SharedHandler, WaitingRoom};
use crate::{Result, RfsError};

/// A TCP file server that funnels every connection through a [`WaitingRoom`].
///
/// The accept loop reads each connection's routing frame (the resource key) and submits the
/// connection under that key. The key's worker then runs the handshake and the WRITE, GET or
/// RM operation, so operations on one file never overlap while different files are served in
/// parallel.
///
/// # Example
/// Serve files from `./data` on the default address until Ctrl-C is pressed
/// ```rust,no_run
/// use rfs::{RfsServer, ServerConfig, DEFAULT_ADDRESS};
/// # fn main() -> rfs::Result<()> {
/// let config = ServerConfig::new(DEFAULT_ADDRESS.parse().unwrap(), "./data");
/// let server = RfsServer::bind(config)?;
/// let handle = server.shutdown_handle()?;
/// ctrlc::set_handler(move || handle.shutdown()).expect("could not set the Ctrl-C handler");
/// server.run()?;
/// # Ok(())
/// # }
/// ```
///
/// [`WaitingRoom`]: ./waiting_room/struct.WaitingRoom.html
pub struct RfsServer {
    config: ServerConfig,
    listener: TcpListener,
    room: WaitingRoom<RoutedStream>,
    stop: Arc<AtomicBool>,
}

/// A connection together with the resource key it was routed under
#[derive(Debug)]
pub struct RoutedStream {
    key: String,
    stream: TcpStream,
}

/// Stops a running [`RfsServer`] from another thread, i.e. a Ctrl-C handler
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    /// Asks the accept loop to stop. [`RfsServer::run`] then shuts its waiting room down and
    /// returns once every worker has exited.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // accept() only notices the flag once a connection arrives
        if let Err(e) = TcpStream::connect(self.addr) {
            debug!("could not wake the accept loop: {}", e);
        }
    }
}

impl RfsServer {
    /// binds the listening socket described by `config`
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = connection::listen(config.addr)?;
        Ok(RfsServer {
            room: WaitingRoom::new(config.idle),
            config,
            listener,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// the address the server is actually listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// a handle that stops [`run`](Self::run) from another thread
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        let mut addr = self.local_addr()?;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => [127, 0, 0, 1].into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        Ok(ShutdownHandle {
            stop: self.stop.clone(),
            addr,
        })
    }

    /// Accepts connections until a [`ShutdownHandle`] stops the server.
    ///
    /// Connections that fail to send a routing frame are logged and dropped. Before
    /// returning, every worker is shut down and joined.
    ///
    /// # Errors
    /// returns [`RfsError::Dispatch`] if a worker could not be created
    pub fn run(self) -> Result<()> {
        let root = Arc::new(self.config.root.clone());
        let handler: SharedHandler<RoutedStream> =
            Arc::new(move |routed: RoutedStream| -> Result<()> { serve(&root, routed) });
        info!("serving files from {:?}", self.config.root);

        let mut result = Ok(());
        for stream in self.listener.incoming() {
            if self.stop.load(Ordering::SeqCst) {
                info!("server shutting down");
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Connection failed: {}", e);
                    continue;
                }
            };
            if let Ok(peer) = stream.peer_addr() {
                info!("client connected from {}", peer);
            }

            let routed = match read_route(stream, self.config.route_timeout) {
                Ok(routed) => routed,
                Err(e) => {
                    warn!("dropping connection without a routing frame: {}", e);
                    continue;
                }
            };
            let key = routed.key.clone();
            match self.room.submit(&key, Request::new(routed), handler.clone()) {
                Ok(()) => {}
                Err(RfsError::ShuttingDown) => break,
                Err(e) => {
                    error!("could not dispatch a request for {}: {}", key, e);
                    result = Err(e);
                    break;
                }
            }
        }

        self.room.shutdown_all();
        result
    }
}

/// reads the routing frame that names the resource key of a new connection
fn read_route(mut stream: TcpStream, timeout: Duration) -> Result<RoutedStream> {
    stream.set_read_timeout(Some(timeout))?;
    let key = receive_control(&mut stream)?;
    stream.set_read_timeout(None)?;
    if key.is_empty() {
        return Err(RfsError::Parsing("empty routing key".to_string()));
    }
    debug!("routing connection to {}", key);
    Ok(RoutedStream { key, stream })
}

/// Runs the handshake and then the requested operation for one routed connection.
///
/// Every failure ends the session; the connection is closed when `routed` is dropped.
#[instrument(skip(root, routed), fields(key = %routed.key))]
fn serve(root: &Path, routed: RoutedStream) -> Result<()> {
    let RoutedStream { key, mut stream } = routed;

    let (command, target) =
        handshake::respond(&mut stream, |command, target| check_target(root, &key, command, target))?;
    let path = root.join(&target);
    debug!("{} {:?}", command, path);

    match command {
        Command::Write => handle_write(&mut stream, &path),
        Command::Get => handle_get(&mut stream, &path),
        Command::Rm => handle_rm(&mut stream, &path),
    }
}

/// stores the client's file at `path` and reports the outcome to the client
fn handle_write(stream: &mut TcpStream, path: &Path) -> Result<()> {
    match receive_file(path, stream, Progress::Hidden) {
        Ok(len) => {
            info!("wrote {} bytes to {:?}", len, path);
            send_status(stream, Status::Ok("file written successfully".to_string()))
        }
        Err(e) => {
            if let Err(send_err) = send_status(stream, Status::Err(format!("file write failed: {}", e))) {
                debug!("could not report the failure to the client: {}", send_err);
            }
            Err(e.into())
        }
    }
}

/// streams `path` to the client and logs the client's confirmation
fn handle_get(stream: &mut TcpStream, path: &Path) -> Result<()> {
    let len = send_file(path, stream, Progress::Hidden)?;
    info!("sent {} bytes from {:?}", len, path);

    match Status::from_message(&receive_control(stream)?) {
        Status::Ok(msg) => info!("client: {}", msg),
        Status::Err(msg) => warn!("client: {}", msg),
    }
    Ok(())
}

/// deletes `path` and reports the outcome to the client
fn handle_rm(stream: &mut TcpStream, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("{:?} deleted", path);
            send_status(stream, Status::Ok("target deleted successfully".to_string()))
        }
        Err(e) => {
            send_status(stream, Status::Err(format!("target could not be deleted: {}", e)))?;
            Err(e.into())
        }
    }
}

fn send_status(stream: &mut TcpStream, status: Status) -> Result<()> {
    send_control(&status.to_message(), stream)?;
    Ok(())
}

/// Decides whether the handshake may answer `CONTINUE` for `target`.
///
/// The target must be the key the connection was routed under, so the worker that serializes
/// that key is the one touching the file. It must also stay inside the server root and be
/// spelled canonically, otherwise `d/g` and `d/./g` would be served by different workers.
/// WRITE and RM never apply to a directory.
fn check_target(root: &Path, key: &str, command: Command, target: &str) -> std::result::Result<(), String> {
    let refuse = |msg: String| -> std::result::Result<(), String> { Err(Status::Err(msg).to_message()) };

    if target.is_empty() {
        return refuse("empty target".to_string());
    }
    if target != key {
        return refuse(format!("target {} does not match the routed key {}", target, key));
    }
    if !is_contained(Path::new(target)) {
        return refuse(format!("target {} is outside the server root", target));
    }
    if !is_canonical(target) {
        return refuse(format!("target {} must be written as {}", target, canonical(target).display()));
    }
    let path = root.join(target);
    match command {
        Command::Get if !path.is_file() => refuse(format!("{} does not exist", target)),
        Command::Write | Command::Rm if path.is_dir() => refuse(format!("{} is a directory", target)),
        _ => Ok(()),
    }
}

/// `true` if `path` is relative and made only of plain names
fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// the target rebuilt from its components, dropping `.`, repeated and trailing separators
fn canonical(target: &str) -> PathBuf {
    Path::new(target).components().map(|c| c.as_os_str()).collect()
}

/// `true` if `target` is spelled exactly as its canonical form, so one file has one key
fn is_canonical(target: &str) -> bool {
    canonical(target).as_os_str() == OsStr::new(target)
}
