//! Named constants and the [`ServerConfig`] shared by the client, server and binaries.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::waiting_room::IdlePolicy;
use crate::{Result, RfsError};

/// the address the server listens on and the client connects to, unless overridden
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:2000";

/// size of a file chunk read from disk or from the socket
pub const BUFFER_SIZE: usize = 1028;

/// size of every control frame, both peers must agree on it
pub const CONTROL_FRAME_SIZE: usize = BUFFER_SIZE;

/// how long an idle worker lingers before vacating the registry
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// how long the accept loop waits for a new connection's routing frame
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for an [`RfsServer`].
///
/// [`RfsServer`]: ../struct.RfsServer.html
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// address to listen on
    pub addr: SocketAddr,
    /// every resource key is resolved relative to this directory
    pub root: PathBuf,
    /// what a worker does once its queue runs dry
    pub idle: IdlePolicy,
    /// read timeout applied while the accept loop reads the routing frame
    pub route_timeout: Duration,
}

impl ServerConfig {
    /// a config listening on `addr` and serving files from `root`, with default timeouts
    pub fn new(addr: SocketAddr, root: impl Into<PathBuf>) -> Self {
        ServerConfig {
            addr,
            root: root.into(),
            idle: IdlePolicy::Linger(DEFAULT_IDLE_TIMEOUT),
            route_timeout: ROUTE_TIMEOUT,
        }
    }

    /// replaces the idle policy of the server's waiting room
    pub fn idle(mut self, idle: IdlePolicy) -> Self {
        self.idle = idle;
        self
    }
}

/// validates that `addr` is an IP address and PORT
///
/// # Errors
/// returns [`RfsError::Parsing`] if `addr` is not of the form `IP:PORT`
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|_| RfsError::Parsing(format!("could not parse {} into an IP address and port", addr)))
}
