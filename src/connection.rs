//! Socket setup shared by the client and server roles.
use std::net::{TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::{Result, RfsError};

/// binds a listening socket on `addr` for the server role
pub fn listen<A: ToSocketAddrs + std::fmt::Debug>(addr: A) -> Result<TcpListener> {
    let listener = TcpListener::bind(&addr).map_err(|source| RfsError::Connection {
        action: format!("bind to {:?}", addr),
        source,
    })?;
    info!("listening for incoming connections on {:?}", listener.local_addr()?);
    Ok(listener)
}

/// opens a connection to the server at `addr` for the client role
pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(&addr).map_err(|source| RfsError::Connection {
        action: format!("connect to {:?}", addr),
        source,
    })?;
    debug!("connected to {:?}", addr);
    Ok(stream)
}
