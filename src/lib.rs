#![deny(missing_docs)]
//! A remote file service (rfs) that lets clients WRITE, GET and RM files on a server over TCP,
//! while guaranteeing that operations on the same file never overlap.
//!
//! This crate provides the [`RfsServer`] and [`RfsClient`] implementations, the
//! [`WaitingRoom`] dispatcher the server is built on, as well as an [`rfs`] client and an
//! [`rfs-server`] executable.
//!
//! ## Supported Operations
//! - `WRITE` a local file to the server, overwriting the remote file
//! - `GET` a remote file into a local file
//! - `RM` a remote file
//!
//! ## Waiting Room
//! [`WaitingRoom`] is the brains of this entire operation. It maps every resource key (a file
//! name) to a dedicated worker thread that owns a FIFO queue of pending requests:
//! - requests for the same key are processed one at a time, in arrival order
//! - requests for different keys are processed in parallel
//! - workers are created the first time a key is seen and leave once idle, according to
//!   an [`IdlePolicy`]
//! - [`WaitingRoom::shutdown_all`] wakes, drains and joins every worker
//!
//! ## Custom Protocol
//! Every connection carries exactly one operation:
//! 1. the client sends a routing frame naming the key, which the server's accept loop uses to
//!    pick the worker
//! 2. the worker runs a handshake: `command -> GO -> target -> CONTINUE`
//! 3. the data phase runs, a length-prefixed file stream for WRITE and GET
//! 4. a human readable status line closes the exchange
//!
//! Short messages travel in fixed size control frames; see the [`transport`] module for the
//! byte layout.
//!
//! [`rfs`]: ./bin/rfs.rs
//! [`rfs-server`]: ./bin/rfs-server.rs
//! [`WaitingRoom`]: ./waiting_room/struct.WaitingRoom.html
//! [`IdlePolicy`]: ./waiting_room/enum.IdlePolicy.html
//! [`WaitingRoom::shutdown_all`]: ./waiting_room/struct.WaitingRoom.html#method.shutdown_all

pub use client::RfsClient;
pub use command::{Command, Status};
pub use config::{ServerConfig, DEFAULT_ADDRESS};
pub use error::{HandshakeError, Result, RfsError, TransferError};
pub use progress::Progress;
pub use server::{RfsServer, RoutedStream, ShutdownHandle};
pub use waiting_room::{IdlePolicy, WaitingRoom};

mod client;
mod command;
pub mod config;
pub mod connection;
mod error;
pub mod handshake;
mod progress;
mod server;
pub mod transport;
pub mod waiting_room;
