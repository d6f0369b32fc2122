//! The "waiting room": a dispatcher that serializes work per resource key.
//!
//! Every key (a file name) that has pending work owns exactly one worker thread with a private
//! FIFO queue. Requests for the same key run one at a time, in arrival order, on that worker;
//! requests for different keys run on different workers, fully in parallel.
//!
//! Workers are created lazily by [`WaitingRoom::submit`] and leave the registry either when
//! their [`IdlePolicy`] lets them reap themselves, or during [`WaitingRoom::shutdown_all`].
//!
//! Two kinds of lock are involved:
//! - the registry (a [`DashMap`]), locked only to look up, insert or remove a worker entry
//! - each worker's queue lock, held only to push or pop a request
//!
//! `submit` never holds both at once. A reaping worker takes the registry lock while holding
//! its own queue lock, so nothing may take a queue lock while holding the registry lock.
//!
//! [`DashMap`]: https://docs.rs/dashmap/5.0.0/dashmap/struct.DashMap.html
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::config::DEFAULT_IDLE_TIMEOUT;
use crate::Result;
use crate::RfsError;

use self::worker::{Job, Worker};

mod worker;

/// Something that can process one connection routed through the [`WaitingRoom`].
///
/// Any `Fn(C) -> Result<()>` closure is a handler.
pub trait Handler<C>: Send + Sync + 'static {
    /// processes the request's connection. The connection is dropped, and so closed, afterwards
    fn handle(&self, conn: C) -> Result<()>;
}

impl<C, F> Handler<C> for F
where
    F: Fn(C) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, conn: C) -> Result<()> {
        self(conn)
    }
}

/// a handler that can be shared by many queued requests
pub type SharedHandler<C> = Arc<dyn Handler<C>>;

/// A unit of work waiting for its key's worker
#[derive(Debug)]
pub struct Request<C> {
    conn: C,
}

impl<C> Request<C> {
    /// wraps a connection into a request
    pub fn new(conn: C) -> Self {
        Request { conn }
    }
}

/// What a worker does once its queue is empty.
///
/// Whichever policy is used, every worker exits during [`WaitingRoom::shutdown_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// leave the registry and exit as soon as the queue is empty
    Exit,
    /// wait this long for new work, then leave the registry and exit
    Linger(Duration),
    /// wait for new work until shutdown
    Persist,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        IdlePolicy::Linger(DEFAULT_IDLE_TIMEOUT)
    }
}

/// state shared between the waiting room and all of its worker threads
pub(crate) struct Shared<C> {
    registry: DashMap<String, Arc<Worker<C>>>,
    shutdown: AtomicBool,
    idle: IdlePolicy,
    /// join handles of workers that removed themselves from the registry
    reaped_tx: Sender<JoinHandle<()>>,
    reaped_rx: Receiver<JoinHandle<()>>,
}

impl<C> Shared<C> {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// A registry of per-key workers that each drain a private FIFO queue.
///
/// Dropping a `WaitingRoom` shuts it down.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use rfs::waiting_room::{IdlePolicy, Request, SharedHandler, WaitingRoom};
///
/// let room = WaitingRoom::new(IdlePolicy::Persist);
/// let print: SharedHandler<String> = Arc::new(|line: String| -> rfs::Result<()> {
///     println!("{}", line);
///     Ok(())
/// });
/// room.submit("notes.txt", Request::new("first".to_string()), print.clone())?;
/// room.submit("notes.txt", Request::new("second".to_string()), print)?;
/// room.shutdown_all();
/// # Ok::<(), rfs::RfsError>(())
/// ```
pub struct WaitingRoom<C: Send + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: Send + 'static> WaitingRoom<C> {
    /// creates an empty waiting room whose workers follow the `idle` policy
    pub fn new(idle: IdlePolicy) -> Self {
        let (reaped_tx, reaped_rx) = channel::unbounded();
        WaitingRoom {
            shared: Arc::new(Shared {
                registry: DashMap::new(),
                shutdown: AtomicBool::new(false),
                idle,
                reaped_tx,
                reaped_rx,
            }),
        }
    }

    /// Queues `request` behind any earlier requests for `key`.
    ///
    /// If no worker owns `key`, one is created with `request` as its first item. Otherwise the
    /// request is appended to the existing worker's queue and the worker is woken.
    ///
    /// # Errors
    /// - [`RfsError::ShuttingDown`] once [`shutdown_all`](Self::shutdown_all) has begun; the
    ///   request is dropped
    /// - [`RfsError::Dispatch`] if a worker thread could not be started; the registry is left
    ///   unchanged
    pub fn submit(&self, key: &str, request: Request<C>, handler: SharedHandler<C>) -> Result<()> {
        self.join_reaped();
        let mut job = Job { request, handler };
        loop {
            let entry = self.shared.registry.entry(key.to_string());
            // checked under the shard lock, so shutdown_all's scan sees any worker inserted here
            if self.shared.is_shutdown() {
                return Err(RfsError::ShuttingDown);
            }

            let worker = match entry {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let created = Arc::new(Worker::new(key, job));
                    let handle = worker::spawn(self.shared.clone(), created.clone()).map_err(|e| {
                        RfsError::Dispatch(format!("could not start a worker for {}: {}", key, e))
                    })?;
                    // set before the entry becomes visible, a reaping worker needs its own handle
                    created.set_thread(handle);
                    entry.insert(created);
                    debug!("started worker for {}", key);
                    return Ok(());
                }
            };

            // the registry guard is released here, before the worker's lock is taken
            match worker.push(job) {
                Ok(()) => {
                    debug!("queued request for {}", key);
                    return Ok(());
                }
                Err(returned) => {
                    debug!("worker for {} retired while routing, retrying", key);
                    job = returned;
                }
            }
        }
    }

    /// Stops every worker and waits for all of them to exit.
    ///
    /// Requests already queued are still processed and running handlers are never
    /// interrupted. Later calls, or a call with no workers, return immediately.
    pub fn shutdown_all(&self) {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            info!("waiting room shutting down with {} active workers", self.active_workers());
        }

        loop {
            let workers: Vec<Arc<Worker<C>>> = self
                .shared
                .registry
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            if workers.is_empty() {
                break;
            }

            for worker in workers {
                worker.wake();
                if let Some(handle) = worker.take_thread() {
                    if handle.join().is_err() {
                        error!("worker for {} panicked", worker.key());
                    }
                }
                self.shared
                    .registry
                    .remove_if(worker.key(), |_, current| Arc::ptr_eq(current, &worker));
                debug!("worker for {} joined", worker.key());
            }
        }

        self.drain_reaped();
    }

    /// number of keys that currently own a worker
    pub fn active_workers(&self) -> usize {
        self.shared.registry.len()
    }

    /// returns `true` if a worker currently owns `key`
    pub fn is_active(&self, key: &str) -> bool {
        self.shared.registry.contains_key(key)
    }

    /// returns `true` once [`shutdown_all`](Self::shutdown_all) has been called
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// joins workers that reaped themselves and have already finished
    fn join_reaped(&self) {
        let reaped: Vec<JoinHandle<()>> = self.shared.reaped_rx.try_iter().collect();
        for handle in reaped {
            if handle.is_finished() {
                join_reaped_handle(handle);
            } else if let Err(returned) = self.shared.reaped_tx.send(handle) {
                join_reaped_handle(returned.into_inner());
            }
        }
        // shutdown_all may have drained the channel while the unfinished handles were out of it
        if self.shared.is_shutdown() {
            self.drain_reaped();
        }
    }

    /// joins every handle in the reaped channel, finished or not
    fn drain_reaped(&self) {
        for handle in self.shared.reaped_rx.try_iter() {
            join_reaped_handle(handle);
        }
    }
}

fn join_reaped_handle(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("a reaped worker panicked");
    }
}

impl<C: Send + 'static> Drop for WaitingRoom<C> {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
