use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, instrument};

use super::{IdlePolicy, Request, Shared, SharedHandler};

/// a queued request together with the handler that will process it
pub(crate) struct Job<C> {
    pub(crate) request: Request<C>,
    pub(crate) handler: SharedHandler<C>,
}

struct State<C> {
    queue: VecDeque<Job<C>>,
    /// set once the worker stopped taking requests, a `push` must then go elsewhere
    retired: bool,
}

/// The queue and thread bound to one resource key
pub(crate) struct Worker<C> {
    key: String,
    state: Mutex<State<C>>,
    wake: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<C> Worker<C> {
    /// a worker for `key` whose queue starts with `first`
    pub(crate) fn new(key: &str, first: Job<C>) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(first);
        Worker {
            key: key.to_string(),
            state: Mutex::new(State { queue, retired: false }),
            wake: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// appends `job` to the queue, or hands it back if this worker has retired
    pub(crate) fn push(&self, job: Job<C>) -> Result<(), Job<C>> {
        let mut state = self.state.lock();
        if state.retired {
            return Err(job);
        }
        state.queue.push_back(job);
        self.wake.notify_one();
        Ok(())
    }

    /// wakes the worker so it re-checks the shutdown flag
    pub(crate) fn wake(&self) {
        let _state = self.state.lock();
        self.wake.notify_all();
    }

    pub(crate) fn set_thread(&self, handle: JoinHandle<()>) {
        *self.thread.lock() = Some(handle);
    }

    pub(crate) fn take_thread(&self) -> Option<JoinHandle<()>> {
        self.thread.lock().take()
    }
}

/// starts the thread that drains `worker`'s queue
pub(crate) fn spawn<C: Send + 'static>(
    shared: Arc<Shared<C>>,
    worker: Arc<Worker<C>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("rfs-worker:{}", worker.key))
        .spawn(move || run(shared, worker))
}

#[instrument(skip_all, fields(key = %worker.key))]
fn run<C: Send + 'static>(shared: Arc<Shared<C>>, worker: Arc<Worker<C>>) {
    while let Some(Job { request, handler }) = next_job(&shared, &worker) {
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request.conn))) {
            Ok(Ok(())) => debug!("request complete"),
            Ok(Err(e)) => error!("request failed: {}", e),
            Err(_) => error!("request handler panicked"),
        }
    }
    debug!("worker exiting");
}

/// blocks until a job is available, or returns `None` once the worker should exit
fn next_job<C>(shared: &Shared<C>, worker: &Arc<Worker<C>>) -> Option<Job<C>> {
    let mut state = worker.state.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            return Some(job);
        }
        if shared.is_shutdown() {
            state.retired = true;
            return None;
        }
        match shared.idle {
            IdlePolicy::Persist => worker.wake.wait(&mut state),
            IdlePolicy::Exit => {
                reap(shared, worker, &mut state);
                return None;
            }
            IdlePolicy::Linger(timeout) => {
                let timed_out = worker.wake.wait_for(&mut state, timeout).timed_out();
                if timed_out && state.queue.is_empty() && !shared.is_shutdown() {
                    reap(shared, worker, &mut state);
                    return None;
                }
            }
        }
    }
}

/// Removes an idle worker from the registry. Called with the worker's queue lock held and its
/// queue empty, so no request can slip in between the check and the removal.
fn reap<C>(shared: &Shared<C>, worker: &Arc<Worker<C>>, state: &mut State<C>) {
    state.retired = true;
    // the handle is moved under the registry lock so shutdown either finds this worker in the
    // registry or finds its handle in the reaped channel
    shared.registry.remove_if(&worker.key, |_, current| {
        if !Arc::ptr_eq(current, worker) {
            return false;
        }
        if let Some(handle) = worker.take_thread() {
            let _ = shared.reaped_tx.send(handle);
        }
        true
    });
    debug!("idle worker left the registry");
}
