//! Serial confinement queues.
//!
//! A [`SerialQueue`] owns a piece of state and runs submitted jobs against it
//! one at a time, in submission order. Each job runs on tokio's blocking pool
//! with the queue's identity recorded in a thread-local, so code can tell
//! which queue it is executing on (`current_queue`). Jobs may block waiting on
//! *other* queues; waiting on the current queue is refused by callers as a
//! deadlock.

use crate::types::QueueId;
use std::cell::Cell;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error};

thread_local! {
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// Queue whose job is running on this thread, if any.
pub fn current_queue() -> Option<QueueId> {
    CURRENT_QUEUE.with(Cell::get)
}

/// Marks the current thread as running on `queue` until dropped.
pub(crate) struct QueueGuard {
    previous: Option<QueueId>,
}

impl QueueGuard {
    pub(crate) fn enter(queue: QueueId) -> Self {
        let previous = CURRENT_QUEUE.with(|current| current.replace(Some(queue)));
        Self { previous }
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        CURRENT_QUEUE.with(|current| current.set(self.previous));
    }
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Returned when a job is submitted to a queue that no longer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Handle to a serial queue owning state `S`. Cloning the handle shares the
/// queue; the queue stops once every handle is dropped and its backlog ran.
pub struct SerialQueue<S> {
    id: QueueId,
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for SerialQueue<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: Arc::clone(&self.label),
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> SerialQueue<S> {
    /// Start a queue owning `state` on the given runtime.
    pub fn spawn(id: QueueId, label: impl Into<Arc<str>>, state: S, runtime: &Handle) -> Self {
        let label = label.into();
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(drain(id, Arc::clone(&label), state, rx));
        debug!(queue = %label, id = %id, "Started confinement queue");
        Self { id, label, tx }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when the calling code is itself running on this queue.
    pub fn is_current(&self) -> bool {
        current_queue() == Some(self.id)
    }

    /// Enqueue a job and return immediately.
    ///
    /// On failure the job is dropped without running.
    pub fn submit<F>(&self, job: F) -> Result<(), QueueClosed>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx.send(Box::new(job)).map_err(|_| QueueClosed)
    }
}

async fn drain<S: Send + 'static>(
    id: QueueId,
    label: Arc<str>,
    mut state: S,
    mut rx: mpsc::UnboundedReceiver<Job<S>>,
) {
    while let Some(job) = rx.recv().await {
        debug!(queue = %label, "Running queued job");
        let running = tokio::task::spawn_blocking(move || {
            let _entered = QueueGuard::enter(id);
            job(&mut state);
            state
        });
        match running.await {
            Ok(returned) => state = returned,
            Err(e) => {
                error!(queue = %label, error = %e, "Confinement queue job panicked, closing queue");
                return;
            }
        }
    }
    debug!(queue = %label, "Confinement queue drained");
}
