//! Thread-safe handle to a context's confinement queue.

use crate::context::queue::SerialQueue;
use crate::context::{Context, ContextSetup, ParentLink};
use crate::error::ContextError;
use crate::types::{ContextId, ContextRole, QueueId};
use std::fmt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Cloneable handle used to run work on a context.
///
/// All access to a [`Context`] goes through one of three submission forms:
/// [`perform`](Self::perform) (async, awaits the result),
/// [`perform_and_wait`](Self::perform_and_wait) (blocks the calling thread)
/// and [`dispatch`](Self::dispatch) (fire and continue).
#[derive(Clone)]
pub struct ContextHandle {
    id: ContextId,
    role: ContextRole,
    parent: Option<ContextId>,
    queue: SerialQueue<Context>,
}

impl ContextHandle {
    pub(crate) fn spawn(id: ContextId, setup: ContextSetup, runtime: &Handle) -> Self {
        let role = setup.role;
        let parent = match &setup.parent {
            ParentLink::Store(_) => None,
            ParentLink::Context { id, .. } => Some(*id),
        };
        let label = setup.label.clone();
        let queue_id = QueueId::next();
        let context = Context::new(id, queue_id, setup);
        let queue = SerialQueue::spawn(queue_id, label, context, runtime);
        Self {
            id,
            role,
            parent,
            queue,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    /// Parent context, `None` for the store-bound writer.
    pub fn parent_id(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue.id()
    }

    pub fn label(&self) -> &str {
        self.queue.label()
    }

    /// Run `job` on the context's queue and await its result.
    pub async fn perform<F, R>(&self, job: F) -> Result<R, ContextError>
    where
        F: FnOnce(&mut Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move |context| {
            let _ = tx.send(job(context));
        })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Run `job` on the context's queue, blocking the calling thread until
    /// it finished.
    ///
    /// Must not be called from inside a tokio task, and is refused when
    /// called from the context's own queue.
    pub fn perform_and_wait<F, R>(&self, job: F) -> Result<R, ContextError>
    where
        F: FnOnce(&mut Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.queue.is_current() {
            return Err(ContextError::ContractViolation(format!(
                "perform_and_wait on {} from its own queue would deadlock",
                self.label()
            )));
        }
        let (tx, rx) = oneshot::channel();
        self.dispatch(move |context| {
            let _ = tx.send(job(context));
        })?;
        rx.blocking_recv().map_err(|_| self.closed())
    }

    /// Enqueue `job` and return immediately.
    pub fn dispatch<F>(&self, job: F) -> Result<(), ContextError>
    where
        F: FnOnce(&mut Context) + Send + 'static,
    {
        self.queue.submit(job).map_err(|_| self.closed())
    }

    fn closed(&self) -> ContextError {
        ContextError::QueueClosed {
            context: self.label().to_string(),
        }
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("parent", &self.parent)
            .field("label", &self.label())
            .finish()
    }
}
