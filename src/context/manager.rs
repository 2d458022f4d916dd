//! Context Manager
//!
//! Owns the context hierarchy for one store: the writer context bound to the
//! store coordinator, the main context above it, and any number of temporary
//! leaves. Temporary saves propagate leaf → main → writer → store, each hop
//! running on the target context's own queue.

use crate::config::{ContextConfig, StratumConfig};
use crate::context::handle::ContextHandle;
use crate::context::{Context, ContextSetup, ParentLink, SaveSummary};
use crate::date_format::DateFormat;
use crate::error::{ContextError, SaveError, SaveStage};
use crate::schema::Schema;
use crate::store::StoreCoordinator;
use crate::types::{ContextId, ContextRole};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Arena of live contexts. Children refer to their parent by id and resolve
/// it here through a weak reference, so no context owns another.
pub(crate) struct Hierarchy {
    writer: ContextHandle,
    main: ContextHandle,
    temporaries: Mutex<HashSet<ContextId>>,
}

impl Hierarchy {
    pub(crate) fn resolve(&self, id: ContextId) -> Option<ContextHandle> {
        if id == self.writer.id() {
            Some(self.writer.clone())
        } else if id == self.main.id() {
            Some(self.main.clone())
        } else {
            None
        }
    }

    fn is_temporary(&self, id: ContextId) -> bool {
        self.temporaries.lock().contains(&id)
    }
}

/// Outcome of a fully propagated temporary save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Changes the leaf pushed into main.
    pub leaf: SaveSummary,
    /// Changes the writer committed to the store.
    pub durable: SaveSummary,
}

type Deliver = Box<dyn FnOnce(Result<SaveReport, SaveError>) + Send + 'static>;

/// Save completion travelling along the propagation chain. Delivered exactly
/// once: by `finish`, or on drop if a hop never ran.
struct Completion {
    stage: SaveStage,
    deliver: Option<Deliver>,
}

impl Completion {
    fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(Result<SaveReport, SaveError>) + Send + 'static,
    {
        Self {
            stage: SaveStage::Local,
            deliver: Some(Box::new(deliver)),
        }
    }

    fn advance(mut self, stage: SaveStage) -> Self {
        self.stage = stage;
        self
    }

    fn finish(mut self, outcome: Result<SaveReport, SaveError>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(outcome);
        }
    }

    fn fail(self, source: ContextError) {
        let stage = self.stage;
        self.finish(Err(SaveError::new(stage, source)));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Err(SaveError::new(
                self.stage,
                ContextError::QueueClosed {
                    context: format!("{} stage", self.stage),
                },
            )));
        }
    }
}

/// Awaitable result of [`ContextManager::save_temporary_context`].
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread. Dropping it does not cancel the save.
#[must_use = "a SaveHandle does nothing unless awaited or waited on"]
pub struct SaveHandle {
    rx: oneshot::Receiver<Result<SaveReport, SaveError>>,
}

impl SaveHandle {
    /// Block the calling thread until the save completed.
    pub fn wait(self) -> Result<SaveReport, SaveError> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(orphaned()))
    }
}

impl Future for SaveHandle {
    type Output = Result<SaveReport, SaveError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(orphaned())))
    }
}

fn orphaned() -> SaveError {
    SaveError::new(
        SaveStage::Local,
        ContextError::QueueClosed {
            context: "save completion".into(),
        },
    )
}

/// A leaf context whose parent is main. Dereferences to its
/// [`ContextHandle`]; dropping it unregisters it from the manager.
pub struct TemporaryContext {
    handle: ContextHandle,
    hierarchy: Weak<Hierarchy>,
}

impl Deref for TemporaryContext {
    type Target = ContextHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for TemporaryContext {
    fn drop(&mut self) {
        if let Some(hierarchy) = self.hierarchy.upgrade() {
            hierarchy.temporaries.lock().remove(&self.handle.id());
        }
    }
}

impl fmt::Debug for TemporaryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TemporaryContext").field(&self.handle).finish()
    }
}

/// Owner of the context hierarchy for one store.
pub struct ContextManager {
    hierarchy: Arc<Hierarchy>,
    coordinator: Arc<StoreCoordinator>,
    schema: Arc<Schema>,
    date_format: Arc<DateFormat>,
    config: ContextConfig,
    runtime: Handle,
}

impl ContextManager {
    /// Build the writer and main contexts over `coordinator`.
    ///
    /// Must be called inside a tokio runtime; the runtime must be
    /// multi-threaded for blocking waits between contexts to make progress.
    pub fn initialize(coordinator: StoreCoordinator, config: &ContextConfig) -> Result<Self, ContextError> {
        let runtime = Handle::try_current().map_err(|_| {
            ContextError::ContractViolation("ContextManager must be initialized inside a tokio runtime".into())
        })?;
        let date_format = Arc::new(DateFormat::new(config.date_format.clone()));
        date_format.validate().map_err(ContextError::ContractViolation)?;

        let coordinator = Arc::new(coordinator);
        let schema = Arc::clone(coordinator.schema());
        let prefix = config.queue_label_prefix.as_str();
        let setup = |role: ContextRole, label: String, parent: ParentLink| ContextSetup {
            role,
            label: label.into(),
            schema: Arc::clone(&schema),
            date_format: Arc::clone(&date_format),
            merge_policy: config.merge_policy,
            ids: Arc::clone(coordinator.ids()),
            parent,
        };

        let hierarchy = Arc::new_cyclic(|weak: &Weak<Hierarchy>| {
            let writer = ContextHandle::spawn(
                ContextId::next(),
                setup(
                    ContextRole::Writer,
                    format!("{}.writer", prefix),
                    ParentLink::Store(Arc::clone(&coordinator)),
                ),
                &runtime,
            );
            let main = ContextHandle::spawn(
                ContextId::next(),
                setup(
                    ContextRole::Main,
                    format!("{}.main", prefix),
                    ParentLink::Context {
                        id: writer.id(),
                        hierarchy: weak.clone(),
                    },
                ),
                &runtime,
            );
            Hierarchy {
                writer,
                main,
                temporaries: Mutex::new(HashSet::new()),
            }
        });
        coordinator.bind_writer(hierarchy.writer.queue_id())?;

        info!(
            writer = %hierarchy.writer.label(),
            main = %hierarchy.main.label(),
            merge_policy = ?config.merge_policy,
            "Context manager initialized"
        );
        Ok(Self {
            hierarchy,
            coordinator,
            schema,
            date_format,
            config: config.clone(),
            runtime,
        })
    }

    /// Open the store and schema named by `config` and initialize over them.
    pub fn open(config: &StratumConfig) -> Result<Self, ContextError> {
        let date_format = DateFormat::new(config.context.date_format.clone());
        let schema = Arc::new(Schema::load(&config.store.schema_path, &date_format)?);
        let coordinator = StoreCoordinator::open(&config.store.path, schema)?;
        let manager = Self::initialize(coordinator, &config.context)?;
        if let Some(ms) = config.store.flush_every_ms {
            manager.flush_periodically(Duration::from_millis(ms));
        }
        Ok(manager)
    }

    /// Flush the store from the writer queue every `period` until the
    /// manager is dropped.
    pub fn flush_periodically(&self, period: Duration) {
        let hierarchy = Arc::downgrade(&self.hierarchy);
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hierarchy) = hierarchy.upgrade() else {
                    break;
                };
                let flushed = hierarchy.writer.dispatch(|writer: &mut Context| {
                    if let Err(e) = writer.flush_store() {
                        warn!(context = %writer.label(), error = %e, "Periodic flush failed");
                    }
                });
                if flushed.is_err() {
                    break;
                }
            }
            debug!("Periodic flush stopped");
        });
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn date_format(&self) -> &DateFormat {
        &self.date_format
    }

    pub fn coordinator(&self) -> &Arc<StoreCoordinator> {
        &self.coordinator
    }

    /// The long-lived context for reads and UI-facing work.
    pub fn main_context(&self) -> &ContextHandle {
        &self.hierarchy.main
    }

    /// The only context whose saves reach the store.
    pub fn writer_context(&self) -> &ContextHandle {
        &self.hierarchy.writer
    }

    /// Number of temporary contexts created here and not yet dropped.
    pub fn live_temporaries(&self) -> usize {
        self.hierarchy.temporaries.lock().len()
    }

    /// Create a fresh leaf context whose parent is main.
    pub fn temporary_context(&self) -> TemporaryContext {
        let id = ContextId::next();
        let setup = ContextSetup {
            role: ContextRole::Temporary,
            label: format!("{}.temporary.{}", self.config.queue_label_prefix, id.as_u64()).into(),
            schema: Arc::clone(&self.schema),
            date_format: Arc::clone(&self.date_format),
            merge_policy: self.config.merge_policy,
            ids: Arc::clone(self.coordinator.ids()),
            parent: ParentLink::Context {
                id: self.hierarchy.main.id(),
                hierarchy: Arc::downgrade(&self.hierarchy),
            },
        };
        let handle = ContextHandle::spawn(id, setup, &self.runtime);
        self.hierarchy.temporaries.lock().insert(id);
        debug!(context = %handle.label(), "Created temporary context");
        TemporaryContext {
            handle,
            hierarchy: Arc::downgrade(&self.hierarchy),
        }
    }

    /// Save `context` and propagate its changes to the store.
    ///
    /// Returns immediately; the returned handle resolves exactly once, after
    /// the writer's commit or at the first failing stage.
    pub fn save_temporary_context(&self, context: &TemporaryContext) -> SaveHandle {
        let (tx, rx) = oneshot::channel();
        self.propagate(
            context,
            Completion::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        SaveHandle { rx }
    }

    /// Callback form of [`save_temporary_context`](Self::save_temporary_context).
    /// `completion` receives `None` on success.
    pub fn save_temporary_context_with<F>(&self, context: &TemporaryContext, completion: F)
    where
        F: FnOnce(Option<SaveError>) + Send + 'static,
    {
        self.propagate(
            context,
            Completion::new(move |outcome: Result<SaveReport, SaveError>| completion(outcome.err())),
        );
    }

    fn propagate(&self, context: &TemporaryContext, completion: Completion) {
        if !self.hierarchy.is_temporary(context.id()) {
            completion.fail(ContextError::ContractViolation(format!(
                "{} is not a live temporary context of this manager",
                context.label()
            )));
            return;
        }

        let main = self.hierarchy.main.clone();
        let writer = self.hierarchy.writer.clone();
        let submitted = context.dispatch(move |leaf: &mut Context| {
            let leaf_summary = match leaf.save() {
                Ok(summary) => summary,
                Err(e) => {
                    debug!(context = %leaf.label(), error = %e, "Temporary save failed locally");
                    completion.fail(e);
                    return;
                }
            };

            let completion = completion.advance(SaveStage::Main);
            let hop = main.dispatch(move |main: &mut Context| {
                if let Err(e) = main.save() {
                    warn!(context = %main.label(), error = %e, "Main save failed during propagation");
                    completion.fail(e);
                    return;
                }

                let completion = completion.advance(SaveStage::Writer);
                let hop = writer.dispatch(move |writer: &mut Context| match writer.save() {
                    Ok(durable) => completion.finish(Ok(SaveReport {
                        leaf: leaf_summary,
                        durable,
                    })),
                    Err(e) => {
                        warn!(context = %writer.label(), error = %e, "Writer save failed during propagation");
                        completion.fail(e);
                    }
                });
                if let Err(e) = hop {
                    warn!(error = %e, "Could not hand save to writer context");
                }
            });
            if let Err(e) = hop {
                warn!(error = %e, "Could not hand save to main context");
            }
        });
        if let Err(e) = submitted {
            warn!(context = %context.label(), error = %e, "Could not start temporary save");
        }
    }

    /// Drain main and writer, then flush the store. Temporary contexts still
    /// alive lose their parent once this returns.
    pub async fn shutdown(self) -> Result<(), ContextError> {
        self.hierarchy.main.perform(|_| ()).await?;
        self.flush().await?;
        info!("Context manager shut down");
        Ok(())
    }

    /// Flush the store from the writer queue, after the writer's queued jobs.
    pub async fn flush(&self) -> Result<(), ContextError> {
        self.hierarchy
            .writer
            .perform(|writer| writer.flush_store())
            .await?
    }
}

impl fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextManager")
            .field("writer", &self.hierarchy.writer)
            .field("main", &self.hierarchy.main)
            .field("config", &self.config)
            .finish()
    }
}
