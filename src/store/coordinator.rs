//! Store coordinator: binds one backing store to the schema and enforces the
//! single-writer rule. Reads may come from any queue; writes only from the
//! queue bound with [`StoreCoordinator::bind_writer`].

use crate::context::queue::current_queue;
use crate::error::{ContextError, StorageError};
use crate::schema::Schema;
use crate::store::{ChangeSet, ObjectStore, SledObjectStore, StoredRecord, WriteBatch};
use crate::types::{ObjectId, QueueId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Hands out object identifiers. Shared by every context so that objects
/// created anywhere in the hierarchy get their permanent identity up front.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next.max(1)),
        }
    }

    pub fn allocate(&self) -> ObjectId {
        ObjectId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// First identifier not yet handed out.
    pub fn high_water_mark(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Summary of one physical commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub written: usize,
    pub removed: usize,
}

pub struct StoreCoordinator {
    schema: Arc<Schema>,
    store: Arc<dyn ObjectStore>,
    location: Option<PathBuf>,
    ids: Arc<IdAllocator>,
    writer: OnceLock<QueueId>,
}

impl StoreCoordinator {
    /// Open the sled store at `path`.
    pub fn open(path: &Path, schema: Arc<Schema>) -> Result<Self, StorageError> {
        let store = SledObjectStore::open(path)?;
        let mut coordinator = Self::with_store(Arc::new(store), schema)?;
        coordinator.location = Some(path.to_path_buf());
        info!(path = %path.display(), "Opened object store");
        Ok(coordinator)
    }

    /// Wrap an arbitrary store implementation.
    pub fn with_store(store: Arc<dyn ObjectStore>, schema: Arc<Schema>) -> Result<Self, StorageError> {
        let next = store.next_id()?;
        Ok(Self {
            schema,
            store,
            location: None,
            ids: Arc::new(IdAllocator::starting_at(next)),
            writer: OnceLock::new(),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn ids(&self) -> &Arc<IdAllocator> {
        &self.ids
    }

    /// Bind the one queue allowed to commit. Can only be done once.
    pub fn bind_writer(&self, queue: QueueId) -> Result<(), ContextError> {
        self.writer.set(queue).map_err(|_| {
            ContextError::ContractViolation("store coordinator already has a writer queue".into())
        })
    }

    pub fn writer_queue(&self) -> Option<QueueId> {
        self.writer.get().copied()
    }

    pub fn load(&self, entity: &str, id: ObjectId) -> Result<Option<StoredRecord>, ContextError> {
        self.schema.entity(entity)?;
        Ok(self.store.load(entity, id)?)
    }

    pub fn scan(&self, entity: &str) -> Result<Vec<StoredRecord>, ContextError> {
        self.schema.entity(entity)?;
        Ok(self.store.scan(entity)?)
    }

    /// Apply `changes` to the backing store as one atomic batch and flush it.
    ///
    /// Updates carry changed attributes only; they are merged onto the stored
    /// record. The changes are durable once this returns `Ok`. Must be called
    /// from the bound writer queue.
    pub fn commit(&self, changes: &ChangeSet) -> Result<CommitSummary, ContextError> {
        self.ensure_writer()?;

        let mut batch = WriteBatch {
            puts: changes.inserted.clone(),
            removes: changes.deleted.clone(),
            next_id: self.ids.high_water_mark(),
        };

        for update in &changes.updated {
            let mut record = self.store.load(&update.entity, update.id)?.ok_or_else(|| {
                StorageError::RecordNotFound {
                    entity: update.entity.clone(),
                    id: update.id,
                }
            })?;
            record
                .attributes
                .extend(update.changes.iter().map(|(k, v)| (k.clone(), v.clone())));
            batch.puts.push(record);
        }

        self.store.write(&batch)?;
        self.store.flush()?;
        let summary = CommitSummary {
            written: batch.puts.len(),
            removed: batch.removes.len(),
        };
        debug!(
            written = summary.written,
            removed = summary.removed,
            "Committed change set to store"
        );
        Ok(summary)
    }

    pub fn flush(&self) -> Result<(), ContextError> {
        self.ensure_writer()?;
        Ok(self.store.flush()?)
    }

    fn ensure_writer(&self) -> Result<(), ContextError> {
        let Some(writer) = self.writer.get().copied() else {
            return Err(ContextError::ContractViolation(
                "store coordinator has no writer queue bound".into(),
            ));
        };
        match current_queue() {
            Some(queue) if queue == writer => Ok(()),
            Some(queue) => Err(ContextError::ContractViolation(format!(
                "store write attempted from {} instead of writer {}",
                queue, writer
            ))),
            None => Err(ContextError::ContractViolation(format!(
                "store write attempted outside any confinement queue (writer is {})",
                writer
            ))),
        }
    }
}
